use async_trait::async_trait;

use crate::HealthInfoResult;

/// Outbound half of a session: accepts the serialized report for one job.
#[async_trait]
pub trait ReportSink: Send {
    /// Deliver one text message. Failure is reported as
    /// [`crate::HealthInfoError::Delivery`].
    async fn deliver(&mut self, message: String) -> HealthInfoResult<()>;
}

/// Sink that keeps delivered messages in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    messages: Vec<String>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn deliver(&mut self, message: String) -> HealthInfoResult<()> {
        self.messages.push(message);
        Ok(())
    }
}
