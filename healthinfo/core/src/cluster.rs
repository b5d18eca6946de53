use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::subnet::SubnetTokenConfig;
use crate::{HealthCategory, HealthInfoError, HealthInfoResult};

const ADMIN_PREFIX: &str = "/minio/admin/v3";

/// Health-info protocol versions this client understands. Empty means the
/// server predates version reporting.
const SUPPORTED_VERSIONS: [&str; 3] = ["", "2", "3"];

/// One element produced by a streamed health-info response.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A fully decoded JSON object.
    Document(Value),
    /// The byte stream ended, or stopped decoding, in the middle of an object.
    Truncated(String),
}

/// Stream of partial health documents from one cluster call.
pub struct HealthInfoStream {
    version: String,
    frames: BoxStream<'static, HealthInfoResult<Frame>>,
}

impl HealthInfoStream {
    /// Wrap an arbitrary frame stream reported under `version`.
    pub fn new<S>(version: impl Into<String>, frames: S) -> Self
    where
        S: Stream<Item = HealthInfoResult<Frame>> + Send + 'static,
    {
        Self {
            version: version.into(),
            frames: frames.boxed(),
        }
    }

    /// Build a stream from frames that are already in memory.
    pub fn from_frames(version: impl Into<String>, frames: Vec<HealthInfoResult<Frame>>) -> Self {
        Self::new(version, stream::iter(frames))
    }

    /// Protocol version reported by the cluster for this call.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Next frame, or `None` once the stream ended cleanly.
    pub async fn next_frame(&mut self) -> Option<HealthInfoResult<Frame>> {
        self.frames.next().await
    }
}

impl std::fmt::Debug for HealthInfoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthInfoStream")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Cluster administrative calls the pipeline depends on.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Open one streamed health-info call bounded by `deadline`.
    async fn health_info(
        &self,
        categories: &[HealthCategory],
        deadline: Duration,
    ) -> HealthInfoResult<HealthInfoStream>;

    /// Read the cluster's `subnet` configuration (license / api key / proxy).
    async fn subnet_config(&self) -> HealthInfoResult<SubnetTokenConfig>;
}

/// Render a deadline the way the admin API parses durations: whole seconds
/// when possible, otherwise milliseconds rounded up.
fn deadline_param(deadline: Duration) -> String {
    let millis = deadline.as_nanos().div_ceil(1_000_000);
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

#[derive(Debug, Deserialize)]
struct VersionPreamble {
    #[serde(default)]
    version: String,
    #[serde(default)]
    error: String,
}

/// [`ClusterAdmin`] backed by the cluster's HTTP admin API.
#[derive(Clone)]
pub struct HttpClusterAdmin {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpClusterAdmin {
    /// Create a client for `endpoint`, optionally presenting a bearer token.
    pub fn new(endpoint: &str, token: Option<String>) -> HealthInfoResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| HealthInfoError::Fetch(format!("building admin client: {err}")))?;
        Ok(Self::with_client(client, endpoint, token))
    }

    /// Create an admin client that reuses an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, endpoint: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Base URL of the admin endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(format!("{}{ADMIN_PREFIX}{path}", self.endpoint));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl std::fmt::Debug for HttpClusterAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClusterAdmin")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl ClusterAdmin for HttpClusterAdmin {
    async fn health_info(
        &self,
        categories: &[HealthCategory],
        deadline: Duration,
    ) -> HealthInfoResult<HealthInfoStream> {
        let mut query = vec![("deadline".to_string(), deadline_param(deadline))];
        for category in HealthCategory::ALL {
            query.push((
                category.as_str().to_string(),
                categories.contains(&category).to_string(),
            ));
        }

        let response = self
            .get("/healthinfo")
            .query(&query)
            .timeout(deadline)
            .send()
            .await
            .map_err(|err| HealthInfoError::Fetch(format!("requesting health info: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HealthInfoError::Fetch(format!(
                "health info request returned {status}: {}",
                body.trim()
            )));
        }

        let mut frames = decode_frames(response.bytes_stream()).boxed();
        let preamble = match frames.next().await {
            Some(Ok(Frame::Document(value))) => serde_json::from_value::<VersionPreamble>(value)
                .map_err(|err| HealthInfoError::Fetch(format!("invalid version preamble: {err}")))?,
            Some(Ok(Frame::Truncated(reason))) => {
                return Err(HealthInfoError::Fetch(format!(
                    "version preamble unreadable: {reason}"
                )))
            }
            Some(Err(err)) => return Err(err),
            None => {
                return Err(HealthInfoError::Fetch(
                    "health info stream closed before version preamble".into(),
                ))
            }
        };
        if !preamble.error.is_empty() {
            return Err(HealthInfoError::Fetch(preamble.error));
        }
        if !SUPPORTED_VERSIONS.contains(&preamble.version.as_str()) {
            return Err(HealthInfoError::Fetch(format!(
                "unsupported health info version {}",
                preamble.version
            )));
        }
        debug!(version = %preamble.version, "health info stream opened");
        Ok(HealthInfoStream::new(preamble.version, frames))
    }

    async fn subnet_config(&self) -> HealthInfoResult<SubnetTokenConfig> {
        let response = self
            .get("/get-config-kv")
            .query(&[("key", "subnet")])
            .send()
            .await
            .map_err(|err| HealthInfoError::Credential(format!("reading subnet config: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HealthInfoError::Credential(format!(
                "reading subnet config returned {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| HealthInfoError::Credential(format!("reading subnet config: {err}")))?;
        Ok(SubnetTokenConfig::parse_kv(&body))
    }
}

/// Values at least this large are parsed on the blocking pool.
const BLOCKING_PARSE_BYTES: usize = 1 << 20;

/// Finds where the first top-level JSON value in a growing buffer ends.
///
/// Scanning resumes where the previous call stopped, so every buffered byte
/// is inspected once no matter how many chunks a value arrives in.
#[derive(Debug, Default)]
struct ValueScanner {
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    scalar: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Scan {
    Incomplete,
    /// The first value ends at this offset.
    Complete(usize),
    /// The first value is not an object or array.
    Scalar,
}

impl ValueScanner {
    fn scan(&mut self, buffer: &[u8]) -> Scan {
        if self.scalar {
            return Scan::Scalar;
        }
        while let Some(&byte) = buffer.get(self.scanned) {
            self.scanned += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let end = self.scanned;
                        self.reset();
                        return Scan::Complete(end);
                    }
                }
                b'"' if self.depth > 0 => self.in_string = true,
                _ if self.depth > 0 || byte.is_ascii_whitespace() => {}
                _ => {
                    self.scalar = true;
                    return Scan::Scalar;
                }
            }
        }
        Scan::Incomplete
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Parse one complete value, moving large ones off the async workers.
async fn parse_value(bytes: Vec<u8>) -> Result<Value, String> {
    if bytes.len() < BLOCKING_PARSE_BYTES {
        return serde_json::from_slice(&bytes).map_err(|err| err.to_string());
    }
    tokio::task::spawn_blocking(move || serde_json::from_slice::<Value>(&bytes))
        .await
        .map_err(|err| format!("decoder task failed: {err}"))?
        .map_err(|err| err.to_string())
}

/// Decode a leading scalar (or garbage) the slow way. `None` means more bytes
/// are needed.
fn leading_value(buffer: &[u8]) -> Option<Result<(Value, usize), serde_json::Error>> {
    let mut values = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => Some(Ok((value, values.byte_offset()))),
        Some(Err(err)) if !err.is_eof() => Some(Err(err)),
        _ => None,
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    scanner: ValueScanner,
    finished: bool,
}

/// Split a byte stream into concatenated JSON values.
///
/// A clean end (only whitespace left) terminates the stream. Leftover bytes
/// that never form a value yield one [`Frame::Truncated`] and then end.
/// Transport errors are yielded as `Err` and also end the stream.
pub fn decode_frames<S, E>(body: S) -> impl Stream<Item = HealthInfoResult<Frame>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        buffer: Vec::new(),
        scanner: ValueScanner::default(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            match state.scanner.scan(&state.buffer) {
                Scan::Complete(end) => {
                    let rest = state.buffer.split_off(end);
                    let value = std::mem::replace(&mut state.buffer, rest);
                    return match parse_value(value).await {
                        Ok(value) => Some((Ok(Frame::Document(value)), state)),
                        Err(reason) => {
                            state.finished = true;
                            Some((Ok(Frame::Truncated(reason)), state))
                        }
                    };
                }
                Scan::Scalar => match leading_value(&state.buffer) {
                    Some(Ok((value, consumed))) => {
                        state.buffer.drain(..consumed);
                        state.scanner.reset();
                        return Some((Ok(Frame::Document(value)), state));
                    }
                    Some(Err(err)) => {
                        state.finished = true;
                        return Some((Ok(Frame::Truncated(err.to_string())), state));
                    }
                    None => {}
                },
                Scan::Incomplete => {}
            }

            match state.body.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    state.finished = true;
                    let err = HealthInfoError::Fetch(format!("reading health info stream: {err}"));
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    if state.buffer.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    let reason = format!(
                        "stream ended with {} undecoded bytes",
                        state.buffer.len()
                    );
                    return Some((Ok(Frame::Truncated(reason)), state));
                }
            }
        }
    })
}
