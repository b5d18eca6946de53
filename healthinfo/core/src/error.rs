/// Result alias used across the pipeline.
pub type HealthInfoResult<T> = Result<T, HealthInfoError>;

/// Errors emitted by health-info jobs.
///
/// Fetch, archive and delivery failures abort the job. Credential and upload
/// failures only degrade the report (see [`HealthInfoError::is_fatal`]).
#[derive(Debug, thiserror::Error)]
pub enum HealthInfoError {
    /// Deadline was missing or malformed.
    #[error("a valid deadline is required to collect health info")]
    InvalidDeadline,
    /// Transport or protocol failure while streaming from the cluster.
    #[error("health info fetch failed: {0}")]
    Fetch(String),
    /// Every attempt ended without a document carrying a version.
    #[error("failed to generate health report after {attempts} attempts")]
    HealthReportFailed {
        /// Attempts performed before giving up.
        attempts: u32,
    },
    /// Serialization or compression failure.
    #[error("archive failed: {0}")]
    Archive(#[from] std::io::Error),
    /// No API key could be resolved for SUBNET.
    #[error("subnet credential resolution failed: {0}")]
    Credential(String),
    /// Upload request failed or was rejected.
    #[error("subnet upload failed: {0}")]
    Upload(String),
    /// Upload succeeded at the HTTP level but returned no cluster URL.
    #[error("SUBNET upload failed: response carried no cluster_url")]
    SubnetUploadFailed,
    /// Writing the report to the session failed.
    #[error("report delivery failed: {0}")]
    Delivery(String),
    /// The driving session went away mid-job.
    #[error("health info job cancelled")]
    Cancelled,
}

impl HealthInfoError {
    /// Whether the error aborts the job instead of degrading the report.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HealthInfoError::Credential(_)
                | HealthInfoError::Upload(_)
                | HealthInfoError::SubnetUploadFailed
        )
    }
}

impl From<serde_json::Error> for HealthInfoError {
    fn from(err: serde_json::Error) -> Self {
        HealthInfoError::Archive(err.into())
    }
}
