use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, error, warn, Instrument};

use crate::archive::archive_health_info;
use crate::cluster::ClusterAdmin;
use crate::fetch::{fetch_health_info, FetchPolicy};
use crate::report::{assemble_report, DiagnosticReport, UploadOutcome};
use crate::sink::ReportSink;
use crate::subnet::{upload_filename, SubnetClient, SubnetTokenConfig};
use crate::{HealthCategory, HealthInfoResult, HEALTH_CATEGORIES, HEALTH_UPLOAD_CATEGORY};

/// Per-job state machine. `FetchFailed` and `ArchiveFailed` end the job without
/// a report; `UploadFailed` only degrades it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Job accepted.
    Start,
    /// Streaming from the cluster.
    Fetching,
    /// A complete document is available.
    Fetched,
    /// Fetch failed; terminal.
    FetchFailed,
    /// Compressing and encoding.
    Archiving,
    /// Archive ready.
    Archived,
    /// Archiving failed; terminal.
    ArchiveFailed,
    /// Resolving credentials and uploading.
    Uploading,
    /// SUBNET returned a cluster URL.
    Uploaded,
    /// Upload leg failed; the report still goes out.
    UploadFailed,
    /// Assembling and sending the report.
    Reporting,
    /// Report delivered; terminal.
    Reported,
}

fn transition(state: &mut JobState, next: JobState) {
    debug!(from = ?*state, to = ?next, "health job transition");
    *state = next;
}

/// Inputs of a single job. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthInfoRequest {
    /// Subsystems to probe.
    pub categories: Vec<HealthCategory>,
    /// Deadline forwarded to every fetch attempt. Required.
    pub deadline: Option<Duration>,
    /// Address of the caller driving the job.
    pub caller: String,
}

impl HealthInfoRequest {
    /// Request for the fixed category set.
    pub fn new(deadline: Option<Duration>, caller: impl Into<String>) -> Self {
        Self {
            categories: HEALTH_CATEGORIES.to_vec(),
            deadline,
            caller: caller.into(),
        }
    }
}

/// Runs the fetch → archive → upload → report pipeline. Shared by every
/// session; holds no per-job state.
#[derive(Clone)]
pub struct HealthInfoJob {
    admin: Arc<dyn ClusterAdmin>,
    subnet: SubnetClient,
    overrides: SubnetTokenConfig,
    policy: FetchPolicy,
}

impl HealthInfoJob {
    /// Build a job runner with the default fetch policy.
    pub fn new(admin: Arc<dyn ClusterAdmin>, subnet: SubnetClient) -> Self {
        Self {
            admin,
            subnet,
            overrides: SubnetTokenConfig::default(),
            policy: FetchPolicy::default(),
        }
    }

    /// SUBNET settings that take precedence over the cluster's own.
    pub fn with_subnet_overrides(mut self, overrides: SubnetTokenConfig) -> Self {
        self.overrides = overrides;
        self
    }

    /// Replace the fetch policy.
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the job and deliver its report to `sink`.
    ///
    /// Fetch, archive and delivery errors are returned and nothing is sent.
    /// Upload-leg errors end up inside the delivered report.
    pub async fn run(
        &self,
        request: &HealthInfoRequest,
        sink: &mut dyn ReportSink,
    ) -> HealthInfoResult<()> {
        let span = tracing::info_span!(
            "health_job",
            caller = %request.caller,
            deadline = ?request.deadline,
        );
        async {
            let report = self.collect(request).await?;
            let message = report.to_message()?;
            sink.deliver(message).await?;
            debug!("health report delivered");
            Ok(())
        }
        .instrument(span)
        .await
        .inspect_err(|err| error!(error = %err, "health job failed"))
    }

    /// Run every stage up to (not including) delivery.
    pub async fn collect(&self, request: &HealthInfoRequest) -> HealthInfoResult<DiagnosticReport> {
        let mut state = JobState::Start;

        transition(&mut state, JobState::Fetching);
        let fetched = match fetch_health_info(
            self.admin.as_ref(),
            &request.categories,
            request.deadline,
            &self.policy,
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(err) => {
                transition(&mut state, JobState::FetchFailed);
                return Err(err);
            }
        };
        transition(&mut state, JobState::Fetched);

        transition(&mut state, JobState::Archiving);
        let archive = match archive_health_info(&fetched.document, &fetched.version) {
            Ok(archive) => archive,
            Err(err) => {
                transition(&mut state, JobState::ArchiveFailed);
                return Err(err);
            }
        };
        transition(&mut state, JobState::Archived);

        transition(&mut state, JobState::Uploading);
        let outcome = UploadOutcome::from_result(
            self.upload_leg(&fetched.document, &request.caller).await,
        );
        match &outcome {
            UploadOutcome::ClusterUrl(_) => transition(&mut state, JobState::Uploaded),
            UploadOutcome::Failure(message) => {
                warn!(%message, "subnet upload failed, reporting capture without it");
                transition(&mut state, JobState::UploadFailed);
            }
        }

        transition(&mut state, JobState::Reporting);
        Ok(assemble_report(archive, fetched.document, outcome))
    }

    async fn upload_leg(&self, document: &Value, caller: &str) -> HealthInfoResult<String> {
        let config = if self.overrides.is_complete() {
            self.overrides.clone()
        } else {
            self.admin.subnet_config().await?.overlay(&self.overrides)
        };
        let credential = self.subnet.resolve_credential(&config, caller).await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let filename = upload_filename(HEALTH_UPLOAD_CATEGORY, now);
        self.subnet
            .upload(
                document,
                HEALTH_UPLOAD_CATEGORY,
                &filename,
                &credential,
                caller,
                config.proxy.as_deref(),
            )
            .await
    }
}

impl std::fmt::Debug for HealthInfoJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthInfoJob")
            .field("subnet", &self.subnet)
            .field("overrides", &self.overrides)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
