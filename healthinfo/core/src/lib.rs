//! Health-info core: streaming collection of a cluster diagnostic document,
//! gzip/base64 archiving, best-effort SUBNET upload, and report delivery over a
//! live session.
#![deny(missing_docs)]

use std::time::Duration;

/// Gzip + base64 archive of a captured document.
pub mod archive;
/// Cluster admin collaborator and its HTTP implementation.
pub mod cluster;
/// Error taxonomy shared by every stage.
pub mod error;
/// Bounded, retrying fetch of the health document.
pub mod fetch;
/// Per-connection job driver tying the stages together.
pub mod job;
/// Report assembly and the upload outcome union.
pub mod report;
/// WebSocket session router that runs one job per connection.
pub mod session;
/// Report sinks (the outbound half of a session).
pub mod sink;
/// SUBNET credential resolution and upload.
pub mod subnet;

pub use archive::{archive_health_info, decode_archive, ArchiveBlob};
pub use cluster::{ClusterAdmin, Frame, HealthInfoStream, HttpClusterAdmin};
pub use error::{HealthInfoError, HealthInfoResult};
pub use fetch::{fetch_health_info, FetchPolicy, FetchedHealthInfo};
pub use job::{HealthInfoJob, HealthInfoRequest, JobState};
pub use report::{assemble_report, DiagnosticReport, UploadOutcome};
pub use session::{build_router, run_server, serve};
pub use sink::ReportSink;
pub use subnet::{SubnetClient, SubnetTokenConfig, UploadCredential};

/// Maximum number of streamed fetch attempts per job.
pub const MAX_FETCH_ATTEMPTS: u32 = 10;

/// Pause between fetch attempts that produced no usable version.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upload category (and multipart field name) used for health reports.
pub const HEALTH_UPLOAD_CATEGORY: &str = "health";

/// Subsystems probed by a health-info job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCategory {
    /// Cluster/server information.
    ClusterInfo,
    /// Cluster configuration.
    Config,
    /// CPU details.
    Cpu,
    /// Drive hardware.
    DriveHardware,
    /// Container runtime.
    ContainerRuntime,
    /// Operating system information.
    OsInfo,
    /// System load.
    Load,
    /// Memory.
    Memory,
    /// Network interfaces.
    Network,
    /// Running processes.
    Process,
}

impl HealthCategory {
    /// Every category, in the order it is sent on the wire.
    pub const ALL: [HealthCategory; 10] = [
        HealthCategory::ClusterInfo,
        HealthCategory::Config,
        HealthCategory::Cpu,
        HealthCategory::DriveHardware,
        HealthCategory::ContainerRuntime,
        HealthCategory::OsInfo,
        HealthCategory::Load,
        HealthCategory::Memory,
        HealthCategory::Network,
        HealthCategory::Process,
    ];

    /// Query parameter name the cluster expects for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCategory::ClusterInfo => "minioinfo",
            HealthCategory::Config => "minioconfig",
            HealthCategory::Cpu => "syscpu",
            HealthCategory::DriveHardware => "sysdrivehw",
            HealthCategory::ContainerRuntime => "sysdocker",
            HealthCategory::OsInfo => "sysosinfo",
            HealthCategory::Load => "sysload",
            HealthCategory::Memory => "sysmem",
            HealthCategory::Network => "sysnet",
            HealthCategory::Process => "sysprocess",
        }
    }
}

impl std::fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed category set probed by every job.
pub const HEALTH_CATEGORIES: [HealthCategory; 10] = HealthCategory::ALL;

/// Parse a caller-supplied deadline such as `"2h"` or `"1h 30m"`.
pub fn parse_deadline(raw: &str) -> HealthInfoResult<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HealthInfoError::InvalidDeadline);
    }
    match humantime::parse_duration(raw) {
        Ok(deadline) if !deadline.is_zero() => Ok(deadline),
        _ => Err(HealthInfoError::InvalidDeadline),
    }
}
