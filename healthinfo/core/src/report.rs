use serde::Serialize;
use serde_json::Value;

use crate::archive::ArchiveBlob;
use crate::{HealthInfoError, HealthInfoResult};

/// Result of the upload leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// SUBNET accepted the report and returned this cluster URL.
    ClusterUrl(String),
    /// Credential resolution or upload failed with this message.
    Failure(String),
}

impl UploadOutcome {
    /// Fold an upload-leg result into an outcome.
    pub fn from_result(result: HealthInfoResult<String>) -> Self {
        match result {
            Ok(url) => UploadOutcome::ClusterUrl(url),
            Err(err) => UploadOutcome::Failure(err.to_string()),
        }
    }

    /// Text placed in the report's `subnetResponse` field.
    pub fn into_response_text(self) -> String {
        match self {
            UploadOutcome::ClusterUrl(url) => url,
            UploadOutcome::Failure(message) => format!("Error: {message}"),
        }
    }
}

/// The single message sent to the caller for a successful capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    /// Base64 gzip archive of the version header and document.
    pub encoded: String,
    /// The raw document as fetched.
    #[serde(rename = "serverHealthInfo")]
    pub server_health_info: Value,
    /// Cluster URL, or `"Error: <message>"` if the upload leg failed.
    #[serde(rename = "subnetResponse")]
    pub subnet_response: String,
}

impl DiagnosticReport {
    /// Serialize to the JSON text sent over the session.
    pub fn to_message(&self) -> HealthInfoResult<String> {
        serde_json::to_string(self)
            .map_err(|err| HealthInfoError::Delivery(format!("encoding report: {err}")))
    }
}

/// Combine a successful capture with whatever the upload leg produced.
pub fn assemble_report(
    archive: ArchiveBlob,
    document: Value,
    upload: UploadOutcome,
) -> DiagnosticReport {
    DiagnosticReport {
        encoded: archive.encoded,
        server_health_info: document,
        subnet_response: upload.into_response_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive_health_info;
    use serde_json::json;

    #[test]
    fn failed_upload_is_reported_as_error_text() {
        let document = json!({"version": "3"});
        let archive = archive_health_info(&document, "3").unwrap();
        let encoded = archive.encoded.clone();
        for err in [
            HealthInfoError::Credential("license exchange returned 401".into()),
            HealthInfoError::Upload("connection refused".into()),
            HealthInfoError::SubnetUploadFailed,
        ] {
            let report = assemble_report(
                archive.clone(),
                document.clone(),
                UploadOutcome::from_result(Err(err)),
            );
            assert_eq!(report.encoded, encoded);
            assert_eq!(report.server_health_info, document);
            assert!(report.subnet_response.starts_with("Error: "));
            assert!(report.subnet_response.len() > "Error: ".len());
        }
    }

    #[test]
    fn report_serializes_with_wire_field_names() {
        let document = json!({"version": "3", "servers": []});
        let archive = archive_health_info(&document, "3").unwrap();
        let report = assemble_report(
            archive,
            document.clone(),
            UploadOutcome::ClusterUrl("https://subnet.example/cluster/1".into()),
        );
        let message: Value = serde_json::from_str(&report.to_message().unwrap()).unwrap();
        assert_eq!(message["serverHealthInfo"], document);
        assert_eq!(message["subnetResponse"], "https://subnet.example/cluster/1");
        assert!(message["encoded"].as_str().is_some_and(|e| !e.is_empty()));
    }
}
