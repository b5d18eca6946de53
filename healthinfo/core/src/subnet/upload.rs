use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{SubnetClient, UploadCredential};
use crate::{HealthInfoError, HealthInfoResult};

/// Header carrying the API key on uploads.
pub const API_KEY_HEADER: &str = "x-subnet-api-key";

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    cluster_url: String,
}

/// `<category>_<unix seconds>.json`
pub fn upload_filename(category: &str, unix_secs: u64) -> String {
    format!("{category}_{unix_secs}.json")
}

/// Undo escaped path separators in a SUBNET cluster URL.
pub fn decode_cluster_url(raw: &str) -> String {
    raw.replace("%2f", "/").replace("%2F", "/")
}

impl SubnetClient {
    /// Upload `document` as a multipart file and return the cluster URL SUBNET
    /// assigned to it.
    ///
    /// A successful HTTP exchange whose body lacks a non-empty `cluster_url` is
    /// still a failure ([`HealthInfoError::SubnetUploadFailed`]).
    pub async fn upload(
        &self,
        document: &Value,
        category: &str,
        filename: &str,
        credential: &UploadCredential,
        caller: &str,
        proxy: Option<&str>,
    ) -> HealthInfoResult<String> {
        let url = format!("{}/api/{category}/upload", self.base_url);
        let client = self.http_for(caller, proxy)?;

        let payload = serde_json::to_vec(document)
            .map_err(|err| HealthInfoError::Upload(format!("encoding upload body: {err}")))?;
        let part = Part::bytes(payload)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|err| HealthInfoError::Upload(format!("building upload body: {err}")))?;
        let form = Form::new().part(category.to_string(), part);

        debug!(%url, filename, "uploading health report to subnet");
        let response = client
            .post(&url)
            .query(&[("filename", filename)])
            .header(API_KEY_HEADER, credential.api_key())
            .multipart(form)
            .send()
            .await
            .map_err(|err| HealthInfoError::Upload(format!("posting to {url}: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| HealthInfoError::Upload(format!("reading upload response: {err}")))?;
        if !status.is_success() {
            return Err(HealthInfoError::Upload(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|err| HealthInfoError::Upload(format!("decoding upload response: {err}")))?;
        if parsed.cluster_url.is_empty() {
            return Err(HealthInfoError::SubnetUploadFailed);
        }
        let cluster_url = decode_cluster_url(&parsed.cluster_url);
        info!(%cluster_url, "health report uploaded to subnet");
        Ok(cluster_url)
    }
}
