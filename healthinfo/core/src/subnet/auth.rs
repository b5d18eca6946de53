use serde::Deserialize;
use tracing::debug;

use super::SubnetClient;
use crate::{HealthInfoError, HealthInfoResult};

/// Header carrying a license during the API key exchange.
pub const LICENSE_HEADER: &str = "x-subnet-license";

/// SUBNET settings for one job. Values are secrets and are never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SubnetTokenConfig {
    /// Directly configured API key.
    pub api_key: Option<String>,
    /// License exchanged for an API key when no key is configured.
    pub license: Option<String>,
    /// Optional proxy for SUBNET traffic.
    pub proxy: Option<String>,
}

impl SubnetTokenConfig {
    /// Parse the `subnet` sub-system as returned by the cluster, e.g.
    /// `subnet license="..." api_key=... proxy=`.
    pub fn parse_kv(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            for token in line.split_whitespace() {
                let Some((key, value)) = token.split_once('=') else {
                    continue;
                };
                let value = value.trim_matches('"');
                let value = (!value.is_empty()).then(|| value.to_string());
                match key {
                    "license" => config.license = value,
                    "api_key" => config.api_key = value,
                    "proxy" => config.proxy = value,
                    _ => {}
                }
            }
        }
        config
    }

    /// Layer `overrides` on top of `self`; set override fields win.
    pub fn overlay(self, overrides: &SubnetTokenConfig) -> Self {
        Self {
            api_key: overrides.api_key.clone().or(self.api_key),
            license: overrides.license.clone().or(self.license),
            proxy: overrides.proxy.clone().or(self.proxy),
        }
    }

    /// Whether a credential can be resolved without contacting the cluster.
    pub fn is_complete(&self) -> bool {
        has_value(&self.api_key) || has_value(&self.license)
    }
}

impl std::fmt::Debug for SubnetTokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetTokenConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("license", &self.license.as_ref().map(|_| "<redacted>"))
            .field("proxy", &self.proxy)
            .finish()
    }
}

fn has_value(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// API key resolved for a single upload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadCredential {
    api_key: String,
}

impl UploadCredential {
    /// Wrap an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// The raw key, for building request headers.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UploadCredential(<redacted>)")
    }
}

#[derive(Deserialize)]
struct ApiKeyResponse {
    #[serde(default)]
    api_key: String,
}

impl SubnetClient {
    /// Resolve an API key: the configured key verbatim, otherwise exchange the
    /// license through `/api/auth/api-key`.
    pub async fn resolve_credential(
        &self,
        config: &SubnetTokenConfig,
        caller: &str,
    ) -> HealthInfoResult<UploadCredential> {
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            debug!("using configured subnet api key");
            return Ok(UploadCredential::new(api_key));
        }
        let license = config
            .license
            .as_deref()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                HealthInfoError::Credential("neither api key nor license is configured".into())
            })?;

        debug!("exchanging subnet license for api key");
        let url = format!("{}/api/auth/api-key", self.base_url);
        let response = self
            .http_for(caller, config.proxy.as_deref())?
            .get(&url)
            .header(LICENSE_HEADER, license)
            .send()
            .await
            .map_err(|err| HealthInfoError::Credential(format!("license exchange: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| HealthInfoError::Credential(format!("license exchange: {err}")))?;
        if !status.is_success() {
            return Err(HealthInfoError::Credential(format!(
                "license exchange returned {status}: {}",
                body.trim()
            )));
        }
        let parsed: ApiKeyResponse = serde_json::from_str(&body).map_err(|err| {
            HealthInfoError::Credential(format!("license exchange response: {err}"))
        })?;
        if parsed.api_key.is_empty() {
            return Err(HealthInfoError::Credential(
                "license exchange returned no api_key".into(),
            ));
        }
        Ok(UploadCredential::new(parsed.api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cluster_subnet_config() {
        let config = SubnetTokenConfig::parse_kv(
            "# comment\nsubnet license=\"eyJhbGciOi.lic\" api_key= proxy=http://proxy:3128\n",
        );
        assert_eq!(config.license.as_deref(), Some("eyJhbGciOi.lic"));
        assert_eq!(config.api_key, None);
        assert_eq!(config.proxy.as_deref(), Some("http://proxy:3128"));
        assert!(config.is_complete());
    }

    #[test]
    fn overrides_win_over_cluster_values() {
        let cluster = SubnetTokenConfig {
            api_key: None,
            license: Some("cluster-license".into()),
            proxy: Some("http://proxy".into()),
        };
        let overrides = SubnetTokenConfig {
            api_key: Some("override-key".into()),
            ..SubnetTokenConfig::default()
        };
        let merged = cluster.overlay(&overrides);
        assert_eq!(merged.api_key.as_deref(), Some("override-key"));
        assert_eq!(merged.license.as_deref(), Some("cluster-license"));
        assert_eq!(merged.proxy.as_deref(), Some("http://proxy"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = SubnetTokenConfig {
            api_key: Some("super-secret-key".into()),
            license: Some("super-secret-license".into()),
            proxy: None,
        };
        let rendered = format!("{config:?} {:?}", UploadCredential::new("super-secret-key"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn configured_key_is_used_without_network() {
        // Unroutable base URL: any network attempt would fail the test.
        let client = SubnetClient::new("http://127.0.0.1:9").unwrap();
        let config = SubnetTokenConfig {
            api_key: Some("direct-key".into()),
            license: Some("ignored".into()),
            proxy: None,
        };
        let credential = client.resolve_credential(&config, "10.0.0.1:1").await.unwrap();
        assert_eq!(credential.api_key(), "direct-key");
    }

    #[tokio::test]
    async fn missing_key_and_license_is_a_credential_error() {
        let client = SubnetClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .resolve_credential(&SubnetTokenConfig::default(), "127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, HealthInfoError::Credential(_)));
        assert!(!err.is_fatal());
    }
}
