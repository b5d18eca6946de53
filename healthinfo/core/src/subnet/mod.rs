//! SUBNET (support backend) integration: credential resolution and upload.

use std::net::{IpAddr, SocketAddr};

use reqwest::Client;

use crate::{HealthInfoError, HealthInfoResult};

mod auth;
mod upload;

pub use auth::{SubnetTokenConfig, UploadCredential, LICENSE_HEADER};
pub use upload::{decode_cluster_url, upload_filename, API_KEY_HEADER};

/// Default SUBNET base URL.
pub const DEFAULT_SUBNET_URL: &str = "https://subnet.min.io";

/// Shared SUBNET HTTP access.
///
/// Two clients are built once and reused by every job: one with the default
/// trust policy and one that skips certificate verification, handed out only to
/// loopback callers. `reqwest::Client` is reference counted, so cloning this is
/// cheap and concurrent jobs share connection pools.
#[derive(Clone)]
pub struct SubnetClient {
    base_url: String,
    strict: Client,
    loopback: Client,
}

impl SubnetClient {
    /// Build clients targeting `base_url`.
    pub fn new(base_url: &str) -> HealthInfoResult<Self> {
        let strict = Client::builder()
            .build()
            .map_err(|err| HealthInfoError::Upload(format!("building subnet client: {err}")))?;
        let loopback = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| HealthInfoError::Upload(format!("building subnet client: {err}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            strict,
            loopback,
        })
    }

    /// Base URL every SUBNET path is resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Pick the client for `caller`, honouring an optional proxy override.
    fn http_for(&self, caller: &str, proxy: Option<&str>) -> HealthInfoResult<Client> {
        let loopback = is_loopback_caller(caller);
        let Some(proxy) = proxy.filter(|p| !p.is_empty()) else {
            return Ok(if loopback {
                self.loopback.clone()
            } else {
                self.strict.clone()
            });
        };
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|err| HealthInfoError::Upload(format!("invalid subnet proxy: {err}")))?;
        Client::builder()
            .danger_accept_invalid_certs(loopback)
            .proxy(proxy)
            .build()
            .map_err(|err| HealthInfoError::Upload(format!("building subnet client: {err}")))
    }
}

impl std::fmt::Debug for SubnetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Whether a caller address (`ip:port`, bare ip, or host name) is loopback.
pub fn is_loopback_caller(caller: &str) -> bool {
    let caller = caller.trim();
    if let Ok(addr) = caller.parse::<SocketAddr>() {
        return addr.ip().is_loopback();
    }
    if let Ok(ip) = caller
        .trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
    {
        return ip.is_loopback();
    }
    let host = caller.rsplit_once(':').map_or(caller, |(host, _)| host);
    host.eq_ignore_ascii_case("localhost")
}
