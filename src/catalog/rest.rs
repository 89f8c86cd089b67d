//! Blocking REST client for the control plane

use super::{Catalog, FetchError, FetchResult};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

/// Default per-request timeout for control-plane calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Control-plane catalog reached over its REST interface
///
/// The base URL may carry `user:password@` user-info, which is sent as HTTP
/// basic authentication on every request.
#[derive(Debug, Clone)]
pub struct RestCatalog {
    base: Url,
    user: String,
    password: Option<String>,
    client: Client,
}

impl RestCatalog {
    /// Create a catalog client with the default timeout
    pub fn new(base: &str, insecure: bool) -> FetchResult<Self> {
        Self::with_timeout(base, insecure, DEFAULT_TIMEOUT)
    }

    /// Create a catalog client
    ///
    /// `insecure` disables verification of the control plane's TLS
    /// certificate; it has no effect on the partner connections.
    pub fn with_timeout(base: &str, insecure: bool, timeout: Duration) -> FetchResult<Self> {
        let mut base = Url::parse(base).map_err(|e| FetchError::InvalidUrl {
            url: base.to_string(),
            message: e.to_string(),
        })?;

        let user = base.username().to_string();
        let password = base.password().map(str::to_string);
        // Credentials travel in the Authorization header only.
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| FetchError::Transport {
                resource: base.to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            base,
            user,
            password,
            client,
        })
    }

    /// Base URL without user-info
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, path: &str) -> FetchResult<Url> {
        let mut url = self.base.clone();
        let prefix = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", prefix, path));
        Ok(url)
    }
}

fn error_message(resp: reqwest::blocking::Response) -> String {
    match resp.text() {
        Ok(body) => body.trim().to_string(),
        Err(e) => format!("failed to read the response body: {}", e),
    }
}

impl Catalog for RestCatalog {
    fn get(&self, path: &str) -> FetchResult<Vec<u8>> {
        let url = self.url_for(path)?;
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, self.password.as_deref());
        }

        let resp = request.send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    resource: path.to_string(),
                }
            } else {
                FetchError::Transport {
                    resource: path.to_string(),
                    source: Box::new(e),
                }
            }
        })?;

        match resp.status() {
            StatusCode::OK => resp
                .bytes()
                .map(|b| b.to_vec())
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout {
                            resource: path.to_string(),
                        }
                    } else {
                        FetchError::Transport {
                            resource: path.to_string(),
                            source: Box::new(e),
                        }
                    }
                }),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                resource: path.to_string(),
                message: error_message(resp),
            }),
            StatusCode::NOT_IMPLEMENTED => Err(FetchError::NotImplemented {
                resource: path.to_string(),
            }),
            status => Err(FetchError::Status {
                resource: path.to_string(),
                status: status.as_u16(),
                message: error_message(resp),
            }),
        }
    }
}
