//! Webhook URL allow-listing.

use url::Url;

use super::WebhookError;
use crate::config::WebhookConfig;

/// Which provider URLs may be called.
#[derive(Debug, Clone)]
pub struct WebhookPolicy {
    allowed_hosts: Vec<String>,
    path_prefix: String,
    allow_insecure: bool,
}

impl WebhookPolicy {
    pub fn new<I, H>(allowed_hosts: I, path_prefix: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
            path_prefix: path_prefix.into(),
            allow_insecure: false,
        }
    }

    /// Also accept `http` URLs.
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.allowed_hosts.iter().cloned(), config.path_prefix.clone())
            .allow_insecure(config.allow_insecure)
    }

    /// Parse `raw` and check it against the allow-list.
    pub fn validate(&self, raw: &str) -> Result<Url, WebhookError> {
        let url = Url::parse(raw)?;

        let scheme_ok = match url.scheme() {
            "https" => true,
            "http" => self.allow_insecure,
            _ => false,
        };
        if !scheme_ok {
            return Err(WebhookError::InvalidScheme(url.scheme().to_string()));
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.allowed_hosts.iter().any(|allowed| *allowed == host) {
            return Err(WebhookError::HostNotAllowed(host));
        }

        if !url.path().starts_with(&self.path_prefix) {
            return Err(WebhookError::InvalidPath {
                path: url.path().to_string(),
                prefix: self.path_prefix.clone(),
            });
        }

        Ok(url)
    }
}
