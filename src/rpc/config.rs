use std::time::Duration;

use bon::Builder;

use crate::protocol::{DEFAULT_NOTIFICATION_QUEUE_SIZE, DEFAULT_TIMEOUT};

/// Username/password pair sent as a Basic authorization header on every request.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the client.
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Root URL of the server (e.g., "http://localhost/woopsa").
    /// A trailing `/` is added when missing.
    #[builder(into)]
    pub base_url: String,

    /// Optional credentials attached to every outgoing request.
    pub credentials: Option<Credentials>,

    /// Timeout applied to every call that does not carry its own.
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Queue size requested when the client bootstraps its subscription channel.
    #[builder(default = DEFAULT_NOTIFICATION_QUEUE_SIZE)]
    pub notification_queue_size: usize,
}

impl ClientConfig {
    /// The base URL with exactly one trailing `/`.
    pub(crate) fn normalized_base_url(&self) -> String {
        if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::builder().base_url("http://localhost/woopsa").build();

        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.notification_queue_size, 200);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_base_url_normalization() {
        let config = ClientConfig::builder().base_url("http://localhost/woopsa").build();
        assert_eq!(config.normalized_base_url(), "http://localhost/woopsa/");

        let config = ClientConfig::builder().base_url("http://localhost/woopsa/").build();
        assert_eq!(config.normalized_base_url(), "http://localhost/woopsa/");
    }

    #[test]
    fn test_credentials_redacted_in_debug() {
        let credentials = Credentials::new("admin", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
