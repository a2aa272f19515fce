use std::future::Future;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::rpc::config::{ClientConfig, Credentials};
use crate::rpc::error::RpcError;
use crate::rpc::{RpcRequest, Transport, Verb};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// [`Transport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the server described by `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, RpcError> {
        let base_url = Url::parse(&config.normalized_base_url())?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            credentials: config.credentials.clone(),
            timeout: config.timeout,
        })
    }

    /// Build the URL for a verb and object path.
    pub(crate) fn endpoint(&self, verb: Verb, path: &str) -> Result<Url, RpcError> {
        let relative = format!("{}{}", verb.as_str(), path);
        Ok(self.base_url.join(&relative)?)
    }

    async fn send(&self, request: RpcRequest) -> Result<Option<Value>, RpcError> {
        let url = self.endpoint(request.verb, &request.path)?;
        let path = request.path;

        let mut builder = match request.verb {
            Verb::Read | Verb::Meta => self.http.get(url),
            Verb::Write | Verb::Invoke => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(request.arguments.iter())
                    .finish();
                self.http
                    .post(url)
                    .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
                    .body(body)
            }
        };

        builder = builder.timeout(request.timeout.unwrap_or(self.timeout));
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let transport_failure = |err: reqwest::Error| RpcError::Transport {
            path: path.clone(),
            reason: err.to_string(),
        };

        let response = builder.send().await.map_err(transport_failure)?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        let body = response.text().await.map_err(transport_failure)?;

        debug!(path = %path, status = status.as_u16(), "Received RPC response");

        if !status.is_success() {
            return Err(RpcError::from_response(&path, status.as_u16(), is_json, &body));
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&body)?))
    }
}

impl Transport for HttpTransport {
    fn call(
        &self,
        request: RpcRequest,
    ) -> impl Future<Output = Result<Option<Value>, RpcError>> + Send {
        self.send(request)
    }
}
