//! # rpc
//!
//! Request/response plumbing shared by every higher layer.
//!
//! A [`Transport`] executes one [`RpcRequest`] and resolves to the decoded response body.
//! [`RpcClient`] sits on top of it and adds the one-shot call surface (`read`, `write`, `meta`,
//! `invoke`, `multi_request`) together with the error observers every failing call is reported
//! to.
//!
//! ## Endpoints
//!
//! Requests are addressed as `{base_url}{verb}{path}`:
//! - `GET  {base}read/Sensors/Temperature`
//! - `POST {base}write/Sensors/Setpoint` with form `value=...`
//! - `GET  {base}meta/Sensors`
//! - `POST {base}invoke/SubscriptionService/WaitNotification` with form arguments

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

mod client;
mod config;
mod error;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use client::{ErrorObserver, RpcClient};
pub use config::{ClientConfig, Credentials};
pub use error::{FailureClass, ProtocolException, RpcError};
pub use http::HttpTransport;

/// Form arguments of a request, kept ordered so requests are reproducible.
pub type Arguments = BTreeMap<String, String>;

/// The kind of remote operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Read,
    Write,
    Meta,
    Invoke,
}

impl Verb {
    /// URL segment for this verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Meta => "meta",
            Self::Invoke => "invoke",
        }
    }
}

/// One remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub verb: Verb,
    /// Object tree path, always starting with `/`.
    pub path: String,
    pub arguments: Arguments,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

impl RpcRequest {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Self {
            verb,
            path,
            arguments: Arguments::new(),
            timeout: None,
        }
    }

    pub fn invoke(path: impl Into<String>) -> Self {
        Self::new(Verb::Invoke, path)
    }

    /// Add a form argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.arguments.insert(name.into(), value.to_string());
        self
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments.extend(arguments);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The argument value for `name`, if present.
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }
}

/// Executes requests against the server.
///
/// Implementations perform no retries. A resolved `Ok(None)` means the server answered with an
/// empty body.
pub trait Transport: Send + Sync + 'static {
    fn call(
        &self,
        request: RpcRequest,
    ) -> impl Future<Output = Result<Option<Value>, RpcError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn call(
        &self,
        request: RpcRequest,
    ) -> impl Future<Output = Result<Option<Value>, RpcError>> + Send {
        T::call(self, request)
    }
}
