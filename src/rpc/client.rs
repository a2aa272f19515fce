use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{self, ARG_VALUE};
use crate::rpc::error::{FailureClass, RpcError};
use crate::rpc::{Arguments, RpcRequest, Transport, Verb};

/// Callback notified of every failing call made through an [`RpcClient`].
pub type ErrorObserver = Arc<dyn Fn(FailureClass, &RpcError) + Send + Sync>;

/// Issues one-shot calls over a [`Transport`] and reports their failures.
///
/// The client handles:
/// - Applying the default timeout to requests that carry none
/// - Unwrapping response envelopes
/// - Fanning every failure out to the registered error observers
///
/// Nothing is retried. A failed call is reported once and returned to the caller.
pub struct RpcClient<T> {
    transport: T,
    timeout: Duration,
    observers: Mutex<Vec<ErrorObserver>>,
}

impl<T: Transport> RpcClient<T> {
    /// Create a new RPC client.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for every failed call.
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(FailureClass, &RpcError) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .expect("error observers lock poisoned")
            .push(Arc::new(observer));
    }

    /// Execute a request, reporting any failure to the error observers.
    pub async fn call(&self, request: RpcRequest) -> Result<Option<Value>, RpcError> {
        let path = request.path.clone();
        let result = self.call_quiet(request).await;
        if let Err(err) = &result {
            warn!(path = %path, class = %err.class(), error = %err, "RPC call failed");
            self.raise(err);
        }
        result
    }

    /// Execute a request without involving the error observers.
    ///
    /// Used by the notification wait loop, whose failures are handled by channel recovery.
    pub async fn call_quiet(&self, mut request: RpcRequest) -> Result<Option<Value>, RpcError> {
        if request.timeout.is_none() {
            request.timeout = Some(self.timeout);
        }

        debug!(verb = request.verb.as_str(), path = %request.path, "Issuing RPC call");
        self.transport.call(request).await
    }

    /// Read the value of a property.
    pub async fn read(&self, path: impl Into<String>) -> Result<Option<Value>, RpcError> {
        let body = self.call(RpcRequest::new(Verb::Read, path)).await?;
        Ok(protocol::unwrap_value(body))
    }

    /// Write the value of a property.
    pub async fn write(
        &self,
        path: impl Into<String>,
        value: impl ToString,
    ) -> Result<(), RpcError> {
        self.call(RpcRequest::new(Verb::Write, path).arg(ARG_VALUE, value))
            .await?;
        Ok(())
    }

    /// Fetch the metadata document describing an object.
    pub async fn meta(&self, path: impl Into<String>) -> Result<Option<Value>, RpcError> {
        self.call(RpcRequest::new(Verb::Meta, path)).await
    }

    /// Invoke a method with the given arguments.
    ///
    /// Returns `None` when the method produced no value.
    pub async fn invoke(
        &self,
        path: impl Into<String>,
        arguments: Arguments,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, RpcError> {
        let mut request = RpcRequest::invoke(path).with_arguments(arguments);
        request.timeout = timeout;
        self.invoke_request(request).await
    }

    /// Invoke a prepared request and unwrap its result.
    pub(crate) async fn invoke_request(
        &self,
        request: RpcRequest,
    ) -> Result<Option<Value>, RpcError> {
        let body = self.call(request).await?;
        Ok(protocol::unwrap_value(body))
    }

    fn raise(&self, err: &RpcError) {
        let observers = self
            .observers
            .lock()
            .expect("error observers lock poisoned")
            .clone();

        for observer in observers {
            observer(err.class(), err);
        }
    }

    /// Get the default timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
