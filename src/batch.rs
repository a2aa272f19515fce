//! Several one-shot calls packed into a single `MultiRequest` round trip.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::{ARG_REQUESTS, MULTI_REQUEST};
use crate::rpc::{RpcClient, RpcError, RpcRequest, Transport};

/// Callback receiving the result of one batched request.
pub type BatchCallback = Box<dyn Fn(Value) + Send + Sync>;

/// The operation a batched request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchAction {
    Read,
    Write,
    Meta,
    Invoke,
}

/// One request within a batch.
///
/// The identifier is chosen by the caller and echoed back by the server next to the result. It
/// should be unique within the batch. When it is not, the last request with a given identifier
/// receives every result carrying it.
pub struct BatchRequest {
    pub id: Value,
    pub action: BatchAction,
    pub path: String,
    pub value: Option<Value>,
    pub arguments: Option<Map<String, Value>>,
    callback: Option<BatchCallback>,
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("path", &self.path)
            .field("value", &self.value)
            .field("arguments", &self.arguments)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl BatchRequest {
    fn new(id: impl Into<Value>, action: BatchAction, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action,
            path: path.into(),
            value: None,
            arguments: None,
            callback: None,
        }
    }

    pub fn read(id: impl Into<Value>, path: impl Into<String>) -> Self {
        Self::new(id, BatchAction::Read, path)
    }

    pub fn write(id: impl Into<Value>, path: impl Into<String>, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new(id, BatchAction::Write, path)
        }
    }

    pub fn meta(id: impl Into<Value>, path: impl Into<String>) -> Self {
        Self::new(id, BatchAction::Meta, path)
    }

    pub fn invoke(
        id: impl Into<Value>,
        path: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            arguments: Some(arguments),
            ..Self::new(id, BatchAction::Invoke, path)
        }
    }

    /// Call `callback` with the result of every response entry carrying this request's id.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireBatchRequest<'a> {
    id: &'a Value,
    action: BatchAction,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a Map<String, Value>>,
}

impl<'a> From<&'a BatchRequest> for WireBatchRequest<'a> {
    fn from(request: &'a BatchRequest) -> Self {
        Self {
            id: &request.id,
            action: request.action,
            path: &request.path,
            value: request.value.as_ref(),
            arguments: request.arguments.as_ref(),
        }
    }
}

/// Key under which an identifier is correlated; JSON text keeps `1` and `"1"` apart.
fn correlation_key(id: &Value) -> String {
    id.to_string()
}

impl<T: Transport> RpcClient<T> {
    /// Execute every request in one `MultiRequest` call.
    ///
    /// Each response entry's `Result` is handed to the callback of the request whose id matches
    /// the entry's `Id`, whatever the order the server answered in. Entries with an unknown or
    /// missing id are skipped. The response sequence is returned exactly as the server sent it.
    pub async fn multi_request(&self, requests: Vec<BatchRequest>) -> Result<Vec<Value>, RpcError> {
        let wire: Vec<WireBatchRequest<'_>> = requests.iter().map(Into::into).collect();
        let encoded = serde_json::to_string(&wire)?;

        debug!(count = requests.len(), "Issuing batched request");
        let result = self
            .invoke_request(RpcRequest::invoke(MULTI_REQUEST).arg(ARG_REQUESTS, encoded))
            .await?;
        let responses: Vec<Value> =
            serde_json::from_value(result.unwrap_or_else(|| Value::Array(Vec::new())))?;

        let callbacks: HashMap<String, Option<BatchCallback>> = requests
            .into_iter()
            .map(|request| (correlation_key(&request.id), request.callback))
            .collect();

        for response in &responses {
            let callback = response
                .get("Id")
                .and_then(|id| callbacks.get(&correlation_key(id)))
                .and_then(Option::as_ref);
            match callback {
                Some(callback) => callback(response.get("Result").cloned().unwrap_or_default()),
                None => debug!(id = ?response.get("Id"), "No callback for batched result"),
            }
        }

        Ok(responses)
    }
}
