//! Scripted in-memory server used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::protocol::{CREATE_SUBSCRIPTION_CHANNEL, REGISTER_SUBSCRIPTION, WAIT_NOTIFICATION};
use crate::rpc::{ProtocolException, RpcError, RpcRequest, Transport};

pub(crate) type ReplyResult = Result<Option<Value>, RpcError>;

pub(crate) enum Reply {
    Ready(ReplyResult),
    /// Resolves once the paired sender fires. Never resolves if the sender is dropped.
    Deferred(oneshot::Receiver<ReplyResult>),
    Hang,
}

impl Reply {
    pub(crate) fn body(body: Value) -> Self {
        Self::Ready(Ok(Some(body)))
    }

    pub(crate) fn value(value: Value) -> Self {
        Self::body(json!({ "Value": value }))
    }

    pub(crate) fn unreachable() -> Self {
        Self::Ready(Err(unreachable_error()))
    }

    pub(crate) fn generic(status: u16) -> Self {
        Self::Ready(Err(RpcError::Generic {
            path: "/mock".to_string(),
            status,
            detail: "scripted failure".to_string(),
        }))
    }

    pub(crate) fn exception(kind: ProtocolException) -> Self {
        Self::Ready(Err(exception_error(kind)))
    }
}

pub(crate) fn unreachable_error() -> RpcError {
    RpcError::Transport {
        path: "/mock".to_string(),
        reason: "connection refused".to_string(),
    }
}

pub(crate) fn exception_error(kind: ProtocolException) -> RpcError {
    let body = json!({ "Type": kind.tag(), "Message": "scripted" }).to_string();
    RpcError::from_response(WAIT_NOTIFICATION, 500, true, &body)
}

/// Notification batch body as the server sends it.
pub(crate) fn notifications(entries: &[(u64, &str, Value)]) -> ReplyResult {
    let entries: Vec<Value> = entries
        .iter()
        .map(|(id, subscription_id, value)| {
            json!({
                "Id": id,
                "SubscriptionId": subscription_id,
                "Value": { "Value": value },
            })
        })
        .collect();
    Ok(Some(json!({ "Value": entries })))
}

/// Records every request and answers from per-path scripts.
///
/// Unscripted requests fall back to a well-behaved server: channels are numbered
/// `channel-1, channel-2, ...`, subscriptions `subscription-1, subscription-2, ...`,
/// notification waits never complete and everything else answers with an empty body.
#[derive(Default)]
pub(crate) struct MockTransport {
    calls: Mutex<Vec<RpcRequest>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    channels: AtomicU64,
    subscriptions: AtomicU64,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered call to `path`.
    pub(crate) fn script(&self, path: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a reply for `path` that the test completes later.
    pub(crate) fn defer(&self, path: &str) -> oneshot::Sender<ReplyResult> {
        let (sender, receiver) = oneshot::channel();
        self.script(path, Reply::Deferred(receiver));
        sender
    }

    pub(crate) fn calls(&self) -> Vec<RpcRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<RpcRequest> {
        self.calls()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }

    fn respond(&self, request: &RpcRequest) -> Reply {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = scripted {
            return reply;
        }

        match request.path.as_str() {
            CREATE_SUBSCRIPTION_CHANNEL => {
                let n = self.channels.fetch_add(1, Ordering::SeqCst) + 1;
                Reply::value(json!(format!("channel-{n}")))
            }
            REGISTER_SUBSCRIPTION => {
                let n = self.subscriptions.fetch_add(1, Ordering::SeqCst) + 1;
                Reply::value(json!(format!("subscription-{n}")))
            }
            WAIT_NOTIFICATION => Reply::Hang,
            _ => Reply::Ready(Ok(None)),
        }
    }
}

impl Transport for MockTransport {
    fn call(&self, request: RpcRequest) -> impl Future<Output = ReplyResult> + Send {
        let reply = self.respond(&request);
        self.calls.lock().unwrap().push(request);

        async move {
            match reply {
                Reply::Ready(result) => result,
                Reply::Deferred(receiver) => match receiver.await {
                    Ok(result) => result,
                    Err(_) => std::future::pending().await,
                },
                Reply::Hang => std::future::pending().await,
            }
        }
    }
}
