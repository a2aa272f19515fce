//! Subscription channel: the async driver around [`ChannelMachine`].
//!
//! The channel owns the [`Subscription`] objects and a single background task running the
//! notification wait loop. Every decision (where to route a notification, which id to resume
//! from, when to recreate the channel) is taken by the pure [`ChannelMachine`]; this module only
//! executes the resulting outputs against the transport.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::id::ChannelId;
use crate::protocol::{
    self, ARG_LAST_NOTIFICATION_ID, ARG_NOTIFICATION_QUEUE_SIZE, ARG_SUBSCRIPTION_CHANNEL,
    CREATE_SUBSCRIPTION_CHANNEL, WAIT_NOTIFICATION,
};
use crate::rpc::{ProtocolException, RpcClient, RpcError, RpcRequest, Transport};
use crate::state_machine::StateMachine;
use crate::state_machine::channel::{
    ChannelInput, ChannelMachine, ChannelOutput, ChannelPhase, WaitFailure, WaitRequest,
};
use crate::subscription::map::SubscriptionMap;
use crate::subscription::{OnChange, Subscription, SubscriptionHandle, SubscriptionOptions};

/// A server-side notification channel and the subscriptions registered on it.
///
/// The channel object lives as long as its client. When the server forgets the channel a new
/// identifier is obtained and every subscription is registered again, but the object itself is
/// reused.
pub struct SubscriptionChannel<T> {
    rpc: Arc<RpcClient<T>>,
    queue_size: usize,
    machine: Mutex<ChannelMachine>,
    subscriptions: SubscriptionMap,
    wait_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> SubscriptionChannel<T> {
    /// Create a channel that has not yet contacted the server.
    pub fn new(rpc: Arc<RpcClient<T>>, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            rpc,
            queue_size,
            machine: Mutex::new(ChannelMachine::new()),
            subscriptions: SubscriptionMap::new(),
            wait_task: Mutex::new(None),
        })
    }

    /// Obtain a channel identifier from the server.
    ///
    /// Called once to create the channel and again by recovery whenever the server forgets it.
    pub async fn register(self: &Arc<Self>) -> Result<ChannelId, RpcError> {
        self.apply(ChannelInput::CreateStarted);

        let request = RpcRequest::invoke(CREATE_SUBSCRIPTION_CHANNEL)
            .arg(ARG_NOTIFICATION_QUEUE_SIZE, self.queue_size);
        let result = self
            .rpc
            .invoke_request(request)
            .await
            .and_then(|value| ChannelId::from_value(&value.unwrap_or_default()));

        match result {
            Ok(channel_id) => {
                if let Some(start) = self.apply(ChannelInput::Created(channel_id.clone())) {
                    self.spawn_wait_loop(start);
                }
                Ok(channel_id)
            }
            Err(err) => {
                self.apply(ChannelInput::CreateFailed);
                Err(err)
            }
        }
    }

    /// Add a subscription for `path` and register it with the server.
    ///
    /// The subscription joins the channel before its registration completes, so it is part of
    /// any later recovery even when this registration fails.
    pub async fn register_subscription(
        self: &Arc<Self>,
        path: impl Into<String>,
        on_change: OnChange,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, RpcError> {
        let subscription = Arc::new(Subscription::new(path, on_change, options));
        let handle = subscription.handle();

        self.subscriptions
            .insert(Arc::clone(&subscription))
            .inspect_err(|err| warn!(error = %err, "Failed to track subscription"))?;
        if let Some(start) = self.apply(ChannelInput::SubscriptionAdded(handle)) {
            self.spawn_wait_loop(start);
        }

        let channel_id = self.channel_id().ok_or(RpcError::ChannelNotCreated)?;
        let subscription_id = subscription.register(&self.rpc, &channel_id).await?;
        self.apply(ChannelInput::SubscriptionRegistered {
            handle,
            subscription_id,
        });

        Ok(handle)
    }

    /// Remove a subscription from the channel and release it on the server.
    ///
    /// Returns `Ok(false)` without contacting the server when `handle` is not part of this
    /// channel. On failure the subscription stays in place.
    pub async fn unregister_subscription(
        self: &Arc<Self>,
        handle: SubscriptionHandle,
    ) -> Result<bool, RpcError> {
        let (known, channel_id) = {
            let machine = self.machine.lock().expect("channel machine lock poisoned");
            (machine.contains(&handle), machine.channel_id().cloned())
        };
        let subscription = self.subscriptions.get(&handle);

        let (true, Some(subscription)) = (known, subscription) else {
            debug!(handle = %handle, "Ignoring unregister of unknown subscription");
            return Ok(false);
        };

        if let Some(channel_id) = channel_id {
            subscription.unregister(&self.rpc, &channel_id).await?;
        }

        self.apply(ChannelInput::SubscriptionRemoved(handle));
        self.subscriptions.remove(&handle);
        info!(handle = %handle, path = %subscription.path(), "Subscription removed");
        Ok(true)
    }

    /// Stop the wait loop.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .wait_task
            .lock()
            .expect("wait task lock poisoned")
            .take()
        {
            task.abort();
            info!("Notification wait loop stopped");
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.machine
            .lock()
            .expect("channel machine lock poisoned")
            .channel_id()
            .cloned()
    }

    pub fn phase(&self) -> ChannelPhase {
        self.machine
            .lock()
            .expect("channel machine lock poisoned")
            .phase()
    }

    pub fn last_notification_id(&self) -> u64 {
        self.machine
            .lock()
            .expect("channel machine lock poisoned")
            .last_notification_id()
    }

    /// Handles of every subscription on the channel, in insertion order.
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.machine
            .lock()
            .expect("channel machine lock poisoned")
            .subscriptions()
            .to_vec()
    }

    pub fn subscription(&self, handle: &SubscriptionHandle) -> Option<Arc<Subscription>> {
        self.subscriptions.get(handle)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Feed `input` to the machine and execute its outputs.
    ///
    /// Returns the wait call to issue next, if the input produced one. The lock is released
    /// before any callback or task is started.
    fn apply(self: &Arc<Self>, input: ChannelInput) -> Option<WaitRequest> {
        let outputs = self
            .machine
            .lock()
            .expect("channel machine lock poisoned")
            .step(input);

        let mut next = None;
        for output in outputs {
            match output {
                ChannelOutput::Created(channel_id) => {
                    info!(channel_id = %channel_id, "Subscription channel created");
                }
                ChannelOutput::Deliver { handle, value } => self.deliver(&handle, value),
                ChannelOutput::Wait(request) => next = Some(request),
                ChannelOutput::Recreate => {
                    warn!("Server forgot the subscription channel, recreating");
                    let channel = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(err) = channel.register().await {
                            warn!(error = %err, "Failed to recreate subscription channel");
                        }
                    });
                }
                ChannelOutput::Reregister(handles) => {
                    let channel = Arc::clone(self);
                    tokio::spawn(async move { channel.reregister(handles).await });
                }
                ChannelOutput::Halted => {
                    warn!("Notification wait loop halted on an unrecognized failure");
                }
            }
        }
        next
    }

    fn deliver(&self, handle: &SubscriptionHandle, value: Value) {
        if let Some(subscription) = self.subscriptions.get(handle) {
            subscription.deliver(value);
        }
    }

    /// Register every subscription in `handles` against the current channel identifier.
    async fn reregister(self: Arc<Self>, handles: Vec<SubscriptionHandle>) {
        let Some(channel_id) = self.channel_id() else {
            return;
        };

        info!(
            channel_id = %channel_id,
            count = handles.len(),
            "Re-registering subscriptions"
        );

        let subscriptions: Vec<_> = handles
            .iter()
            .filter_map(|handle| self.subscriptions.get(handle))
            .collect();
        let results = join_all(
            subscriptions
                .iter()
                .map(|subscription| subscription.register(&self.rpc, &channel_id)),
        )
        .await;

        for (subscription, result) in subscriptions.iter().zip(results) {
            match result {
                Ok(subscription_id) => {
                    self.apply(ChannelInput::SubscriptionRegistered {
                        handle: subscription.handle(),
                        subscription_id,
                    });
                }
                Err(err) => warn!(
                    path = %subscription.path(),
                    error = %err,
                    "Failed to re-register subscription"
                ),
            }
        }
    }

    fn spawn_wait_loop(self: &Arc<Self>, start: WaitRequest) {
        let channel = Arc::clone(self);
        let task = tokio::spawn(async move { channel.run_wait_loop(start).await });

        let previous = self
            .wait_task
            .lock()
            .expect("wait task lock poisoned")
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn run_wait_loop(self: Arc<Self>, mut next: WaitRequest) {
        info!(last_notification_id = next.last_notification_id, "Notification wait loop started");

        loop {
            if let Some(delay) = next.delay {
                debug!(delay_secs = delay.as_secs(), "Delaying notification wait");
                tokio::time::sleep(delay).await;
            }

            let Some(channel_id) = self.channel_id() else {
                warn!("Notification wait loop has no channel identifier");
                return;
            };

            let outcome = self
                .wait_notification(&channel_id, next.last_notification_id)
                .await;
            match self.apply(ChannelInput::WaitCompleted(outcome)) {
                Some(request) => next = request,
                None => return,
            }
        }
    }

    async fn wait_notification(
        &self,
        channel_id: &ChannelId,
        last_notification_id: u64,
    ) -> Result<Vec<protocol::Notification>, WaitFailure> {
        let request = RpcRequest::invoke(WAIT_NOTIFICATION)
            .arg(ARG_SUBSCRIPTION_CHANNEL, channel_id)
            .arg(ARG_LAST_NOTIFICATION_ID, last_notification_id);

        let body = self.rpc.call_quiet(request).await.map_err(|err| {
            let failure = match &err {
                RpcError::Transport { .. } => WaitFailure::Unreachable,
                RpcError::Protocol {
                    kind: ProtocolException::ChannelInvalid,
                    ..
                } => WaitFailure::ChannelInvalid,
                RpcError::Protocol {
                    kind: ProtocolException::NotificationsLost,
                    ..
                } => WaitFailure::NotificationsLost,
                _ => WaitFailure::Unrecognized,
            };
            debug!(error = %err, failure = ?failure, "Notification wait failed");
            failure
        })?;

        protocol::decode_notifications(protocol::unwrap_value(body)).map_err(|err| {
            warn!(error = %err, "Undecodable notification batch");
            WaitFailure::Unrecognized
        })
    }
}
