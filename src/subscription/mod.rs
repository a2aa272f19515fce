pub mod error;
pub mod map;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bon::Builder;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::id::{ChannelId, SubscriptionId};
use crate::protocol::{
    self, ARG_MONITOR_INTERVAL, ARG_PROPERTY_LINK, ARG_PUBLISH_INTERVAL,
    ARG_SUBSCRIPTION_CHANNEL, ARG_SUBSCRIPTION_ID, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_PUBLISH_INTERVAL, REGISTER_SUBSCRIPTION, UNREGISTER_SUBSCRIPTION,
};
use crate::rpc::{RpcClient, RpcError, RpcRequest, Transport};

/// Callback receiving each new value of a watched path.
pub type OnChange = Arc<dyn Fn(Value) + Send + Sync>;

/// Stable client-side handle of a subscription.
///
/// Unlike the server-assigned [`SubscriptionId`], a handle never changes across channel recovery.
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionHandle({})", self.0)
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side sampling parameters of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct SubscriptionOptions {
    /// How often the server samples the watched value.
    #[builder(default = DEFAULT_MONITOR_INTERVAL)]
    pub monitor_interval: Duration,

    /// Minimum period between two notification batches.
    #[builder(default = DEFAULT_PUBLISH_INTERVAL)]
    pub publish_interval: Duration,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Interest in the value changes of one path, registered on a subscription channel.
pub struct Subscription {
    handle: SubscriptionHandle,
    path: String,
    options: SubscriptionOptions,
    on_change: OnChange,
    subscription_id: Mutex<Option<SubscriptionId>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("subscription_id", &self.subscription_id())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(path: impl Into<String>, on_change: OnChange, options: SubscriptionOptions) -> Self {
        Self {
            handle: SubscriptionHandle::generate(),
            path: path.into(),
            options,
            on_change,
            subscription_id: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.options
    }

    /// The identifier of the latest successful registration.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription_id
            .lock()
            .expect("subscription id lock poisoned")
            .clone()
    }

    /// Register this subscription on `channel_id`, replacing any previous identifier.
    pub async fn register<T: Transport>(
        &self,
        rpc: &RpcClient<T>,
        channel_id: &ChannelId,
    ) -> Result<SubscriptionId, RpcError> {
        let request = RpcRequest::invoke(REGISTER_SUBSCRIPTION)
            .arg(ARG_SUBSCRIPTION_CHANNEL, channel_id)
            .arg(ARG_PROPERTY_LINK, &self.path)
            .arg(ARG_MONITOR_INTERVAL, protocol::format_interval(self.options.monitor_interval))
            .arg(ARG_PUBLISH_INTERVAL, protocol::format_interval(self.options.publish_interval));

        let result = rpc.invoke_request(request).await?;
        let subscription_id = SubscriptionId::from_value(&result.unwrap_or_default())?;

        debug!(
            path = %self.path,
            channel_id = %channel_id,
            subscription_id = %subscription_id,
            "Subscription registered"
        );

        *self
            .subscription_id
            .lock()
            .expect("subscription id lock poisoned") = Some(subscription_id.clone());
        Ok(subscription_id)
    }

    /// Release the server-side registration.
    ///
    /// Returns `Ok(false)` without a remote call when the subscription never registered.
    pub async fn unregister<T: Transport>(
        &self,
        rpc: &RpcClient<T>,
        channel_id: &ChannelId,
    ) -> Result<bool, RpcError> {
        let Some(subscription_id) = self.subscription_id() else {
            return Ok(false);
        };

        let request = RpcRequest::invoke(UNREGISTER_SUBSCRIPTION)
            .arg(ARG_SUBSCRIPTION_CHANNEL, channel_id)
            .arg(ARG_SUBSCRIPTION_ID, &subscription_id);
        rpc.invoke_request(request).await?;

        debug!(path = %self.path, subscription_id = %subscription_id, "Subscription unregistered");
        Ok(true)
    }

    /// Hand a new value to the change callback.
    pub fn deliver(&self, value: Value) {
        (self.on_change)(value);
    }
}
