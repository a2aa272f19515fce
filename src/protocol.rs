//! Wire-level constants and envelopes of the subscription service.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::id::SubscriptionId;
use crate::rpc::RpcError;

pub const CREATE_SUBSCRIPTION_CHANNEL: &str = "/SubscriptionService/CreateSubscriptionChannel";
pub const REGISTER_SUBSCRIPTION: &str = "/SubscriptionService/RegisterSubscription";
pub const UNREGISTER_SUBSCRIPTION: &str = "/SubscriptionService/UnregisterSubscription";
pub const WAIT_NOTIFICATION: &str = "/SubscriptionService/WaitNotification";
pub const MULTI_REQUEST: &str = "/MultiRequest";

pub const ARG_NOTIFICATION_QUEUE_SIZE: &str = "NotificationQueueSize";
pub const ARG_SUBSCRIPTION_CHANNEL: &str = "SubscriptionChannel";
pub const ARG_PROPERTY_LINK: &str = "PropertyLink";
pub const ARG_MONITOR_INTERVAL: &str = "MonitorInterval";
pub const ARG_PUBLISH_INTERVAL: &str = "PublishInterval";
pub const ARG_SUBSCRIPTION_ID: &str = "SubscriptionId";
pub const ARG_LAST_NOTIFICATION_ID: &str = "LastNotificationId";
pub const ARG_REQUESTS: &str = "Requests";
pub const ARG_VALUE: &str = "value";

/// Exception tag raised when the server no longer knows the channel.
pub const CHANNEL_INVALID_TAG: &str = "WoopsaInvalidSubscriptionChannelException";
/// Exception tag raised when the server dropped notifications the client has not seen.
pub const NOTIFICATIONS_LOST_TAG: &str = "WoopsaNotificationsLostException";

pub const DEFAULT_NOTIFICATION_QUEUE_SIZE: usize = 200;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay before the wait loop resumes after a lost channel or an unreachable server.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Error body sent alongside a failing status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// A server-produced change record for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub subscription_id: SubscriptionId,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireNotification {
    id: u64,
    subscription_id: Value,
    #[serde(default)]
    value: Option<Value>,
}

/// Extract the `Value` member of a response body.
///
/// Missing bodies and bodies without the member both produce `None`.
pub fn unwrap_value(body: Option<Value>) -> Option<Value> {
    match body? {
        Value::Object(mut map) => map.remove("Value"),
        _ => None,
    }
}

/// Decode the result of a `WaitNotification` call.
pub fn decode_notifications(result: Option<Value>) -> Result<Vec<Notification>, RpcError> {
    let Some(result) = result else {
        return Ok(Vec::new());
    };

    let wire: Vec<WireNotification> = serde_json::from_value(result)?;
    wire.into_iter()
        .map(|n| {
            Ok(Notification {
                id: n.id,
                subscription_id: SubscriptionId::from_value(&n.subscription_id)?,
                value: unwrap_value(n.value).unwrap_or(Value::Null),
            })
        })
        .collect()
}

/// Render an interval the way the server expects it: fractional seconds.
pub fn format_interval(interval: Duration) -> String {
    interval.as_secs_f64().to_string()
}
