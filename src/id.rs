use std::fmt::Display;

use serde_json::Value;

use crate::rpc::RpcError;

/// Decode an opaque server token from its wire representation.
///
/// Servers hand out identifiers either as JSON strings or numbers. Both are kept as strings
/// since they are only ever echoed back verbatim.
fn token_from_value(value: &Value) -> Result<String, RpcError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RpcError::UnexpectedToken(other.to_string())),
    }
}

/// An identifier for a server-side subscription channel.
///
/// Assigned by the server on `CreateSubscriptionChannel` and replaced whenever the server
/// forgets the channel.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a new [`ChannelId`] from any type that can be converted into a `String`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Decode a [`ChannelId`] from the value returned by the server.
    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        token_from_value(value).map(Self)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// An identifier for one registered subscription, scoped to the channel it was registered on.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        token_from_value(value).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}
