use std::fmt;

use thiserror::Error;

use crate::protocol::{CHANNEL_INVALID_TAG, ErrorEnvelope, NOTIFICATIONS_LOST_TAG};
use crate::subscription::error::SubscriptionAlreadyPresent;

/// Named exceptions the subscription service raises that drive channel recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolException {
    /// The server has forgotten the subscription channel.
    ChannelInvalid,
    /// The server dropped notifications before the client could collect them.
    NotificationsLost,
}

impl ProtocolException {
    /// Map an exception type tag to a recognized exception.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            CHANNEL_INVALID_TAG => Some(Self::ChannelInvalid),
            NOTIFICATIONS_LOST_TAG => Some(Self::NotificationsLost),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::ChannelInvalid => CHANNEL_INVALID_TAG,
            Self::NotificationsLost => NOTIFICATIONS_LOST_TAG,
        }
    }
}

impl fmt::Display for ProtocolException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Coarse classification handed to error observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The request never completed.
    Transport,
    /// The request completed with a recognized named exception.
    Protocol,
    /// The request completed with any other error.
    Generic,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Protocol => f.write_str("protocol"),
            Self::Generic => f.write_str("generic"),
        }
    }
}

/// Errors that can occur while talking to the object tree server.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request never completed (connection refused, reset, timed out).
    #[error("request to '{path}' did not complete: {reason}")]
    Transport { path: String, reason: String },

    /// The server answered with a recognized named exception.
    #[error("server raised {kind} for '{path}': {message}")]
    Protocol {
        path: String,
        kind: ProtocolException,
        message: String,
    },

    /// The server answered with an error that carries no recognized exception.
    #[error("request to '{path}' failed with status {status}: {detail}")]
    Generic {
        path: String,
        status: u16,
        detail: String,
    },

    /// Failed to encode a request or decode a response body.
    #[error("JSON serialization error")]
    Serialization(#[from] serde_json::Error),

    /// The configured base URL or a derived endpoint is not a valid URL.
    #[error("invalid URL")]
    Url(#[from] url::ParseError),

    /// The server returned an identifier that is neither a string nor a number.
    #[error("unexpected identifier token: {0}")]
    UnexpectedToken(String),

    /// An operation needed a channel identifier before one was obtained.
    #[error("subscription channel has not been created")]
    ChannelNotCreated,

    /// A queued subscription request was dropped because channel creation failed.
    #[error("subscription channel bootstrap was abandoned")]
    BootstrapAbandoned,

    #[error(transparent)]
    SubscriptionAlreadyPresent(#[from] SubscriptionAlreadyPresent),
}

impl RpcError {
    /// Build the error for a completed response with a failing status.
    ///
    /// The body is only inspected for a named exception when the response declared a JSON
    /// content type.
    pub fn from_response(path: &str, status: u16, is_json: bool, body: &str) -> Self {
        let envelope = is_json
            .then(|| serde_json::from_str::<ErrorEnvelope>(body).ok())
            .flatten();

        match envelope {
            Some(envelope) => match ProtocolException::from_tag(&envelope.kind) {
                Some(kind) => Self::Protocol {
                    path: path.to_string(),
                    kind,
                    message: envelope.message.unwrap_or_default(),
                },
                None => Self::Generic {
                    path: path.to_string(),
                    status,
                    detail: match envelope.message {
                        Some(message) => format!("{}: {}", envelope.kind, message),
                        None => envelope.kind,
                    },
                },
            },
            None => Self::Generic {
                path: path.to_string(),
                status,
                detail: body.to_string(),
            },
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport { .. } => FailureClass::Transport,
            Self::Protocol { .. } => FailureClass::Protocol,
            _ => FailureClass::Generic,
        }
    }

    /// The named exception carried by this error, if any.
    pub fn exception(&self) -> Option<ProtocolException> {
        match self {
            Self::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
