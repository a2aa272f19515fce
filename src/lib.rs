//! Client for watching values on a remote object tree.
//!
//! A [`Client`] issues one-shot reads, writes, meta queries and method invocations over HTTP.
//! Watching a path registers a subscription on a server-side subscription channel; a single
//! long-poll loop waits for notifications on that channel and routes each one to the
//! subscription's change callback. The loop recovers on its own when the server forgets the
//! channel, drops notifications, or stops answering.

pub mod batch;
pub mod channel;
pub mod client;
pub mod id;
pub mod protocol;
pub mod rpc;
pub mod state_machine;
pub mod subscription;

pub use batch::{BatchAction, BatchCallback, BatchRequest};
pub use channel::SubscriptionChannel;
pub use client::Client;
pub use id::{ChannelId, SubscriptionId};
pub use rpc::{
    ClientConfig, Credentials, FailureClass, HttpTransport, ProtocolException, RpcClient,
    RpcError, RpcRequest, Transport, Verb,
};
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionOptions};
