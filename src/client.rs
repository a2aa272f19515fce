use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OnceCell, oneshot};
use tracing::{debug, info};

use crate::batch::BatchRequest;
use crate::channel::SubscriptionChannel;
use crate::id::ChannelId;
use crate::rpc::{
    Arguments, ClientConfig, FailureClass, HttpTransport, RpcClient, RpcError, Transport,
};
use crate::state_machine::StateMachine;
use crate::state_machine::bootstrap::{BootstrapInput, BootstrapMachine, BootstrapOutput};
use crate::subscription::{OnChange, SubscriptionHandle, SubscriptionOptions};

/// A subscription request waiting for the client's channel.
struct PendingRegistration {
    path: String,
    on_change: OnChange,
    options: SubscriptionOptions,
    reply: oneshot::Sender<Result<SubscriptionHandle, RpcError>>,
}

impl PendingRegistration {
    /// Register on `channel` and hand the outcome to whoever is waiting for it.
    async fn complete<T: Transport>(self, channel: Arc<SubscriptionChannel<T>>) {
        let result = channel
            .register_subscription(self.path, self.on_change, self.options)
            .await;
        // The requester may have stopped waiting
        let _ = self.reply.send(result);
    }
}

/// Client for a remote object tree.
///
/// Forwards one-shot calls to the transport and manages a single subscription channel, created
/// lazily by the first [`on_change`](Self::on_change) or
/// [`create_subscription_channel`](Self::create_subscription_channel) call.
///
/// # Example
///
/// ```ignore
/// use treewatch::{Client, ClientConfig, SubscriptionOptions};
///
/// let client = Client::http(ClientConfig::builder().base_url("http://localhost/woopsa").build())?;
///
/// let temperature = client.read("/Sensors/Temperature").await?;
///
/// let handle = client
///     .on_change("/Sensors/Temperature", |value| println!("{value}"), SubscriptionOptions::default())
///     .await?;
///
/// client.unsubscribe(handle).await?;
/// ```
pub struct Client<T = HttpTransport> {
    rpc: Arc<RpcClient<T>>,
    config: ClientConfig,
    channel: Arc<OnceCell<Arc<SubscriptionChannel<T>>>>,
    bootstrap: Arc<Mutex<BootstrapMachine<PendingRegistration>>>,
}

impl Client<HttpTransport> {
    /// Create a client talking HTTP to the server described by `config`.
    pub fn http(config: ClientConfig) -> Result<Self, RpcError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            rpc: Arc::new(RpcClient::new(transport, config.timeout)),
            config,
            channel: Arc::new(OnceCell::new()),
            bootstrap: Arc::new(Mutex::new(BootstrapMachine::new())),
        }
    }

    /// Read the value of a property.
    pub async fn read(&self, path: impl Into<String>) -> Result<Option<Value>, RpcError> {
        self.rpc.read(path).await
    }

    /// Write the value of a property.
    pub async fn write(&self, path: impl Into<String>, value: impl ToString) -> Result<(), RpcError> {
        self.rpc.write(path, value).await
    }

    /// Fetch the metadata of an object.
    pub async fn meta(&self, path: impl Into<String>) -> Result<Option<Value>, RpcError> {
        self.rpc.meta(path).await
    }

    /// Invoke a method. `timeout` defaults to the configured client timeout.
    pub async fn invoke(
        &self,
        path: impl Into<String>,
        arguments: Arguments,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, RpcError> {
        self.rpc.invoke(path, arguments, timeout).await
    }

    /// Execute several calls in one round trip. See [`RpcClient::multi_request`].
    pub async fn multi_request(&self, requests: Vec<BatchRequest>) -> Result<Vec<Value>, RpcError> {
        self.rpc.multi_request(requests).await
    }

    /// Register an observer for every failed call other than notification waits.
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(FailureClass, &RpcError) + Send + Sync + 'static,
    {
        self.rpc.on_error(observer);
    }

    /// Get the client's subscription channel, creating it on first use.
    ///
    /// Concurrent and repeated calls share a single `CreateSubscriptionChannel` call; once the
    /// channel exists its identifier is returned without contacting the server. A failed creation
    /// is not cached and the next call tries again.
    pub async fn create_subscription_channel(
        &self,
        queue_size: usize,
    ) -> Result<ChannelId, RpcError> {
        let channel = ensure_channel(&self.rpc, &self.channel, queue_size).await?;
        channel.channel_id().ok_or(RpcError::ChannelNotCreated)
    }

    /// Watch `path` and call `on_change` with every new value.
    ///
    /// The first call creates the subscription channel. Calls made while that creation is in
    /// flight are queued and registered once it completes. Creation runs on its own task, so
    /// dropping the first caller does not strand the queue.
    pub async fn on_change<F>(
        &self,
        path: impl Into<String>,
        on_change: F,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, RpcError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let registration = PendingRegistration {
            path: path.into(),
            on_change: Arc::new(on_change),
            options,
            reply,
        };

        let outputs = self
            .bootstrap
            .lock()
            .expect("bootstrap machine lock poisoned")
            .step(BootstrapInput::Request(registration));

        if outputs.is_empty() {
            debug!("Subscription request queued behind channel creation");
        }

        for output in outputs {
            match output {
                BootstrapOutput::Bootstrap(registration) => {
                    let bootstrap = Bootstrap {
                        rpc: Arc::clone(&self.rpc),
                        channel: Arc::clone(&self.channel),
                        machine: Arc::clone(&self.bootstrap),
                        queue_size: self.config.notification_queue_size,
                    };
                    tokio::spawn(bootstrap.run(registration));
                }
                BootstrapOutput::Register(registration) => match self.channel.get() {
                    Some(channel) => registration.complete(Arc::clone(channel)).await,
                    None => {
                        let _ = registration.reply.send(Err(RpcError::ChannelNotCreated));
                    }
                },
                // Only produced by bootstrap completion
                BootstrapOutput::Drain(_) | BootstrapOutput::Abandon(_) => {}
            }
        }

        receiver.await.map_err(|_| RpcError::BootstrapAbandoned)?
    }

    /// Stop watching a subscription. Returns `Ok(false)` if the handle is unknown.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<bool, RpcError> {
        match self.channel.get() {
            Some(channel) => channel.unregister_subscription(handle).await,
            None => Ok(false),
        }
    }

    /// The subscription channel, if it was created.
    pub fn subscription_channel(&self) -> Option<&Arc<SubscriptionChannel<T>>> {
        self.channel.get()
    }

    /// Stop the notification wait loop.
    pub fn shutdown(&self) {
        if let Some(channel) = self.channel.get() {
            channel.shutdown();
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rpc(&self) -> &RpcClient<T> {
        &self.rpc
    }
}

/// Return the channel in `cell`, creating and registering it if absent.
async fn ensure_channel<T: Transport>(
    rpc: &Arc<RpcClient<T>>,
    cell: &OnceCell<Arc<SubscriptionChannel<T>>>,
    queue_size: usize,
) -> Result<Arc<SubscriptionChannel<T>>, RpcError> {
    let channel = cell
        .get_or_try_init(|| async {
            let channel = SubscriptionChannel::new(Arc::clone(rpc), queue_size);
            channel.register().await?;
            Ok::<_, RpcError>(channel)
        })
        .await?;
    Ok(Arc::clone(channel))
}

/// Everything the channel bootstrap task needs, detached from the client's lifetime.
struct Bootstrap<T> {
    rpc: Arc<RpcClient<T>>,
    channel: Arc<OnceCell<Arc<SubscriptionChannel<T>>>>,
    machine: Arc<Mutex<BootstrapMachine<PendingRegistration>>>,
    queue_size: usize,
}

impl<T: Transport> Bootstrap<T> {
    /// Create the channel for `first`, then release every request queued meanwhile.
    async fn run(self, first: PendingRegistration) {
        info!(path = %first.path, "Bootstrapping subscription channel");

        match ensure_channel(&self.rpc, &self.channel, self.queue_size).await {
            Ok(channel) => {
                let drained = self
                    .machine
                    .lock()
                    .expect("bootstrap machine lock poisoned")
                    .step(BootstrapInput::Completed);

                // Queued requests must not depend on the first caller staying around
                tokio::spawn(first.complete(Arc::clone(&channel)));
                for output in drained {
                    if let BootstrapOutput::Drain(registration) = output {
                        tokio::spawn(registration.complete(Arc::clone(&channel)));
                    }
                }
            }
            Err(err) => {
                let abandoned = self
                    .machine
                    .lock()
                    .expect("bootstrap machine lock poisoned")
                    .step(BootstrapInput::Failed);
                info!(
                    abandoned = abandoned.len(),
                    "Subscription channel bootstrap failed"
                );
                // Dropping the queued entries wakes their requesters with an error
                drop(abandoned);
                let _ = first.reply.send(Err(err));
            }
        }
    }
}
