use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;

use super::StateMachine;
use crate::id::{ChannelId, SubscriptionId};
use crate::protocol::{Notification, RETRY_DELAY};
use crate::subscription::SubscriptionHandle;

/// Lifecycle of a subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Uninitialized,
    /// The first `CreateSubscriptionChannel` call is in flight.
    Creating,
    Active,
    /// The server forgot the channel and a replacement is being created. The wait loop keeps
    /// running on its own schedule meanwhile.
    Recovering,
}

/// Why a `WaitNotification` call did not produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFailure {
    /// Completed with the "channel invalid" exception.
    ChannelInvalid,
    /// Completed with the "notifications lost" exception.
    NotificationsLost,
    /// Never completed.
    Unreachable,
    /// Completed with any other error.
    Unrecognized,
}

/// The next `WaitNotification` call the driver must issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    pub last_notification_id: u64,
    /// Sleep this long before issuing the call.
    pub delay: Option<Duration>,
}

/// Decision core of a subscription channel.
///
/// Tracks the channel identifier, the ordered list of subscriptions, the server-id index used to
/// route notifications and the highest notification id seen. The driver issues exactly one wait
/// call per [`ChannelOutput::Wait`], so at most one is ever outstanding.
#[derive(Debug)]
pub struct ChannelMachine {
    phase: ChannelPhase,
    channel_id: Option<ChannelId>,
    announced: bool,
    listening: bool,
    last_notification_id: u64,
    subscriptions: Vec<SubscriptionHandle>,
    index: HashMap<SubscriptionId, SubscriptionHandle>,
    outputs: VecDeque<ChannelOutput>,
}

impl ChannelMachine {
    pub fn new() -> Self {
        Self {
            phase: ChannelPhase::Uninitialized,
            channel_id: None,
            announced: false,
            listening: false,
            last_notification_id: 0,
            subscriptions: Vec::new(),
            index: HashMap::new(),
            outputs: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase
    }

    pub fn channel_id(&self) -> Option<&ChannelId> {
        self.channel_id.as_ref()
    }

    pub fn last_notification_id(&self) -> u64 {
        self.last_notification_id
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Subscriptions in insertion order.
    pub fn subscriptions(&self) -> &[SubscriptionHandle] {
        &self.subscriptions
    }

    pub fn contains(&self, handle: &SubscriptionHandle) -> bool {
        self.subscriptions.contains(handle)
    }

    /// The subscription currently registered under `subscription_id`.
    pub fn lookup(&self, subscription_id: &SubscriptionId) -> Option<SubscriptionHandle> {
        self.index.get(subscription_id).copied()
    }

    fn create_started(&mut self) {
        self.phase = match self.phase {
            ChannelPhase::Uninitialized => ChannelPhase::Creating,
            ChannelPhase::Active => ChannelPhase::Recovering,
            phase => phase,
        };
    }

    fn created(&mut self, channel_id: ChannelId) {
        let recovering = self.phase == ChannelPhase::Recovering;
        self.phase = ChannelPhase::Active;
        self.channel_id = Some(channel_id.clone());

        if !self.announced {
            self.announced = true;
            self.outputs.push_back(ChannelOutput::Created(channel_id));
        }

        if recovering {
            // Ids from the forgotten channel are meaningless now
            self.index.clear();
            self.outputs
                .push_back(ChannelOutput::Reregister(self.subscriptions.clone()));
        }

        self.start_listening();
    }

    fn create_failed(&mut self) {
        self.phase = match self.phase {
            ChannelPhase::Creating => ChannelPhase::Uninitialized,
            ChannelPhase::Recovering => ChannelPhase::Active,
            phase => phase,
        };
    }

    fn subscription_added(&mut self, handle: SubscriptionHandle) {
        if !self.subscriptions.contains(&handle) {
            self.subscriptions.push(handle);
        }
        self.start_listening();
    }

    fn subscription_registered(&mut self, handle: SubscriptionHandle, id: SubscriptionId) {
        // A registration that lands after its subscription was removed must stay unroutable
        if !self.subscriptions.contains(&handle) {
            return;
        }
        self.index.retain(|_, indexed| *indexed != handle);
        self.index.insert(id, handle);
    }

    fn subscription_removed(&mut self, handle: SubscriptionHandle) {
        self.subscriptions.retain(|h| *h != handle);
        self.index.retain(|_, indexed| *indexed != handle);
    }

    fn start_listening(&mut self) {
        if self.listening || self.channel_id.is_none() || self.subscriptions.is_empty() {
            return;
        }
        self.listening = true;
        self.wait(None);
    }

    fn wait(&mut self, delay: Option<Duration>) {
        self.outputs.push_back(ChannelOutput::Wait(WaitRequest {
            last_notification_id: self.last_notification_id,
            delay,
        }));
    }

    fn wait_completed(&mut self, outcome: Result<Vec<Notification>, WaitFailure>) {
        match outcome {
            Ok(notifications) => {
                // Unroutable ids stay unacknowledged so a registration still in flight
                // gets them again on the next wait
                for notification in notifications {
                    if let Some(handle) = self.lookup(&notification.subscription_id) {
                        self.last_notification_id =
                            self.last_notification_id.max(notification.id);
                        self.outputs.push_back(ChannelOutput::Deliver {
                            handle,
                            value: notification.value,
                        });
                    }
                }
                self.wait(None);
            }
            Err(WaitFailure::ChannelInvalid) => {
                // One recreation at a time; retried waits that hit the stale id again only wait
                if self.phase == ChannelPhase::Active {
                    self.phase = ChannelPhase::Recovering;
                    self.outputs.push_back(ChannelOutput::Recreate);
                }
                self.wait(Some(RETRY_DELAY));
            }
            Err(WaitFailure::NotificationsLost) => {
                self.last_notification_id = 0;
                self.wait(None);
            }
            Err(WaitFailure::Unreachable) => self.wait(Some(RETRY_DELAY)),
            Err(WaitFailure::Unrecognized) => self.outputs.push_back(ChannelOutput::Halted),
        }
    }
}

impl Default for ChannelMachine {
    fn default() -> Self {
        Self::new()
    }
}

pub enum ChannelInput {
    /// A `CreateSubscriptionChannel` call was issued.
    CreateStarted,
    Created(ChannelId),
    CreateFailed,
    /// A subscription was appended to the channel; its registration is in flight.
    SubscriptionAdded(SubscriptionHandle),
    SubscriptionRegistered {
        handle: SubscriptionHandle,
        subscription_id: SubscriptionId,
    },
    SubscriptionRemoved(SubscriptionHandle),
    WaitCompleted(Result<Vec<Notification>, WaitFailure>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutput {
    /// The channel obtained its first identifier. Emitted once per channel lifetime.
    Created(ChannelId),
    /// Hand `value` to the change callback of `handle`.
    Deliver {
        handle: SubscriptionHandle,
        value: Value,
    },
    /// Issue the next wait call.
    Wait(WaitRequest),
    /// Obtain a fresh channel identifier.
    Recreate,
    /// Register these subscriptions again, in order, against the fresh identifier.
    Reregister(Vec<SubscriptionHandle>),
    /// The wait loop stops; nothing resumes it.
    Halted,
}

impl StateMachine for ChannelMachine {
    type Input = ChannelInput;
    type Output = ChannelOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            ChannelInput::CreateStarted => self.create_started(),
            ChannelInput::Created(channel_id) => self.created(channel_id),
            ChannelInput::CreateFailed => self.create_failed(),
            ChannelInput::SubscriptionAdded(handle) => self.subscription_added(handle),
            ChannelInput::SubscriptionRegistered {
                handle,
                subscription_id,
            } => self.subscription_registered(handle, subscription_id),
            ChannelInput::SubscriptionRemoved(handle) => self.subscription_removed(handle),
            ChannelInput::WaitCompleted(outcome) => self.wait_completed(outcome),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.outputs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(id: u64, subscription_id: &str, value: Value) -> Notification {
        Notification {
            id,
            subscription_id: SubscriptionId::from(subscription_id),
            value,
        }
    }

    fn wait(last_notification_id: u64, delay: Option<Duration>) -> ChannelOutput {
        ChannelOutput::Wait(WaitRequest {
            last_notification_id,
            delay,
        })
    }

    /// A machine with an active channel and one registered subscription, listening.
    fn active_machine() -> (ChannelMachine, SubscriptionHandle) {
        let mut machine = ChannelMachine::new();
        let handle = SubscriptionHandle::generate();

        machine.step(ChannelInput::CreateStarted);
        machine.step(ChannelInput::Created(ChannelId::from("c1")));
        let outputs = machine.step(ChannelInput::SubscriptionAdded(handle));
        assert_eq!(outputs, vec![wait(0, None)]);
        machine.step(ChannelInput::SubscriptionRegistered {
            handle,
            subscription_id: SubscriptionId::from("s1"),
        });

        (machine, handle)
    }

    #[test]
    fn test_creation_announced_once() {
        let mut machine = ChannelMachine::new();
        assert_eq!(machine.phase(), ChannelPhase::Uninitialized);

        machine.step(ChannelInput::CreateStarted);
        assert_eq!(machine.phase(), ChannelPhase::Creating);

        let outputs = machine.step(ChannelInput::Created(ChannelId::from("c1")));
        assert_eq!(outputs, vec![ChannelOutput::Created(ChannelId::from("c1"))]);
        assert_eq!(machine.phase(), ChannelPhase::Active);

        // A later recreation does not announce again
        machine.step(ChannelInput::CreateStarted);
        let outputs = machine.step(ChannelInput::Created(ChannelId::from("c2")));
        assert!(!outputs.iter().any(|o| matches!(o, ChannelOutput::Created(_))));
        assert_eq!(machine.channel_id(), Some(&ChannelId::from("c2")));
    }

    #[test]
    fn test_failed_creation_resets() {
        let mut machine = ChannelMachine::new();
        machine.step(ChannelInput::CreateStarted);
        machine.step(ChannelInput::CreateFailed);
        assert_eq!(machine.phase(), ChannelPhase::Uninitialized);
        assert!(machine.channel_id().is_none());
    }

    #[test]
    fn test_listening_starts_once() {
        let (mut machine, _) = active_machine();
        assert!(machine.is_listening());

        let outputs = machine.step(ChannelInput::SubscriptionAdded(SubscriptionHandle::generate()));
        assert!(outputs.is_empty());
        assert_eq!(machine.subscriptions().len(), 2);
    }

    #[test]
    fn test_no_listening_without_channel() {
        let mut machine = ChannelMachine::new();
        let handle = SubscriptionHandle::generate();

        assert!(machine.step(ChannelInput::SubscriptionAdded(handle)).is_empty());
        assert!(!machine.is_listening());

        // The loop starts as soon as the channel exists
        let outputs = machine.step(ChannelInput::Created(ChannelId::from("c1")));
        assert_eq!(
            outputs,
            vec![ChannelOutput::Created(ChannelId::from("c1")), wait(0, None)]
        );
    }

    #[test]
    fn test_delivery_and_monotonic_id() {
        let (mut machine, handle) = active_machine();

        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(vec![
            notification(5, "s1", json!(1)),
            notification(3, "s1", json!(2)),
        ])));
        assert_eq!(
            outputs,
            vec![
                ChannelOutput::Deliver { handle, value: json!(1) },
                ChannelOutput::Deliver { handle, value: json!(2) },
                wait(5, None),
            ]
        );
        assert_eq!(machine.last_notification_id(), 5);

        // Lower ids never move the counter back
        machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(4, "s1", json!(3))])));
        assert_eq!(machine.last_notification_id(), 5);

        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(Vec::new())));
        assert_eq!(outputs, vec![wait(5, None)]);
    }

    #[test]
    fn test_unknown_subscription_dropped() {
        let (mut machine, _) = active_machine();

        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(
            9,
            "other",
            json!(1),
        )])));
        assert_eq!(outputs, vec![wait(0, None)]);
        assert_eq!(machine.last_notification_id(), 0);
    }

    #[test]
    fn test_notification_before_registration_is_fetched_again() {
        let (mut machine, first) = active_machine();
        machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(2, "s1", json!(0))])));

        let pending = SubscriptionHandle::generate();
        machine.step(ChannelInput::SubscriptionAdded(pending));

        // The server already knows s2 but its registration reply has not landed yet
        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(
            3,
            "s2",
            json!(42),
        )])));
        assert_eq!(outputs, vec![wait(2, None)]);

        machine.step(ChannelInput::SubscriptionRegistered {
            handle: pending,
            subscription_id: SubscriptionId::from("s2"),
        });
        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(vec![
            notification(3, "s2", json!(42)),
            notification(4, "s1", json!(7)),
        ])));
        assert_eq!(
            outputs,
            vec![
                ChannelOutput::Deliver { handle: pending, value: json!(42) },
                ChannelOutput::Deliver { handle: first, value: json!(7) },
                wait(4, None),
            ]
        );
    }

    #[test]
    fn test_unregistered_subscription_not_indexed() {
        let (mut machine, _) = active_machine();
        let pending = SubscriptionHandle::generate();
        machine.step(ChannelInput::SubscriptionAdded(pending));

        // Registration has not completed: its future id routes nowhere
        assert!(machine.lookup(&SubscriptionId::from("s2")).is_none());

        machine.step(ChannelInput::SubscriptionRemoved(pending));
        machine.step(ChannelInput::SubscriptionRegistered {
            handle: pending,
            subscription_id: SubscriptionId::from("s2"),
        });
        assert!(machine.lookup(&SubscriptionId::from("s2")).is_none());
        assert!(!machine.contains(&pending));
    }

    #[test]
    fn test_removed_subscription_stops_routing() {
        let (mut machine, handle) = active_machine();
        machine.step(ChannelInput::SubscriptionRemoved(handle));

        let outputs = machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(
            1,
            "s1",
            json!(1),
        )])));
        assert_eq!(outputs, vec![wait(0, None)]);
        assert!(machine.subscriptions().is_empty());
    }

    #[test]
    fn test_notifications_lost_resets_id() {
        let (mut machine, _) = active_machine();
        machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(7, "s1", json!(1))])));

        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::NotificationsLost)));
        assert_eq!(outputs, vec![wait(0, None)]);
        assert_eq!(machine.last_notification_id(), 0);
    }

    #[test]
    fn test_unreachable_retries_after_delay() {
        let (mut machine, _) = active_machine();
        machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(7, "s1", json!(1))])));

        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::Unreachable)));
        assert_eq!(outputs, vec![wait(7, Some(RETRY_DELAY))]);
        assert_eq!(machine.phase(), ChannelPhase::Active);
    }

    #[test]
    fn test_unrecognized_failure_halts() {
        let (mut machine, _) = active_machine();

        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::Unrecognized)));
        assert_eq!(outputs, vec![ChannelOutput::Halted]);

        // Loop does not restart for new subscriptions
        let outputs = machine.step(ChannelInput::SubscriptionAdded(SubscriptionHandle::generate()));
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_channel_invalid_recovery() {
        let (mut machine, first) = active_machine();
        let second = SubscriptionHandle::generate();
        machine.step(ChannelInput::SubscriptionAdded(second));
        machine.step(ChannelInput::SubscriptionRegistered {
            handle: second,
            subscription_id: SubscriptionId::from("s2"),
        });
        machine.step(ChannelInput::WaitCompleted(Ok(vec![notification(4, "s1", json!(1))])));

        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::ChannelInvalid)));
        assert_eq!(
            outputs,
            vec![ChannelOutput::Recreate, wait(4, Some(RETRY_DELAY))]
        );
        assert_eq!(machine.phase(), ChannelPhase::Recovering);

        // The retried wait hits the stale channel again before recreation finished
        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::ChannelInvalid)));
        assert_eq!(outputs, vec![wait(4, Some(RETRY_DELAY))]);

        machine.step(ChannelInput::CreateStarted);
        let outputs = machine.step(ChannelInput::Created(ChannelId::from("c2")));
        assert_eq!(outputs, vec![ChannelOutput::Reregister(vec![first, second])]);
        assert_eq!(machine.phase(), ChannelPhase::Active);

        // Stale ids are gone until re-registration succeeds
        assert!(machine.lookup(&SubscriptionId::from("s1")).is_none());
        machine.step(ChannelInput::SubscriptionRegistered {
            handle: first,
            subscription_id: SubscriptionId::from("s3"),
        });
        assert_eq!(machine.lookup(&SubscriptionId::from("s3")), Some(first));
    }

    #[test]
    fn test_failed_recreation_allows_another_attempt() {
        let (mut machine, _) = active_machine();

        machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::ChannelInvalid)));
        machine.step(ChannelInput::CreateStarted);
        machine.step(ChannelInput::CreateFailed);
        assert_eq!(machine.phase(), ChannelPhase::Active);

        let outputs = machine.step(ChannelInput::WaitCompleted(Err(WaitFailure::ChannelInvalid)));
        assert_eq!(outputs[0], ChannelOutput::Recreate);
    }
}
