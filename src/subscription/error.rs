use super::SubscriptionHandle;

/// Indicates that a subscription could not be tracked because its handle is already in use.
#[derive(Debug, thiserror::Error)]
#[error("the subscription handle ({handle}) is already present")]
pub struct SubscriptionAlreadyPresent {
    pub handle: SubscriptionHandle,
}
