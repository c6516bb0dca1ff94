//! Push notification pipeline: device registry, dispatch through the Expo
//! push service, notification history, and deferred receipt reconciliation.

pub mod dispatcher;
pub mod expo;
pub mod history;
pub mod lease;
pub mod message;
pub mod provider;
pub mod reconciler;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
