use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;

use super::principal::Identity;

/// Callback invoked with the provider's new identity (or `None` after sign-out/expiry).
pub type IdentityListener = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederatedFailure {
    PopupBlocked,
    Cancelled,
}

/// Raw failure reported by an identity provider adapter. Never leaves the
/// session authority; see [`crate::error::AuthError::from_provider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider rejected request: {code}")]
    Rejected { code: String, message: Option<String> },
    #[error("federated flow failed: {0:?}")]
    Federated(FederatedFailure),
    #[error("provider unreachable: {0}")]
    Transport(String),
    #[error("no signed-in user")]
    NoCurrentUser,
}

impl ProviderError {
    pub fn rejected<S: Into<String>>(code: S) -> Self {
        ProviderError::Rejected { code: code.into(), message: None }
    }
}

/// External identity capability: credential and federated sign-in, profile
/// storage, bearer tokens and identity-changed notifications.
///
/// Implementations must deliver notifications synchronously, serially and in
/// transition order, at most once per actual identity transition.
pub trait IdentityProvider: Send + Sync {
    /// Create an account and sign it in.
    fn sign_up<'a>(&'a self, email: &'a str, password: &'a str) -> BoxFuture<'a, Result<Identity, ProviderError>>;

    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, ProviderError>>;

    fn sign_in_with_federated(&self) -> BoxFuture<'_, Result<Identity, ProviderError>>;

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>>;

    /// Store display name and avatar URL on the signed-in account; returns the updated projection.
    fn update_profile<'a>(
        &'a self,
        display_name: &'a str,
        photo_url: &'a str,
    ) -> BoxFuture<'a, Result<Identity, ProviderError>>;

    /// Bearer token for `identity`, refreshed if needed.
    fn bearer_credential<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<String, ProviderError>>;

    fn current_identity(&self) -> Option<Identity>;

    /// Register `listener`; it is called once immediately with the current
    /// identity, then on every transition until the subscription is dropped.
    fn on_identity_changed(&self, listener: IdentityListener) -> Subscription;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, IdentityListener)>,
}

/// Listener bookkeeping shared by provider implementations.
///
/// Holds a delivery lock across "apply transition, notify listeners" so two
/// concurrent transitions can never interleave their notifications.
#[derive(Default)]
pub struct ListenerSet {
    registry: Arc<Mutex<Registry>>,
    delivery: Mutex<()>,
}

impl ListenerSet {
    pub fn new() -> Self { Self::default() }

    /// Register and deliver the initial report read by `current`.
    pub fn register<F>(&self, listener: IdentityListener, current: F) -> Subscription
    where
        F: FnOnce() -> Option<Identity>,
    {
        let _turn = self.delivery.lock();
        let id = {
            let mut reg = self.registry.lock();
            reg.next_id += 1;
            let id = reg.next_id;
            reg.listeners.push((id, listener.clone()));
            id
        };
        listener(current());
        Subscription { id, registry: Arc::downgrade(&self.registry), active: true }
    }

    /// Run `transition` under the delivery lock; if it reports a change
    /// (`Some(new_identity)`), notify every listener in registration order.
    pub fn publish_with<F>(&self, transition: F)
    where
        F: FnOnce() -> Option<Option<Identity>>,
    {
        let _turn = self.delivery.lock();
        let Some(identity) = transition() else { return };
        let snapshot: Vec<IdentityListener> =
            self.registry.lock().listeners.iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(identity.clone());
        }
    }

    pub fn len(&self) -> usize { self.registry.lock().listeners.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Unsubscribe handle returned by [`IdentityProvider::on_identity_changed`].
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) { self.release(); }

    fn release(&mut self) {
        if !self.active { return; }
        self.active = false;
        if let Some(reg) = self.registry.upgrade() {
            reg.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.release(); }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).field("active", &self.active).finish()
    }
}
