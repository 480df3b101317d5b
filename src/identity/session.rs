use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::authorizer::{resolve_role, Role};
use super::policy::validate_password;
use super::principal::Identity;
use super::provider::{IdentityProvider, Subscription};
use crate::backend::BackendApi;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// The provider has not reported its initial identity yet.
    Pending,
    /// At least one provider report has been fully processed.
    Ready,
}

/// Published session tuple. `generation` counts processed transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub role: Role,
    pub readiness: Readiness,
    pub generation: u64,
}

impl Default for SessionState {
    fn default() -> Self { Self::pending() }
}

impl SessionState {
    pub fn pending() -> Self {
        Self { identity: None, role: Role::Member, readiness: Readiness::Pending, generation: 0 }
    }

    pub fn is_ready(&self) -> bool { self.readiness == Readiness::Ready }

    pub fn is_signed_in(&self) -> bool { self.identity.is_some() }

    /// Role for access checks; without an identity this is always `Member`.
    pub fn effective_role(&self) -> Role {
        if self.identity.is_some() { self.role } else { Role::Member }
    }

    pub fn is_admin(&self) -> bool { self.effective_role().is_admin() }

    pub fn uid(&self) -> Option<&str> { self.identity.as_ref().map(|i| i.uid.as_str()) }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound for the profile upsert and the role lookup of one transition.
    pub role_timeout: Duration,
    /// Periodic role re-check for long-lived sessions; off when `None`.
    pub recheck_interval: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self { Self { role_timeout: Duration::from_secs(10), recheck_interval: None } }
}

#[derive(Debug)]
enum Event {
    IdentityChanged(Option<Identity>),
    ProfileUpdated(Identity),
    RecheckRole,
}

/// Single source of truth for who is signed in and with what privilege.
///
/// Constructed explicitly at the composition root and shared by reference.
/// All writes to the published [`SessionState`] happen on one worker task
/// that consumes provider notifications in arrival order.
pub struct SessionAuthority {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn BackendApi>,
    options: SessionOptions,
    state: watch::Receiver<SessionState>,
    events: mpsc::UnboundedSender<Event>,
    /// Handed to the worker by `observe_identity`. The worker owns the only
    /// state sender, so waiters wake up once it stops.
    idle: Mutex<Option<(mpsc::UnboundedReceiver<Event>, watch::Sender<SessionState>)>>,
}

impl SessionAuthority {
    pub fn new(provider: Arc<dyn IdentityProvider>, backend: Arc<dyn BackendApi>, options: SessionOptions) -> Self {
        let (publisher, state) = watch::channel(SessionState::pending());
        let (events, inbox) = mpsc::unbounded_channel();
        Self { provider, backend, options, state, events, idle: Mutex::new(Some((inbox, publisher))) }
    }

    /// Register with the identity provider and start processing its reports.
    ///
    /// Must be called from within a Tokio runtime. Can be called once per
    /// authority; dropping the returned handle unsubscribes and stops the
    /// worker, after which the published state is final.
    pub fn observe_identity(&self) -> AuthResult<ObserverHandle> {
        let (inbox, publisher) = self.idle.lock().take().ok_or(AuthError::AlreadyObserving)?;
        let worker = Worker {
            provider: self.provider.clone(),
            backend: self.backend.clone(),
            options: self.options.clone(),
            state: publisher,
        };
        let worker = tokio::spawn(worker.run(inbox));

        let tx = self.events.clone();
        let subscription = self.provider.on_identity_changed(Arc::new(move |identity: Option<Identity>| {
            if tx.send(Event::IdentityChanged(identity)).is_err() {
                debug!(target: "session", "identity report after session worker stopped");
            }
        }));

        let recheck = self.options.recheck_interval.map(|every| {
            let tx = self.events.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if tx.send(Event::RecheckRole).is_err() {
                        break;
                    }
                }
            })
        });
        info!(target: "session", recheck_secs = ?self.options.recheck_interval.map(|d| d.as_secs()), "observing identity provider");
        Ok(ObserverHandle { subscription: Some(subscription), worker, recheck })
    }

    /// Email/password sign-in. Session state changes only once the provider's
    /// notification has been processed, which may be after this returns.
    pub async fn sign_in_with_credential(&self, email: &str, secret: &str) -> AuthResult<Identity> {
        let result = self.provider.sign_in_with_password(email, secret).await.map_err(AuthError::from_provider);
        log_attempt("password", &result);
        result
    }

    pub async fn sign_in_with_federated_provider(&self) -> AuthResult<Identity> {
        let result = self.provider.sign_in_with_federated().await.map_err(AuthError::from_provider);
        log_attempt("federated", &result);
        result
    }

    /// Validate the password policy, create the account (which signs it in)
    /// and store the optional display profile.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> AuthResult<Identity> {
        validate_password(password)?;
        let mut identity = self.provider.sign_up(email, password).await.map_err(AuthError::from_provider)?;
        info!(target: "session", uid = %identity.uid, "account created");
        if display_name.is_some() || photo_url.is_some() {
            identity = self.update_display_profile(display_name.unwrap_or(""), photo_url.unwrap_or("")).await?;
        }
        Ok(identity)
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.provider.sign_out().await.map_err(AuthError::from_provider)?;
        info!(target: "session", "sign-out requested");
        Ok(())
    }

    /// Store display name and avatar on the provider and refresh the published
    /// identity projection. Role is untouched; repeating the call is a no-op.
    pub async fn update_display_profile(&self, name: &str, avatar_url: &str) -> AuthResult<Identity> {
        let identity = self.provider.update_profile(name, avatar_url).await.map_err(AuthError::from_provider)?;
        if self.events.send(Event::ProfileUpdated(identity.clone())).is_err() {
            debug!(target: "session", "profile update after session worker stopped");
        }
        Ok(identity)
    }

    /// Latest published state. Never blocks and never performs I/O.
    pub fn current_capability(&self) -> SessionState { self.state.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.state.clone() }

    /// Wait until the published state satisfies `pred`. Returns the final
    /// state instead if the observer has been stopped.
    pub async fn wait_until<F>(&self, mut pred: F) -> SessionState
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut rx = self.subscribe();
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&*current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.current_capability();
            }
        }
    }

    pub async fn wait_ready(&self) -> SessionState { self.wait_until(SessionState::is_ready).await }

    /// Wait for the first state published after `generation`.
    pub async fn wait_past(&self, generation: u64) -> SessionState {
        self.wait_until(|s| s.generation > generation).await
    }
}

fn log_attempt(method: &str, result: &AuthResult<Identity>) {
    match result {
        Ok(identity) => info!(target: "session", method, uid = %identity.uid, "sign-in accepted by provider"),
        Err(err) => info!(target: "session", method, code = err.code_str(), "sign-in rejected"),
    }
}

/// Keeps the provider subscription and the worker task alive.
pub struct ObserverHandle {
    subscription: Option<Subscription>,
    worker: JoinHandle<()>,
    recheck: Option<JoinHandle<()>>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        if let Some(recheck) = self.recheck.take() {
            recheck.abort();
        }
        self.worker.abort();
    }
}

struct Worker {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn BackendApi>,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
}

impl Worker {
    async fn run(self, mut inbox: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = inbox.recv().await {
            match event {
                Event::IdentityChanged(identity) => self.apply_identity(identity).await,
                Event::ProfileUpdated(identity) => self.apply_profile(identity),
                Event::RecheckRole => self.recheck_role().await,
            }
        }
        debug!(target: "session", "session worker stopped");
    }

    async fn apply_identity(&self, identity: Option<Identity>) {
        let role = match identity.as_ref() {
            Some(ident) => {
                self.sync_profile(ident).await;
                resolve_role(self.provider.as_ref(), self.backend.as_ref(), ident, self.options.role_timeout).await
            }
            None => Role::Member,
        };
        self.publish(identity, role);
    }

    /// Advisory upsert of the profile; failures are logged and never block readiness.
    async fn sync_profile(&self, identity: &Identity) {
        let bearer = match self.provider.bearer_credential(identity).await {
            Ok(token) => token,
            Err(e) => {
                let err = AuthError::ProfileSyncFailed(AuthError::from_provider(e).to_string());
                warn!(target: "session", uid = %identity.uid, error = %err, "skipping profile sync");
                return;
            }
        };
        let record = identity.profile_record();
        let outcome = tokio::time::timeout(self.options.role_timeout, self.backend.upsert_profile(&bearer, &record)).await;
        let err = match outcome {
            Ok(Ok(())) => {
                debug!(target: "session", uid = %identity.uid, "profile synced");
                return;
            }
            Ok(Err(e)) => AuthError::ProfileSyncFailed(e.to_string()),
            Err(_) => AuthError::ProfileSyncFailed("timed out".into()),
        };
        warn!(target: "session", uid = %identity.uid, error = %err, "profile sync failed");
    }

    fn publish(&self, identity: Option<Identity>, role: Role) {
        let role = if identity.is_some() { role } else { Role::Member };
        self.state.send_modify(|s| {
            let first_report = s.readiness == Readiness::Pending;
            s.generation += 1;
            s.identity = identity;
            s.role = role;
            s.readiness = Readiness::Ready;
            info!(
                target: "session",
                generation = s.generation,
                uid = s.uid().unwrap_or("-"),
                %role,
                first_report,
                "session state published"
            );
        });
    }

    fn apply_profile(&self, identity: Identity) {
        self.state.send_if_modified(|s| match s.identity.as_mut() {
            Some(current) if current.uid == identity.uid && *current != identity => {
                *current = identity;
                s.generation += 1;
                debug!(target: "session", generation = s.generation, "identity profile refreshed");
                true
            }
            _ => false,
        });
    }

    async fn recheck_role(&self) {
        let snapshot = self.state.borrow().clone();
        let Some(identity) = snapshot.identity else { return };
        let role = resolve_role(self.provider.as_ref(), self.backend.as_ref(), &identity, self.options.role_timeout).await;
        self.state.send_if_modified(|s| {
            if s.uid() != Some(identity.uid.as_str()) || s.role == role {
                return false;
            }
            s.role = role;
            s.generation += 1;
            info!(target: "session", generation = s.generation, uid = %identity.uid, %role, "role changed on re-check");
            true
        });
    }
}
