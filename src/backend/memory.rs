use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use super::{BackendApi, BackendError};
use crate::identity::{Identity, LocalIdentityProvider, ProfileRecord};

type TokenVerifier = Arc<dyn Fn(&str) -> Option<Identity> + Send + Sync>;

/// In-process stand-in for the marketplace backend.
///
/// Verifies bearer tokens through a verifier (normally the local identity
/// provider), keeps an administrator email list and the upserted profiles,
/// and supports fault injection for the role and profile endpoints.
pub struct MemoryBackend {
    verifier: TokenVerifier,
    admins: Mutex<HashSet<String>>,
    profiles: Mutex<HashMap<String, ProfileRecord>>,
    verify_fault: Mutex<Option<BackendError>>,
    profile_fault: Mutex<Option<BackendError>>,
    verify_delay: Mutex<Option<Duration>>,
    verify_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new<F>(verifier: F) -> Self
    where
        F: Fn(&str) -> Option<Identity> + Send + Sync + 'static,
    {
        Self {
            verifier: Arc::new(verifier),
            admins: Mutex::new(HashSet::new()),
            profiles: Mutex::new(HashMap::new()),
            verify_fault: Mutex::new(None),
            profile_fault: Mutex::new(None),
            verify_delay: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
        }
    }

    /// Backend that verifies tokens issued by `provider`.
    pub fn for_local(provider: Arc<LocalIdentityProvider>) -> Self {
        Self::new(move |token| provider.verify_bearer(token))
    }

    pub fn grant_admin(&self, email: &str) {
        self.admins.lock().insert(email.trim().to_ascii_lowercase());
    }

    pub fn revoke_admin(&self, email: &str) {
        self.admins.lock().remove(&email.trim().to_ascii_lowercase());
    }

    pub fn fail_verify(&self, fault: Option<BackendError>) { *self.verify_fault.lock() = fault; }

    pub fn fail_profile(&self, fault: Option<BackendError>) { *self.profile_fault.lock() = fault; }

    /// Delay every `/verify-admin` response by `delay`.
    pub fn delay_verify(&self, delay: Option<Duration>) { *self.verify_delay.lock() = delay; }

    pub fn profile(&self, uid: &str) -> Option<ProfileRecord> { self.profiles.lock().get(uid).cloned() }

    pub fn verify_calls(&self) -> usize { self.verify_calls.load(Ordering::SeqCst) }

    pub fn profile_calls(&self) -> usize { self.profile_calls.load(Ordering::SeqCst) }

    fn authenticate(&self, bearer: &str) -> Result<Identity, BackendError> {
        (self.verifier)(bearer).ok_or(BackendError::Unauthorized(401))
    }
}

impl BackendApi for MemoryBackend {
    fn verify_admin<'a>(&'a self, bearer: &'a str) -> BoxFuture<'a, Result<bool, BackendError>> {
        async move {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.verify_delay.lock();
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if let Some(fault) = self.verify_fault.lock().clone() {
                return Err(fault);
            }
            let identity = self.authenticate(bearer)?;
            let is_admin = identity
                .email
                .as_deref()
                .map(|e| self.admins.lock().contains(&e.to_ascii_lowercase()))
                .unwrap_or(false);
            Ok(is_admin)
        }
        .boxed()
    }

    fn upsert_profile<'a>(&'a self, bearer: &'a str, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<(), BackendError>> {
        async move {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fault) = self.profile_fault.lock().clone() {
                return Err(fault);
            }
            let identity = self.authenticate(bearer)?;
            self.profiles.lock().insert(identity.uid, profile.clone());
            Ok(())
        }
        .boxed()
    }
}
