use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use base64::Engine;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use password_hash::{PasswordHash, SaltString};
use tracing::{debug, info};

use super::principal::Identity;
use super::provider::{FederatedFailure, IdentityListener, IdentityProvider, ListenerSet, ProviderError, Subscription};

/// Scripted result of the next federated sign-in against [`LocalIdentityProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederatedOutcome {
    SignedIn { email: String, display_name: Option<String>, photo_url: Option<String> },
    PopupBlocked,
    Cancelled,
    Unavailable,
}

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    /// `None` for accounts created through federated sign-in only.
    password_hash: Option<String>,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    uid: String,
    token: String,
}

/// In-process identity provider: Argon2-hashed passwords, random bearer
/// tokens and a scripted federated flow. Backs the tests and the offline CLI.
pub struct LocalIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    current: Mutex<Option<ActiveSession>>,
    federated: Mutex<VecDeque<FederatedOutcome>>,
    available: AtomicBool,
    listeners: ListenerSet,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self { Self::new() }
}

fn gen_token() -> Result<String, ProviderError> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| ProviderError::Transport(format!("entropy unavailable: {}", e)))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

fn hasher() -> Result<Argon2<'static>, ProviderError> {
    // Light parameters: this provider never stores real credentials.
    let params = Params::new(4096, 1, 1, None).map_err(|e| ProviderError::Transport(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_password(password: &str) -> Result<String, ProviderError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| ProviderError::Transport(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| ProviderError::Transport(e.to_string()))?;
    let phc = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ProviderError::Transport(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn normalize_email(email: &str) -> Result<String, ProviderError> {
    let e = email.trim().to_ascii_lowercase();
    if e.is_empty() {
        return Err(ProviderError::rejected("MISSING_EMAIL"));
    }
    let valid = match e.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    };
    if !valid {
        return Err(ProviderError::rejected("INVALID_EMAIL"));
    }
    Ok(e)
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            federated: Mutex::new(VecDeque::new()),
            available: AtomicBool::new(true),
            listeners: ListenerSet::new(),
        }
    }

    /// Create an account without signing it in.
    pub fn add_account(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let key = normalize_email(email)?;
        if password.is_empty() {
            return Err(ProviderError::rejected("MISSING_PASSWORD"));
        }
        if password.chars().count() < 6 {
            return Err(ProviderError::Rejected {
                code: "WEAK_PASSWORD".into(),
                message: Some("Password should be at least 6 characters".into()),
            });
        }
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&key) {
            return Err(ProviderError::rejected("EMAIL_EXISTS"));
        }
        let identity = Identity::new(uuid::Uuid::new_v4().simple().to_string()).with_email(key.clone());
        let password_hash = Some(hash_password(password)?);
        accounts.insert(key, Account { identity: identity.clone(), password_hash });
        debug!(target: "identity", uid = %identity.uid, "local account created");
        Ok(identity)
    }

    /// Queue the outcome of the next federated sign-in.
    pub fn queue_federated(&self, outcome: FederatedOutcome) {
        self.federated.lock().push_back(outcome);
    }

    /// Simulate an outage: every call fails with a transport error while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate provider-side session expiry.
    pub fn expire_session(&self) {
        self.listeners.publish_with(|| {
            let previous = self.current.lock().take();
            previous.map(|s| {
                info!(target: "identity", uid = %s.uid, "local session expired");
                None
            })
        });
    }

    /// Resolve a bearer token to its identity, as a backend would when verifying a token.
    pub fn verify_bearer(&self, token: &str) -> Option<Identity> {
        let uid = {
            let current = self.current.lock();
            match current.as_ref() {
                Some(s) if s.token == token => s.uid.clone(),
                _ => return None,
            }
        };
        self.identity_by_uid(&uid)
    }

    pub fn listener_count(&self) -> usize { self.listeners.len() }

    fn identity_by_uid(&self, uid: &str) -> Option<Identity> {
        self.accounts.lock().values().find(|a| a.identity.uid == uid).map(|a| a.identity.clone())
    }

    fn ensure_available(&self) -> Result<(), ProviderError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Transport("identity service unreachable".into()))
        }
    }

    /// Make `identity` the active session; notifies only when the principal changes.
    fn activate(&self, identity: &Identity) -> Result<(), ProviderError> {
        let token = gen_token()?;
        self.listeners.publish_with(|| {
            let mut current = self.current.lock();
            // Unreported re-sign-in: the principal keeps its token.
            if current.as_ref().map(|s| s.uid.as_str()) == Some(identity.uid.as_str()) {
                return None;
            }
            *current = Some(ActiveSession { uid: identity.uid.clone(), token });
            info!(target: "identity", uid = %identity.uid, "local sign-in");
            Some(Some(identity.clone()))
        });
        Ok(())
    }

    fn password_sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        self.ensure_available()?;
        let key = normalize_email(email)?;
        let account = self.accounts.lock().get(&key).cloned();
        let Some(account) = account else { return Err(ProviderError::rejected("EMAIL_NOT_FOUND")) };
        let Some(hash) = account.password_hash.as_deref() else {
            return Err(ProviderError::rejected("INVALID_LOGIN_CREDENTIALS"));
        };
        if !verify_password(hash, password) {
            return Err(ProviderError::rejected("INVALID_PASSWORD"));
        }
        self.activate(&account.identity)?;
        Ok(account.identity)
    }

    fn federated_sign_in(&self) -> Result<Identity, ProviderError> {
        self.ensure_available()?;
        let outcome = self.federated.lock().pop_front().unwrap_or(FederatedOutcome::Cancelled);
        let (email, display_name, photo_url) = match outcome {
            FederatedOutcome::SignedIn { email, display_name, photo_url } => (email, display_name, photo_url),
            FederatedOutcome::PopupBlocked => return Err(ProviderError::Federated(FederatedFailure::PopupBlocked)),
            FederatedOutcome::Cancelled => return Err(ProviderError::Federated(FederatedFailure::Cancelled)),
            FederatedOutcome::Unavailable => {
                return Err(ProviderError::Transport("federated provider unreachable".into()))
            }
        };
        let key = normalize_email(&email)?;
        let identity = {
            let mut accounts = self.accounts.lock();
            let account = accounts.entry(key.clone()).or_insert_with(|| Account {
                identity: Identity::new(uuid::Uuid::new_v4().simple().to_string()).with_email(key),
                password_hash: None,
            });
            // Federated profiles fill in fields the account does not have yet.
            if account.identity.display_name.is_none() {
                account.identity.display_name = display_name;
            }
            if account.identity.photo_url.is_none() {
                account.identity.photo_url = photo_url;
            }
            account.identity.clone()
        };
        self.activate(&identity)?;
        Ok(identity)
    }

    fn apply_profile(&self, display_name: &str, photo_url: &str) -> Result<Identity, ProviderError> {
        self.ensure_available()?;
        let uid = self.current.lock().as_ref().map(|s| s.uid.clone()).ok_or(ProviderError::NoCurrentUser)?;
        let mut accounts = self.accounts.lock();
        let account = accounts
            .values_mut()
            .find(|a| a.identity.uid == uid)
            .ok_or(ProviderError::NoCurrentUser)?;
        account.identity.display_name = Some(display_name.to_string()).filter(|s| !s.is_empty());
        account.identity.photo_url = Some(photo_url.to_string()).filter(|s| !s.is_empty());
        Ok(account.identity.clone())
    }

    fn token_for(&self, identity: &Identity) -> Result<String, ProviderError> {
        self.ensure_available()?;
        match self.current.lock().as_ref() {
            Some(s) if s.uid == identity.uid => Ok(s.token.clone()),
            _ => Err(ProviderError::NoCurrentUser),
        }
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn sign_up<'a>(&'a self, email: &'a str, password: &'a str) -> BoxFuture<'a, Result<Identity, ProviderError>> {
        async move {
            self.ensure_available()?;
            let identity = self.add_account(email, password)?;
            self.activate(&identity)?;
            Ok(identity)
        }
        .boxed()
    }

    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, ProviderError>> {
        async move { self.password_sign_in(email, password) }.boxed()
    }

    fn sign_in_with_federated(&self) -> BoxFuture<'_, Result<Identity, ProviderError>> {
        async move { self.federated_sign_in() }.boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        async move {
            self.ensure_available()?;
            self.listeners.publish_with(|| {
                let previous = self.current.lock().take();
                previous.map(|s| {
                    info!(target: "identity", uid = %s.uid, "local sign-out");
                    None
                })
            });
            Ok(())
        }
        .boxed()
    }

    fn update_profile<'a>(
        &'a self,
        display_name: &'a str,
        photo_url: &'a str,
    ) -> BoxFuture<'a, Result<Identity, ProviderError>> {
        async move { self.apply_profile(display_name, photo_url) }.boxed()
    }

    fn bearer_credential<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<String, ProviderError>> {
        async move { self.token_for(identity) }.boxed()
    }

    fn current_identity(&self) -> Option<Identity> {
        let uid = self.current.lock().as_ref().map(|s| s.uid.clone())?;
        self.identity_by_uid(&uid)
    }

    fn on_identity_changed(&self, listener: IdentityListener) -> Subscription {
        self.listeners.register(listener, || self.current_identity())
    }
}
