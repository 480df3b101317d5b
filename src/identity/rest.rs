use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::principal::Identity;
use super::provider::{IdentityListener, IdentityProvider, ListenerSet, ProviderError, Subscription};

/// Refresh the ID token when it expires within this window.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct RestProviderConfig {
    pub api_key: String,
    /// e.g. `https://identitytoolkit.googleapis.com/v1`
    pub identity_endpoint: String,
    /// e.g. `https://securetoken.googleapis.com/v1`
    pub token_endpoint: String,
    pub timeout: Duration,
    /// Continue URI sent with federated sign-in requests.
    pub request_uri: String,
}

/// Credential issued by a federated identity provider (e.g. a Google ID token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpCredential {
    pub provider_id: String,
    pub id_token: String,
}

/// Obtains an IdP credential: a browser popup in the web client, a pasted
/// token in the CLI. Reports `Federated(PopupBlocked | Cancelled)` on failure.
pub trait FederatedFlow: Send + Sync {
    fn obtain_credential(&self) -> BoxFuture<'_, Result<IdpCredential, ProviderError>>;
}

#[derive(Debug, Clone)]
struct RestSession {
    identity: Identity,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

impl AccountPayload {
    fn identity(&self) -> Identity {
        Identity {
            uid: self.local_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone().filter(|s| !s.is_empty()),
            photo_url: self.photo_url.clone().filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn expiry_from(expires_in: Option<&str>) -> DateTime<Utc> {
    let secs = expires_in.and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(3600);
    Utc::now() + chrono::Duration::seconds(secs)
}

fn transport(err: reqwest::Error) -> ProviderError { ProviderError::Transport(err.to_string()) }

/// Identity provider backed by the identity toolkit REST API.
pub struct RestIdentityProvider {
    client: reqwest::Client,
    config: RestProviderConfig,
    flow: Arc<dyn FederatedFlow>,
    session: Mutex<Option<RestSession>>,
    listeners: ListenerSet,
}

impl RestIdentityProvider {
    pub fn new(config: RestProviderConfig, flow: Arc<dyn FederatedFlow>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build().map_err(transport)?;
        Ok(Self { client, config, flow, session: Mutex::new(None), listeners: ListenerSet::new() })
    }

    async fn decode_error(resp: reqwest::Response) -> ProviderError {
        let status = resp.status();
        match resp.json::<ErrorEnvelope>().await {
            Ok(env) => ProviderError::Rejected { code: env.error.message, message: None },
            Err(_) if status.is_server_error() => ProviderError::Transport(format!("HTTP {}", status)),
            Err(_) => ProviderError::Rejected { code: format!("HTTP_{}", status.as_u16()), message: None },
        }
    }

    async fn accounts(&self, method: &str, body: serde_json::Value) -> Result<AccountPayload, ProviderError> {
        let url = format!("{}/accounts:{}", self.config.identity_endpoint.trim_end_matches('/'), method);
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        debug!(target: "identity", method, status = resp.status().as_u16(), "identity toolkit response");
        if !resp.status().is_success() {
            return Err(Self::decode_error(resp).await);
        }
        resp.json::<AccountPayload>().await.map_err(transport)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPayload, ProviderError> {
        let url = format!("{}/token", self.config.token_endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Self::decode_error(resp).await);
        }
        resp.json::<TokenPayload>().await.map_err(transport)
    }

    /// Install the session described by `payload`; notifies when the principal changes.
    fn establish(&self, payload: AccountPayload) -> Result<Identity, ProviderError> {
        let identity = payload.identity();
        let (Some(id_token), Some(refresh_token)) = (payload.id_token.clone(), payload.refresh_token.clone()) else {
            return Err(ProviderError::rejected("MISSING_ID_TOKEN"));
        };
        let expires_at = expiry_from(payload.expires_in.as_deref());
        let next = RestSession { identity: identity.clone(), id_token, refresh_token, expires_at };
        self.listeners.publish_with(|| {
            let mut session = self.session.lock();
            let changed = session.as_ref().map(|s| s.identity.uid.as_str()) != Some(identity.uid.as_str());
            *session = Some(next);
            if changed {
                info!(target: "identity", uid = %identity.uid, "signed in");
                Some(Some(identity.clone()))
            } else {
                None
            }
        });
        Ok(identity)
    }

    /// Drop the session for `uid` (if still current) and report the expiry.
    fn expire(&self, uid: &str) {
        self.listeners.publish_with(|| {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.identity.uid.as_str()) != Some(uid) {
                return None;
            }
            *session = None;
            warn!(target: "identity", uid, "session expired");
            Some(None)
        });
    }

    async fn fresh_token(&self, uid: &str) -> Result<String, ProviderError> {
        let snapshot = self.session.lock().clone();
        let Some(current) = snapshot.filter(|s| s.identity.uid == uid) else {
            return Err(ProviderError::NoCurrentUser);
        };
        if current.expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
            return Ok(current.id_token);
        }
        match self.refresh(&current.refresh_token).await {
            Ok(tok) => {
                if tok.user_id != uid {
                    self.expire(uid);
                    return Err(ProviderError::NoCurrentUser);
                }
                let mut session = self.session.lock();
                if let Some(s) = session.as_mut().filter(|s| s.identity.uid == uid) {
                    s.id_token = tok.id_token.clone();
                    s.refresh_token = tok.refresh_token;
                    s.expires_at = expiry_from(Some(tok.expires_in.as_str()));
                }
                debug!(target: "identity", uid, "id token refreshed");
                Ok(tok.id_token)
            }
            Err(ProviderError::Rejected { code, .. }) => {
                // The refresh token is no longer honoured: provider-side expiry.
                self.expire(uid);
                Err(ProviderError::Rejected { code, message: None })
            }
            Err(other) => Err(other),
        }
    }

    async fn apply_profile(&self, display_name: &str, photo_url: &str) -> Result<Identity, ProviderError> {
        let uid = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.identity.uid.clone())
            .ok_or(ProviderError::NoCurrentUser)?;
        let id_token = self.fresh_token(&uid).await?;
        let mut body = json!({ "idToken": id_token, "returnSecureToken": true });
        let mut delete = Vec::new();
        if display_name.is_empty() { delete.push("DISPLAY_NAME") } else { body["displayName"] = json!(display_name) }
        if photo_url.is_empty() { delete.push("PHOTO_URL") } else { body["photoUrl"] = json!(photo_url) }
        if !delete.is_empty() {
            body["deleteAttribute"] = json!(delete);
        }
        let payload = self.accounts("update", body).await?;
        let mut session = self.session.lock();
        let Some(s) = session.as_mut().filter(|s| s.identity.uid == uid) else {
            return Err(ProviderError::NoCurrentUser);
        };
        s.identity.display_name = Some(display_name.to_string()).filter(|v| !v.is_empty());
        s.identity.photo_url = Some(photo_url.to_string()).filter(|v| !v.is_empty());
        if payload.email.is_some() {
            s.identity.email = payload.email.clone();
        }
        if let (Some(id), Some(refresh)) = (payload.id_token, payload.refresh_token) {
            s.id_token = id;
            s.refresh_token = refresh;
            s.expires_at = expiry_from(payload.expires_in.as_deref());
        }
        Ok(s.identity.clone())
    }
}

impl IdentityProvider for RestIdentityProvider {
    fn sign_up<'a>(&'a self, email: &'a str, password: &'a str) -> BoxFuture<'a, Result<Identity, ProviderError>> {
        async move {
            let body = json!({ "email": email, "password": password, "returnSecureToken": true });
            let payload = self.accounts("signUp", body).await?;
            self.establish(payload)
        }
        .boxed()
    }

    fn sign_in_with_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Identity, ProviderError>> {
        async move {
            let body = json!({ "email": email, "password": password, "returnSecureToken": true });
            let payload = self.accounts("signInWithPassword", body).await?;
            self.establish(payload)
        }
        .boxed()
    }

    fn sign_in_with_federated(&self) -> BoxFuture<'_, Result<Identity, ProviderError>> {
        async move {
            let credential = self.flow.obtain_credential().await?;
            let post_body = format!(
                "id_token={}&providerId={}",
                urlencoding::encode(&credential.id_token),
                urlencoding::encode(&credential.provider_id)
            );
            let body = json!({
                "postBody": post_body,
                "requestUri": self.config.request_uri,
                "returnSecureToken": true,
                "returnIdpCredential": true,
            });
            let payload = self.accounts("signInWithIdp", body).await?;
            self.establish(payload)
        }
        .boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        async move {
            self.listeners.publish_with(|| {
                let previous = self.session.lock().take();
                previous.map(|s| {
                    info!(target: "identity", uid = %s.identity.uid, "signed out");
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
        async move { self.apply_profile(display_name, photo_url).await }.boxed()
    }

    fn bearer_credential<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<String, ProviderError>> {
        async move { self.fresh_token(&identity.uid).await }.boxed()
    }

    fn current_identity(&self) -> Option<Identity> { self.session.lock().as_ref().map(|s| s.identity.clone()) }

    fn on_identity_changed(&self, listener: IdentityListener) -> Subscription {
        self.listeners.register(listener, || self.current_identity())
    }
}
