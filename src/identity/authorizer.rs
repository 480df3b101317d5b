use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::principal::Identity;
use super::provider::IdentityProvider;
use crate::backend::BackendApi;
use crate::error::AuthError;

/// Privilege classification derived from the backend. Never self-asserted by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Administrator,
}

impl Role {
    pub fn is_admin(self) -> bool { matches!(self, Role::Administrator) }

    pub fn label(self) -> &'static str {
        match self {
            Role::Member => "Member",
            Role::Administrator => "Administrator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.label()) }
}

/// Ask the backend whether the principal behind `bearer` is an administrator.
/// Bounded by `timeout`; a timeout is reported as `ProviderUnavailable`.
pub async fn lookup_role(backend: &dyn BackendApi, bearer: &str, timeout: Duration) -> Result<Role, AuthError> {
    match tokio::time::timeout(timeout, backend.verify_admin(bearer)).await {
        Ok(Ok(true)) => Ok(Role::Administrator),
        Ok(Ok(false)) => Ok(Role::Member),
        Ok(Err(e)) => Err(AuthError::from_backend(e)),
        Err(_) => Err(AuthError::ProviderUnavailable(format!(
            "role lookup timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Fail-closed role resolution: any lookup failure resolves to `Member`.
///
/// A network failure and a definitive "not an administrator" both end up as
/// `Member`; the distinction only survives in the log.
pub async fn resolve_role(
    provider: &dyn IdentityProvider,
    backend: &dyn BackendApi,
    identity: &Identity,
    timeout: Duration,
) -> Role {
    let bearer = match provider.bearer_credential(identity).await {
        Ok(token) => token,
        Err(e) => {
            let err = AuthError::from_provider(e);
            warn!(target: "session", uid = %identity.uid, code = err.code_str(), "bearer credential unavailable; role=member");
            return Role::Member;
        }
    };
    match lookup_role(backend, &bearer, timeout).await {
        Ok(role) => {
            debug!(target: "session", uid = %identity.uid, %role, "role resolved");
            role
        }
        Err(err) => {
            warn!(
                target: "session",
                uid = %identity.uid,
                category = ?err.category(),
                error = %err,
                "role lookup failed; failing closed to member"
            );
            Role::Member
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use crate::identity::LocalIdentityProvider;
    use std::sync::Arc;

    async fn signed_in() -> (Arc<LocalIdentityProvider>, MemoryBackend, Identity) {
        let provider = Arc::new(LocalIdentityProvider::new());
        let identity = provider.sign_up("boss@example.com", "Secret1").await.unwrap();
        let backend = MemoryBackend::for_local(provider.clone());
        (provider, backend, identity)
    }

    #[tokio::test]
    async fn admin_membership_comes_from_backend() {
        let (provider, backend, identity) = signed_in().await;
        let t = Duration::from_secs(1);
        assert_eq!(resolve_role(provider.as_ref(), &backend, &identity, t).await, Role::Member);
        backend.grant_admin("boss@example.com");
        assert_eq!(resolve_role(provider.as_ref(), &backend, &identity, t).await, Role::Administrator);
    }

    #[tokio::test]
    async fn failures_resolve_to_member() {
        let (provider, backend, identity) = signed_in().await;
        backend.grant_admin("boss@example.com");
        backend.fail_verify(Some(BackendError::Status(500)));
        assert_eq!(resolve_role(provider.as_ref(), &backend, &identity, Duration::from_secs(1)).await, Role::Member);
        backend.fail_verify(None);
        provider.set_available(false);
        assert_eq!(resolve_role(provider.as_ref(), &backend, &identity, Duration::from_secs(1)).await, Role::Member);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_times_out_as_unavailable() {
        let (provider, backend, identity) = signed_in().await;
        backend.grant_admin("boss@example.com");
        backend.delay_verify(Some(Duration::from_secs(30)));
        let bearer = provider.bearer_credential(&identity).await.unwrap();
        let err = lookup_role(&backend, &bearer, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::ProviderUnavailable);
    }

    #[test]
    fn labels() {
        assert_eq!(Role::Administrator.label(), "Administrator");
        assert_eq!(Role::default(), Role::Member);
        assert!(!Role::Member.is_admin());
    }
}
