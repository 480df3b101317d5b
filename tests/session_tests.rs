//! Session authority integration tests: readiness, role derivation, fail-closed
//! lookups, profile edits and provider-driven transitions. Everything runs
//! against the in-process identity provider and backend.

use std::sync::Arc;
use std::time::Duration;

use homenest::backend::{BackendError, MemoryBackend};
use homenest::identity::{
    FederatedOutcome, IdentityProvider, LocalIdentityProvider, Readiness, Role, SessionAuthority, SessionOptions,
};
use homenest::AuthError;

struct Harness {
    provider: Arc<LocalIdentityProvider>,
    backend: Arc<MemoryBackend>,
    authority: Arc<SessionAuthority>,
}

fn harness(options: SessionOptions) -> Harness {
    let provider = Arc::new(LocalIdentityProvider::new());
    let backend = Arc::new(MemoryBackend::for_local(provider.clone()));
    let authority = Arc::new(SessionAuthority::new(provider.clone(), backend.clone(), options));
    Harness { provider, backend, authority }
}

async fn signed_in(h: &Harness, email: &str) -> homenest::SessionState {
    let identity = h.authority.sign_in_with_credential(email, "Secret1").await.unwrap();
    h.authority.wait_until(|s| s.uid() == Some(identity.uid.as_str())).await
}

#[tokio::test]
async fn readiness_goes_pending_to_ready_once() {
    let h = harness(SessionOptions::default());
    let before = h.authority.current_capability();
    assert_eq!(before.readiness, Readiness::Pending);
    assert!(before.identity.is_none());
    assert_eq!(before.generation, 0);

    let _observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;
    assert!(ready.is_ready());
    assert!(!ready.is_signed_in());
    assert_eq!(ready.role, Role::Member);
    assert_eq!(ready.generation, 1);

    h.provider.add_account("pat@homenest.test", "Secret1").unwrap();
    let state = signed_in(&h, "pat@homenest.test").await;
    assert_eq!(state.readiness, Readiness::Ready);
    h.authority.sign_out().await.unwrap();
    let out = h.authority.wait_until(|s| !s.is_signed_in() && s.generation > state.generation).await;
    assert_eq!(out.readiness, Readiness::Ready);
}

#[tokio::test]
async fn member_and_administrator_roles_come_from_backend() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("member@homenest.test", "Secret1").unwrap();
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");

    let member = signed_in(&h, "member@homenest.test").await;
    assert_eq!(member.role, Role::Member);
    assert!(!member.is_admin());

    let admin = signed_in(&h, "admin@homenest.test").await;
    assert_eq!(admin.role, Role::Administrator);
    assert!(admin.is_admin());
    assert_eq!(admin.identity.as_ref().and_then(|i| i.email.as_deref()), Some("admin@homenest.test"));

    h.authority.sign_out().await.unwrap();
    let out = h.authority.wait_until(|s| !s.is_signed_in()).await;
    assert_eq!(out.role, Role::Member);
    assert!(!out.is_admin());
}

#[tokio::test]
async fn sign_in_upserts_profile_before_publishing() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.queue_federated(FederatedOutcome::SignedIn {
        email: "gina@homenest.test".into(),
        display_name: Some("Gina".into()),
        photo_url: Some("https://img.test/g.png".into()),
    });
    let identity = h.authority.sign_in_with_federated_provider().await.unwrap();
    let state = h.authority.wait_until(|s| s.is_signed_in()).await;
    assert_eq!(state.identity.as_ref(), Some(&identity));

    let profile = h.backend.profile(&identity.uid).unwrap();
    assert_eq!(profile.display_name.as_deref(), Some("Gina"));
    assert_eq!(profile.photo_url.as_deref(), Some("https://img.test/g.png"));
}

#[tokio::test]
async fn role_lookup_failure_fails_closed() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");
    h.backend.fail_verify(Some(BackendError::Status(500)));

    let state = signed_in(&h, "admin@homenest.test").await;
    assert!(state.is_ready());
    assert!(state.is_signed_in());
    assert_eq!(state.role, Role::Member);
    assert_eq!(h.backend.verify_calls(), 1);
}

#[tokio::test]
async fn profile_sync_failure_does_not_block_readiness() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");
    h.backend.fail_profile(Some(BackendError::Transport("connection refused".into())));

    let state = signed_in(&h, "admin@homenest.test").await;
    assert_eq!(state.role, Role::Administrator);
    assert_eq!(h.backend.profile_calls(), 1);
    assert!(h.backend.profile(state.uid().unwrap()).is_none());
}

#[tokio::test(start_paused = true)]
async fn role_lookup_is_bounded_by_timeout() {
    let options = SessionOptions { role_timeout: Duration::from_secs(2), recheck_interval: None };
    let h = harness(options);
    let _observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");
    h.backend.delay_verify(Some(Duration::from_secs(60)));

    let state = signed_in(&h, "admin@homenest.test").await;
    assert_eq!(state.role, Role::Member);
    // One transition: no intermediate state was published.
    assert_eq!(state.generation, ready.generation + 1);
}

#[tokio::test(start_paused = true)]
async fn capability_never_pairs_new_identity_with_stale_role() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");
    h.backend.delay_verify(Some(Duration::from_secs(3)));

    let identity = h.authority.sign_in_with_credential("admin@homenest.test", "Secret1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    // Lookup still in flight: the previous (signed-out) state is what readers see.
    let mid = h.authority.current_capability();
    assert!(mid.is_ready());
    assert!(!mid.is_signed_in());
    assert!(!mid.is_admin());

    let state = h.authority.wait_until(|s| s.uid() == Some(identity.uid.as_str())).await;
    assert_eq!(state.role, Role::Administrator);
}

#[tokio::test]
async fn display_profile_updates_are_idempotent_and_keep_role() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("admin@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("admin@homenest.test");
    signed_in(&h, "admin@homenest.test").await;
    let lookups = h.backend.verify_calls();

    h.authority.update_display_profile("Ada", "https://img.test/a.png").await.unwrap();
    let first = h.authority.wait_until(|s| s.identity.as_ref().and_then(|i| i.display_name.as_deref()) == Some("Ada")).await;
    assert_eq!(first.role, Role::Administrator);
    assert_eq!(first.identity.as_ref().and_then(|i| i.photo_url.as_deref()), Some("https://img.test/a.png"));

    // Same values again: no new state. The sign-out after it is the next transition.
    h.authority.update_display_profile("Ada", "https://img.test/a.png").await.unwrap();
    h.authority.sign_out().await.unwrap();
    let out = h.authority.wait_until(|s| !s.is_signed_in()).await;
    assert_eq!(out.generation, first.generation + 1);
    assert_eq!(h.backend.verify_calls(), lookups);
}

#[tokio::test]
async fn update_profile_requires_identity() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    let err = h.authority.update_display_profile("Nobody", "").await.unwrap_err();
    assert_eq!(err, AuthError::NotSignedIn);
}

#[tokio::test]
async fn credential_errors_are_classified() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;
    h.provider.add_account("pat@homenest.test", "Secret1").unwrap();

    let err = h.authority.sign_in_with_credential("pat@homenest.test", "wrong").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredential);
    assert_eq!(err.user_message(), "Invalid email or password!");
    let err = h.authority.sign_in_with_credential("ghost@homenest.test", "Secret1").await.unwrap_err();
    assert_eq!(err, AuthError::AccountNotFound);
    assert_eq!(err.user_message(), "No user found with this email!");

    h.provider.set_available(false);
    let err = h.authority.sign_in_with_credential("pat@homenest.test", "Secret1").await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderUnavailable(_)));
    assert!(err.is_retryable());

    h.provider.queue_federated(FederatedOutcome::PopupBlocked);
    h.provider.set_available(true);
    let err = h.authority.sign_in_with_federated_provider().await.unwrap_err();
    assert_eq!(err, AuthError::PopupBlocked);

    // Failed attempts never touch the published session.
    assert_eq!(h.authority.current_capability(), ready);
}

#[tokio::test]
async fn create_account_enforces_password_policy() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;

    let err = h.authority.create_account("new@homenest.test", "abc", Some("New"), None).await.unwrap_err();
    match &err {
        AuthError::WeakPassword(reasons) => assert_eq!(reasons.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.provider.current_identity(), None);
    let err = h.authority.sign_in_with_credential("new@homenest.test", "abc").await.unwrap_err();
    assert_eq!(err, AuthError::AccountNotFound);
    assert_eq!(h.authority.current_capability(), ready);

    let identity = h
        .authority
        .create_account("new@homenest.test", "Secret1", Some("Nia"), Some("https://img.test/n.png"))
        .await
        .unwrap();
    assert_eq!(identity.display_name.as_deref(), Some("Nia"));
    let state = h.authority.wait_until(|s| s.identity.as_ref().and_then(|i| i.display_name.as_deref()) == Some("Nia")).await;
    assert_eq!(state.role, Role::Member);
    assert_eq!(state.identity.as_ref().map(|i| i.display_label()), Some("Nia".to_string()));

    let err = h.authority.create_account("new@homenest.test", "Secret1", None, None).await.unwrap_err();
    assert_eq!(err, AuthError::EmailInUse);
}

#[tokio::test]
async fn provider_side_expiry_signs_out() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("pat@homenest.test", "Secret1").unwrap();
    let state = signed_in(&h, "pat@homenest.test").await;

    h.provider.expire_session();
    let out = h.authority.wait_past(state.generation).await;
    assert!(!out.is_signed_in());
    assert_eq!(out.role, Role::Member);
}

#[tokio::test]
async fn concurrent_sign_ins_settle_on_provider_identity() {
    let h = harness(SessionOptions::default());
    let _observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;
    h.provider.add_account("a@homenest.test", "Secret1").unwrap();
    h.provider.add_account("b@homenest.test", "Secret1").unwrap();
    h.backend.grant_admin("b@homenest.test");

    let (a, b) = futures::join!(
        h.authority.sign_in_with_credential("a@homenest.test", "Secret1"),
        h.authority.sign_in_with_credential("b@homenest.test", "Secret1"),
    );
    a.unwrap();
    b.unwrap();
    let current = h.provider.current_identity().unwrap();
    let state = h.authority.wait_until(|s| s.generation >= ready.generation + 2).await;
    assert_eq!(state.uid(), Some(current.uid.as_str()));
    assert_eq!(state.role, if current.email.as_deref() == Some("b@homenest.test") { Role::Administrator } else { Role::Member });
}

#[tokio::test]
async fn observing_twice_is_rejected_and_drop_unsubscribes() {
    let h = harness(SessionOptions::default());
    let observer = h.authority.observe_identity().unwrap();
    assert_eq!(h.provider.listener_count(), 1);
    assert!(matches!(h.authority.observe_identity(), Err(AuthError::AlreadyObserving)));

    drop(observer);
    assert_eq!(h.provider.listener_count(), 0);
}

#[tokio::test]
async fn waiters_return_final_state_once_observer_stops() {
    let h = harness(SessionOptions::default());
    let observer = h.authority.observe_identity().unwrap();
    let ready = h.authority.wait_ready().await;

    drop(observer);
    let fin = tokio::time::timeout(Duration::from_secs(1), h.authority.wait_until(|s| s.is_admin()))
        .await
        .expect("waiter must not hang after the observer stops");
    assert!(!fin.is_admin());
    assert_eq!(fin.generation, ready.generation);
}

#[tokio::test(start_paused = true)]
async fn periodic_recheck_picks_up_role_changes() {
    let options = SessionOptions { role_timeout: Duration::from_secs(5), recheck_interval: Some(Duration::from_secs(30)) };
    let h = harness(options);
    let _observer = h.authority.observe_identity().unwrap();
    h.authority.wait_ready().await;
    h.provider.add_account("pat@homenest.test", "Secret1").unwrap();
    let state = signed_in(&h, "pat@homenest.test").await;
    assert_eq!(state.role, Role::Member);

    h.backend.grant_admin("pat@homenest.test");
    tokio::time::sleep(Duration::from_secs(31)).await;
    let promoted = h.authority.wait_until(|s| s.is_admin()).await;
    assert_eq!(promoted.uid(), state.uid());

    h.backend.revoke_admin("pat@homenest.test");
    tokio::time::sleep(Duration::from_secs(30)).await;
    let demoted = h.authority.wait_until(|s| !s.is_admin()).await;
    assert!(demoted.is_signed_in());
    assert!(demoted.generation > promoted.generation);
}
