//! Session error model and classification helpers.
//! Identity provider and backend failures are re-classified here into the
//! taxonomy consumed by guards and pages; nothing above the session authority
//! ever branches on a transport error shape.

use thiserror::Error;

use crate::backend::BackendError;
use crate::identity::{FederatedFailure, ProviderError};

/// Coarse grouping used by pages to decide how to surface an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad email/password or rejected sign-up input. The user retries.
    Credential,
    /// Popup blocked or dismissed during a federated sign-in.
    FederatedFlow,
    /// Transient provider/backend outage. The user retries or switches method.
    ProviderUnavailable,
    /// Authenticated but not allowed. Not retryable.
    PermissionDenied,
    /// Advisory profile upsert failed. Logged only.
    ProfileSync,
    /// Operation needs a session state the caller does not have.
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredential,
    #[error("no account exists for this email")]
    AccountNotFound,
    #[error("malformed email address")]
    InvalidEmail,
    #[error("an account already exists for this email")]
    EmailInUse,
    #[error("password rejected: {}", .0.join("; "))]
    WeakPassword(Vec<String>),
    #[error("sign-in popup was blocked")]
    PopupBlocked,
    #[error("sign-in was cancelled")]
    UserCancelled,
    #[error("identity service unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("profile sync failed: {0}")]
    ProfileSyncFailed(String),
    #[error("no signed-in identity")]
    NotSignedIn,
    #[error("identity observer already registered")]
    AlreadyObserving,
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::InvalidCredential
            | AuthError::AccountNotFound
            | AuthError::InvalidEmail
            | AuthError::EmailInUse
            | AuthError::WeakPassword(_) => ErrorCategory::Credential,
            AuthError::PopupBlocked | AuthError::UserCancelled => ErrorCategory::FederatedFlow,
            AuthError::ProviderUnavailable(_) => ErrorCategory::ProviderUnavailable,
            AuthError::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            AuthError::ProfileSyncFailed(_) => ErrorCategory::ProfileSync,
            AuthError::NotSignedIn | AuthError::AlreadyObserving => ErrorCategory::Session,
        }
    }

    /// Stable machine-readable code, shaped like the identity provider's own codes.
    pub fn code_str(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "auth/invalid-credential",
            AuthError::AccountNotFound => "auth/user-not-found",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::EmailInUse => "auth/email-already-in-use",
            AuthError::WeakPassword(_) => "auth/weak-password",
            AuthError::PopupBlocked => "auth/popup-blocked",
            AuthError::UserCancelled => "auth/popup-closed-by-user",
            AuthError::ProviderUnavailable(_) => "auth/network-request-failed",
            AuthError::PermissionDenied(_) => "auth/permission-denied",
            AuthError::ProfileSyncFailed(_) => "profile/sync-failed",
            AuthError::NotSignedIn => "auth/no-current-user",
            AuthError::AlreadyObserving => "session/already-observing",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Credential | ErrorCategory::FederatedFlow | ErrorCategory::ProviderUnavailable
        )
    }

    /// Inline message shown next to the sign-in and sign-up forms.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::AccountNotFound => "No user found with this email!".to_string(),
            AuthError::InvalidCredential => "Invalid email or password!".to_string(),
            AuthError::InvalidEmail => "Invalid email address!".to_string(),
            AuthError::EmailInUse => "An account with this email already exists!".to_string(),
            AuthError::WeakPassword(reasons) => reasons.join("\n"),
            AuthError::PopupBlocked => "The sign-in popup was blocked. Allow popups and try again.".to_string(),
            AuthError::UserCancelled => "Sign-in was cancelled.".to_string(),
            AuthError::ProviderUnavailable(_) => "Login failed! Please try again in a moment.".to_string(),
            AuthError::PermissionDenied(_) => "You don't have permission to access this page.".to_string(),
            AuthError::ProfileSyncFailed(_) => "Your profile could not be saved.".to_string(),
            AuthError::NotSignedIn => "Please sign in first.".to_string(),
            AuthError::AlreadyObserving => "Session is already being observed.".to_string(),
        }
    }

    /// Classify an identity provider failure.
    pub fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { code, message } => classify_provider_code(&code, message),
            ProviderError::Federated(FederatedFailure::PopupBlocked) => AuthError::PopupBlocked,
            ProviderError::Federated(FederatedFailure::Cancelled) => AuthError::UserCancelled,
            ProviderError::Transport(msg) => AuthError::ProviderUnavailable(msg),
            ProviderError::NoCurrentUser => AuthError::NotSignedIn,
        }
    }

    /// Classify a backend API failure. Authorization rejections become
    /// `PermissionDenied`; everything else is an outage.
    pub fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized(status) => {
                AuthError::PermissionDenied(format!("backend rejected credential (HTTP {})", status))
            }
            other => AuthError::ProviderUnavailable(other.to_string()),
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self { AuthError::from_provider(err) }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self { AuthError::from_backend(err) }
}

fn classify_provider_code(code: &str, message: Option<String>) -> AuthError {
    // Provider codes may carry a detail suffix, e.g. "WEAK_PASSWORD : Password should be ..."
    let base = code.split(" : ").next().unwrap_or(code).trim();
    match base {
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => AuthError::AccountNotFound,
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_CREDENTIAL" => AuthError::InvalidCredential,
        "INVALID_EMAIL" | "MISSING_EMAIL" => AuthError::InvalidEmail,
        "MISSING_PASSWORD" => AuthError::InvalidCredential,
        "EMAIL_EXISTS" => AuthError::EmailInUse,
        "WEAK_PASSWORD" => {
            let detail = message
                .or_else(|| code.split_once(" : ").map(|(_, d)| d.trim().to_string()))
                .unwrap_or_else(|| "Password should be at least 6 characters".to_string());
            AuthError::WeakPassword(vec![detail])
        }
        "USER_DISABLED" | "OPERATION_NOT_ALLOWED" | "PERMISSION_DENIED" => {
            AuthError::PermissionDenied(base.to_ascii_lowercase())
        }
        "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" | "INVALID_REFRESH_TOKEN" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            AuthError::NotSignedIn
        }
        other => AuthError::ProviderUnavailable(other.to_ascii_lowercase()),
    }
}
