//! Identity lifecycle and role derivation for the marketplace client.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod provider;
mod local;
mod rest;
mod policy;
mod authorizer;
mod session;

pub use principal::{Identity, ProfileRecord};
pub use provider::{FederatedFailure, IdentityListener, IdentityProvider, ListenerSet, ProviderError, Subscription};
pub use local::{FederatedOutcome, LocalIdentityProvider};
pub use rest::{FederatedFlow, IdpCredential, RestIdentityProvider, RestProviderConfig};
pub use policy::{password_violations, validate_password, MIN_PASSWORD_LEN};
pub use authorizer::{lookup_role, resolve_role, Role};
pub use session::{ObserverHandle, Readiness, SessionAuthority, SessionOptions, SessionState};
