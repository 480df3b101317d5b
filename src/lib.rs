pub mod error;
pub mod config;
pub mod identity;
pub mod backend;
pub mod routes;
pub mod cli;

pub use config::Config;
pub use error::{AuthError, AuthResult, ErrorCategory};
pub use identity::{Identity, Readiness, Role, SessionAuthority, SessionOptions, SessionState};
pub use routes::{Navigation, Navigator, RouteGuard};
