use serde::Serialize;

use crate::identity::{SessionAuthority, SessionState};

pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_LANDING_PATH: &str = "/";
pub const ACCESS_DENIED_MESSAGE: &str = "You don't have permission to access this page.";

/// Static capability requirement attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Public,
    Authenticated,
    Administrator,
}

/// Outcome of evaluating a guard for one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Provider has not reported yet: show a placeholder, decide nothing.
    Loading,
    Render,
    /// Not signed in. `from` is the originally requested location.
    RedirectToLogin { login: String, from: String },
    /// Signed in without the required privilege.
    AccessDenied { message: String, redirect_to: String },
}

/// Pure gate over [`SessionState`]; has no state of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    requirement: Requirement,
    login_path: String,
    landing_path: String,
}

impl RouteGuard {
    pub fn new(requirement: Requirement) -> Self {
        Self {
            requirement,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
        }
    }

    /// Any authenticated identity.
    pub fn authenticated() -> Self { Self::new(Requirement::Authenticated) }

    /// Authenticated and administrator.
    pub fn administrator() -> Self { Self::new(Requirement::Administrator) }

    pub fn with_paths(mut self, login_path: &str, landing_path: &str) -> Self {
        self.login_path = login_path.to_string();
        self.landing_path = landing_path.to_string();
        self
    }

    pub fn requirement(&self) -> Requirement { self.requirement }

    pub fn evaluate(&self, state: &SessionState, requested: &str) -> GuardDecision {
        if self.requirement == Requirement::Public {
            return GuardDecision::Render;
        }
        if !state.is_ready() {
            return GuardDecision::Loading;
        }
        if !state.is_signed_in() {
            return GuardDecision::RedirectToLogin { login: self.login_path.clone(), from: requested.to_string() };
        }
        if self.requirement == Requirement::Administrator && !state.is_admin() {
            return GuardDecision::AccessDenied {
                message: ACCESS_DENIED_MESSAGE.to_string(),
                redirect_to: self.landing_path.clone(),
            };
        }
        GuardDecision::Render
    }

    /// Evaluate against the authority's current capability.
    pub fn check(&self, authority: &SessionAuthority, requested: &str) -> GuardDecision {
        self.evaluate(&authority.current_capability(), requested)
    }
}
