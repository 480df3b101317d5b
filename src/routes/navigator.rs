use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::guard::{GuardDecision, Requirement, RouteGuard, DEFAULT_LANDING_PATH, DEFAULT_LOGIN_PATH};
use super::table::{normalize_path, resolve, RouteMatch};
use crate::identity::SessionAuthority;

/// What the application should do for one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Navigation {
    Render { route: &'static str, path: String },
    Loading { path: String },
    Redirect { to: String },
    AccessDenied { message: String, redirect_to: String },
    NotFound { path: String },
}

/// Resolves paths against the route table and applies the matching guard.
/// Holds the session authority as an explicit dependency.
pub struct Navigator {
    authority: Arc<SessionAuthority>,
    login_path: String,
    landing_path: String,
}

impl Navigator {
    pub fn new(authority: Arc<SessionAuthority>) -> Self {
        Self { authority, login_path: DEFAULT_LOGIN_PATH.to_string(), landing_path: DEFAULT_LANDING_PATH.to_string() }
    }

    pub fn with_paths(mut self, login_path: &str, landing_path: &str) -> Self {
        self.login_path = normalize_path(login_path);
        self.landing_path = normalize_path(landing_path);
        self
    }

    pub fn authority(&self) -> &Arc<SessionAuthority> { &self.authority }

    pub fn guard_for(&self, requirement: Requirement) -> RouteGuard {
        RouteGuard::new(requirement).with_paths(&self.login_path, &self.landing_path)
    }

    pub fn navigate(&self, path: &str) -> Navigation {
        let Some(route) = resolve(path) else {
            return Navigation::NotFound { path: normalize_path(path) };
        };
        let decision = self.guard_for(route.requirement).check(&self.authority, &requested_location(path, &route));
        debug!(target: "guard", route = route.name, ?decision, "navigation evaluated");
        match decision {
            GuardDecision::Render => Navigation::Render { route: route.name, path: route.path },
            GuardDecision::Loading => Navigation::Loading { path: route.path },
            GuardDecision::RedirectToLogin { login, from } => Navigation::Redirect { to: login_url(&login, &from) },
            GuardDecision::AccessDenied { message, redirect_to } => Navigation::AccessDenied { message, redirect_to },
        }
    }

    /// Where to go after a successful sign-in.
    ///
    /// Falls back to the landing path when `from` is absent, points back at
    /// the login/sign-up pages, or is not a local path.
    pub fn return_path(&self, from: Option<&str>) -> String {
        let Some(raw) = from.map(str::trim).filter(|f| !f.is_empty()) else {
            return self.landing_path.clone();
        };
        if !is_local_path(raw) {
            return self.landing_path.clone();
        }
        let target = normalize_path(raw);
        if target == self.login_path || resolve(&target).map(|r| r.name) == Some("signup") {
            return self.landing_path.clone();
        }
        raw.to_string()
    }
}

/// Same-origin absolute path. Browsers read `\` as `/`, so `/\host` is
/// protocol-relative just like `//host`.
fn is_local_path(raw: &str) -> bool {
    let mut chars = raw.chars();
    chars.next() == Some('/')
        && !matches!(chars.next(), Some('/') | Some('\\'))
        && !raw.contains("://")
        && !raw.chars().any(|c| c == '\\' || c.is_control())
}

/// Requested location preserved across the login redirect: normalized path
/// plus the original query string, if any.
fn requested_location(raw: &str, route: &RouteMatch) -> String {
    match raw.split_once('?') {
        Some((_, query)) if !query.is_empty() => {
            let query = query.split('#').next().unwrap_or(query);
            format!("{}?{}", route.path, query)
        }
        _ => route.path.clone(),
    }
}

pub fn login_url(login: &str, from: &str) -> String {
    format!("{}?from={}", login, urlencoding::encode(from))
}

/// Extract the preserved `from` location out of a login URL.
pub fn from_login_url(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "from")
        .and_then(|(_, v)| urlencoding::decode(v).ok().map(|s| s.into_owned()))
}
