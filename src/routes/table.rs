use once_cell::sync::Lazy;
use regex::Regex;

use super::guard::Requirement;

/// (pattern, name, requirement) for every page of the marketplace client.
const ROUTES: &[(&str, &str, Requirement)] = &[
    ("/", "home", Requirement::Public),
    ("/properties", "properties", Requirement::Public),
    ("/about", "about", Requirement::Public),
    ("/contact", "contact", Requirement::Public),
    ("/login", "login", Requirement::Public),
    ("/signup", "signup", Requirement::Public),
    ("/properties/:id", "property-details", Requirement::Authenticated),
    ("/dashboard", "dashboard-overview", Requirement::Authenticated),
    ("/dashboard/profile", "profile", Requirement::Authenticated),
    ("/dashboard/my-properties", "my-properties", Requirement::Authenticated),
    ("/dashboard/add-property", "add-property", Requirement::Authenticated),
    ("/dashboard/edit-property/:id", "edit-property", Requirement::Authenticated),
    ("/dashboard/my-ratings", "my-ratings", Requirement::Authenticated),
    ("/dashboard/manage-users", "manage-users", Requirement::Administrator),
    ("/dashboard/manage-properties", "manage-properties", Requirement::Administrator),
    ("/dashboard/statistics", "statistics", Requirement::Administrator),
];

struct CompiledRoute {
    name: &'static str,
    requirement: Requirement,
    regex: Regex,
    params: Vec<&'static str>,
}

fn compile(pattern: &'static str) -> (String, Vec<&'static str>) {
    let mut params = Vec::new();
    let mut re = String::from("^");
    for seg in pattern.split('/').filter(|s| !s.is_empty()) {
        re.push('/');
        if let Some(name) = seg.strip_prefix(':') {
            params.push(name);
            re.push_str("([^/]+)");
        } else {
            re.push_str(&regex::escape(seg));
        }
    }
    if re == "^" {
        re.push('/');
    }
    re.push('$');
    (re, params)
}

static TABLE: Lazy<Vec<CompiledRoute>> = Lazy::new(|| {
    ROUTES
        .iter()
        .filter_map(|&(pattern, name, requirement)| {
            let (re, params) = compile(pattern);
            // Patterns are static and built from escaped literals.
            Regex::new(&re).ok().map(|regex| CompiledRoute { name, requirement, regex, params })
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub name: &'static str,
    pub requirement: Requirement,
    pub path: String,
    pub params: Vec<(&'static str, String)>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }
}

/// Strip query string, fragment and trailing slashes; always starts with `/`.
pub fn normalize_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let trimmed = raw[..end].trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Find the route serving `path`; `None` means the not-found page.
pub fn resolve(path: &str) -> Option<RouteMatch> {
    let path = normalize_path(path);
    TABLE.iter().find_map(|route| {
        let caps = route.regex.captures(&path)?;
        let params = route
            .params
            .iter()
            .enumerate()
            .filter_map(|(i, name)| caps.get(i + 1).map(|m| (*name, m.as_str().to_string())))
            .collect();
        Some(RouteMatch { name: route.name, requirement: route.requirement, path: path.clone(), params })
    })
}

pub fn route_count() -> usize { TABLE.len() }
