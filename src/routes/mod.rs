//! Route surface: the page table, capability guards and navigation decisions.

mod guard;
mod menu;
mod navigator;
mod table;

pub use guard::{GuardDecision, Requirement, RouteGuard, ACCESS_DENIED_MESSAGE, DEFAULT_LANDING_PATH, DEFAULT_LOGIN_PATH};
pub use menu::{dashboard_menu, dashboard_title, MenuItem};
pub use navigator::{from_login_url, login_url, Navigation, Navigator};
pub use table::{normalize_path, resolve, route_count, RouteMatch};
