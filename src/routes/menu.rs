use serde::Serialize;

use crate::identity::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub label: &'static str,
    pub path: &'static str,
}

const MEMBER_MENU: &[MenuItem] = &[
    MenuItem { label: "Overview", path: "/dashboard" },
    MenuItem { label: "Profile", path: "/dashboard/profile" },
    MenuItem { label: "My Properties", path: "/dashboard/my-properties" },
    MenuItem { label: "Add Property", path: "/dashboard/add-property" },
    MenuItem { label: "My Ratings", path: "/dashboard/my-ratings" },
];

const ADMIN_MENU: &[MenuItem] = &[
    MenuItem { label: "Overview", path: "/dashboard" },
    MenuItem { label: "Manage Users", path: "/dashboard/manage-users" },
    MenuItem { label: "Manage Properties", path: "/dashboard/manage-properties" },
    MenuItem { label: "Statistics", path: "/dashboard/statistics" },
    MenuItem { label: "Profile", path: "/dashboard/profile" },
];

/// Dashboard sidebar entries for `role`.
pub fn dashboard_menu(role: Role) -> &'static [MenuItem] {
    match role {
        Role::Member => MEMBER_MENU,
        Role::Administrator => ADMIN_MENU,
    }
}

/// Dashboard heading for `role`.
pub fn dashboard_title(role: Role) -> &'static str {
    match role {
        Role::Member => "User Dashboard",
        Role::Administrator => "Admin Dashboard",
    }
}
