use serde::{Deserialize, Serialize};

/// The signed-in principal as reported by the identity provider.
///
/// The bearer credential is not part of this projection; it is obtained on
/// demand through [`super::IdentityProvider::bearer_credential`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new<S: Into<String>>(uid: S) -> Self {
        Self { uid: uid.into(), ..Default::default() }
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_profile(mut self, display_name: Option<String>, photo_url: Option<String>) -> Self {
        self.display_name = display_name;
        self.photo_url = photo_url;
        self
    }

    /// Name shown in navigation: display name, else the email local part, else "User".
    pub fn display_label(&self) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            return local.to_string();
        }
        "User".to_string()
    }

    /// Body of the backend's profile upsert call.
    pub fn profile_record(&self) -> ProfileRecord {
        ProfileRecord {
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}
