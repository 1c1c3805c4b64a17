//! Access control models

use serde::{Deserialize, Serialize};

string_enum! {
    /// Who may read a resource
    pub enum Visibility {
        Public => "public",
        Organization => "organization",
        Role => "role",
        User => "user",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    pub visibility: Visibility,
    #[serde(default)]
    pub allowed_organizations: Vec<String>,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl AccessControl {
    pub fn public() -> Self {
        Self {
            visibility: Visibility::Public,
            allowed_organizations: Vec::new(),
            allowed_roles: Vec::new(),
            allowed_users: Vec::new(),
        }
    }

    pub fn user_only(owner: &str) -> Self {
        Self {
            visibility: Visibility::User,
            allowed_users: vec![owner.to_string()],
            ..Self::public()
        }
    }

    pub fn organization(org: &str) -> Self {
        Self {
            visibility: Visibility::Organization,
            allowed_organizations: vec![org.to_string()],
            ..Self::public()
        }
    }
}

/// Identity of the caller as asserted by the gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Allowed to publish resources publicly
    #[serde(default)]
    pub can_publish: bool,
}

impl Requester {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn in_organization(mut self, org: &str) -> Self {
        self.organization_id = Some(org.to_string());
        self
    }
}
