use serde::{Deserialize, Serialize};

use super::permissions::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AuthMode {
    None,
    ApiKey,
    BearerToken,
}

/// A static API key and the principal it authenticates as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
    #[serde(default = "default_key_role")]
    pub role: String,
}

fn default_key_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub mode: AuthMode,
    #[serde(default)]
    pub api_keys: Option<Vec<ApiKeyEntry>>,
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub jwt_algorithm: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AuthMode::None,
            api_keys: None,
            jwt_secret: None,
            jwt_algorithm: Some("HS256".to_string()),
        }
    }
}

/// Principal attached to each request by the auth middleware
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub roles: Vec<String>,
}

impl AuthContext {
    /// Principal used for every request when authentication is disabled.
    pub fn local_admin() -> Self {
        Self {
            authenticated: true,
            user_id: Some("local".to_string()),
            roles: vec!["admin".to_string()],
        }
    }

    pub fn role(&self) -> Role {
        if !self.authenticated {
            return Role::Guest;
        }
        Role::from_roles(&self.roles)
    }

    pub fn caller_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("")
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }
}
