use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Settings of the authenticated HTTP client.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ClientConfig {
    /// Backend root, e.g. `https://atms.example.org/api`.
    pub base_url: String,
    /// Timeout applied to every call, refresh calls included.
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    /// Refresh attempts tolerated before the session is forcibly reset.
    #[serde(default = "default_refresh_attempt_ceiling")]
    pub refresh_attempt_ceiling: u32,
    /// Tokens closer than this to their expiry are logged as expiring soon.
    #[serde(default = "default_expiry_warning_seconds")]
    pub expiry_warning_seconds: i64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Requests whose path contains this marker never trigger a refresh.
    #[serde(default = "default_auth_path_marker")]
    pub auth_path_marker: String,
}

fn default_timeout_in_ms() -> u64 {
    10_000
}

fn default_refresh_attempt_ceiling() -> u32 {
    2
}

fn default_expiry_warning_seconds() -> i64 {
    300
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_auth_path_marker() -> String {
    "/auth/".to_string()
}

impl ClientConfig {
    /// A config with every default applied.
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            timeout_in_ms: default_timeout_in_ms(),
            refresh_attempt_ceiling: default_refresh_attempt_ceiling(),
            expiry_warning_seconds: default_expiry_warning_seconds(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            auth_path_marker: default_auth_path_marker(),
        }
    }
}

/// Where terminal auth failures send the user.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct NavigationConfig {
    /// Base path the application is served under (`/atms`), empty for root.
    #[serde(default)]
    pub base_path: String,
}
