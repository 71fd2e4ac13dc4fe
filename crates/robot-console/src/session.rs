//! Operator session inputs (credentials and server override).

#![allow(missing_docs)]

use smol_str::SmolStr;

pub const ENV_AUTH_TOKEN: &str = "ROBOT_AUTH_TOKEN";
pub const ENV_USERNAME: &str = "ROBOT_USERNAME";
pub const ENV_USER_PRIVILEGE: &str = "ROBOT_USER_PRIVILEGE";
pub const ENV_SERVER_IP: &str = "ROBOT_SERVER_IP";

/// Read-only session context supplied by the login flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub auth_token: Option<SmolStr>,
    pub username: Option<SmolStr>,
    pub user_privilege: Option<SmolStr>,
    pub server_ip: Option<SmolStr>,
}

impl Session {
    /// Build a session from the `ROBOT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            auth_token: env_value(ENV_AUTH_TOKEN),
            username: env_value(ENV_USERNAME),
            user_privilege: env_value(ENV_USER_PRIVILEGE),
            server_ip: env_value(ENV_SERVER_IP),
        }
    }

    /// Inject `token`/`user` into an RPC parameter object; absent values are skipped.
    pub fn inject(&self, params: &mut serde_json::Map<String, serde_json::Value>) {
        if let Some(token) = self.auth_token.as_ref() {
            params.insert("token".into(), token.as_str().into());
        }
        if let Some(user) = self.username.as_ref() {
            params.insert("user".into(), user.as_str().into());
        }
    }

    /// Human-readable session summary for the operator log.
    #[must_use]
    pub fn summary(&self) -> String {
        let token = self.auth_token.as_deref().map_or_else(
            || "not available".to_string(),
            |token| {
                let tail: String = token
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("...{tail}")
            },
        );
        format!(
            "user={} privilege={} server={} token={token}",
            self.username.as_deref().unwrap_or("unidentified"),
            self.user_privilege.as_deref().unwrap_or("undefined"),
            self.server_ip.as_deref().unwrap_or("not configured"),
        )
    }
}

fn env_value(name: &str) -> Option<SmolStr> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(SmolStr::new)
}
