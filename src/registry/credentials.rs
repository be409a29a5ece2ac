//! Credential resolution for registered systems
//!
//! Each system may carry its own credential pair in the environment under
//! `<ID>_SSH_USER` / `<ID>_SSH_PASSWORD`; anything missing falls back to the
//! `DEFAULT_SSH_USER` / `DEFAULT_SSH_PASSWORD` pair. Resolution happens once at
//! startup.

use animatronic_shared::defaults;

/// Environment key for the default user
pub const DEFAULT_USER_KEY: &str = "DEFAULT_SSH_USER";
/// Environment key for the default password
pub const DEFAULT_PASSWORD_KEY: &str = "DEFAULT_SSH_PASSWORD";

const USER_SUFFIX: &str = "_SSH_USER";
const PASSWORD_SUFFIX: &str = "_SSH_PASSWORD";

/// A username/password pair used to open a session
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Environment prefix for a system id: uppercase, separators folded to `_`
pub fn env_prefix(system_id: &str) -> String {
    system_id
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Resolve the default credential pair through `lookup`
pub fn resolve_default<F>(lookup: &F) -> Credentials
where
    F: Fn(&str) -> Option<String>,
{
    Credentials {
        username: lookup(DEFAULT_USER_KEY).unwrap_or_else(|| defaults::FALLBACK_USER.into()),
        password: lookup(DEFAULT_PASSWORD_KEY)
            .unwrap_or_else(|| defaults::FALLBACK_PASSWORD.into()),
    }
}

/// Resolve the credential pair for one system, field by field
pub fn resolve_for<F>(system_id: &str, fallback: &Credentials, lookup: &F) -> Credentials
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = env_prefix(system_id);
    Credentials {
        username: lookup(&format!("{}{}", prefix, USER_SUFFIX))
            .unwrap_or_else(|| fallback.username.clone()),
        password: lookup(&format!("{}{}", prefix, PASSWORD_SUFFIX))
            .unwrap_or_else(|| fallback.password.clone()),
    }
}
