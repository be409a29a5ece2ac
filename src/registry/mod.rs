//! System registry
//!
//! Static list of known animatronic systems and their resolved credentials.
//! Built once at startup and never mutated afterwards.

mod credentials;

pub use credentials::{env_prefix, Credentials, DEFAULT_PASSWORD_KEY, DEFAULT_USER_KEY};

use animatronic_shared::{AnimatronicSystem, ControlError, ControlResult};
use std::collections::HashMap;

/// Immutable registry of systems keyed by id
#[derive(Debug, Clone)]
pub struct SystemRegistry {
    /// Systems in configuration order
    systems: Vec<AnimatronicSystem>,
    credentials: HashMap<String, Credentials>,
    default_credentials: Credentials,
}

impl SystemRegistry {
    /// Build a registry, resolving credentials from the process environment
    pub fn from_env(systems: Vec<AnimatronicSystem>) -> Self {
        Self::with_lookup(systems, |key| std::env::var(key).ok())
    }

    /// Build a registry, resolving credentials through `lookup`
    pub fn with_lookup<F>(systems: Vec<AnimatronicSystem>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_credentials = credentials::resolve_default(&lookup);
        let credentials = systems
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    credentials::resolve_for(&s.id, &default_credentials, &lookup),
                )
            })
            .collect();

        Self {
            systems,
            credentials,
            default_credentials,
        }
    }

    /// Build a registry where every system uses the same credentials
    pub fn with_credentials(systems: Vec<AnimatronicSystem>, creds: Credentials) -> Self {
        let credentials = systems
            .iter()
            .map(|s| (s.id.clone(), creds.clone()))
            .collect();
        Self {
            systems,
            credentials,
            default_credentials: creds,
        }
    }

    pub fn get(&self, system_id: &str) -> Option<&AnimatronicSystem> {
        self.systems.iter().find(|s| s.id == system_id)
    }

    /// Like [`get`](Self::get) but fails with `UnknownSystem`
    pub fn require(&self, system_id: &str) -> ControlResult<&AnimatronicSystem> {
        self.get(system_id)
            .ok_or_else(|| ControlError::UnknownSystem(system_id.to_string()))
    }

    pub fn contains(&self, system_id: &str) -> bool {
        self.get(system_id).is_some()
    }

    pub fn all(&self) -> &[AnimatronicSystem] {
        &self.systems
    }

    pub fn enabled(&self) -> impl Iterator<Item = &AnimatronicSystem> {
        self.systems.iter().filter(|s| s.enabled)
    }

    /// Credentials for a system, falling back to the default pair
    pub fn credentials_for(&self, system_id: &str) -> &Credentials {
        self.credentials
            .get(system_id)
            .unwrap_or(&self.default_credentials)
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}
