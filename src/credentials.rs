use std::collections::HashMap;
use std::fmt;

/// Environment variables read by [`Credentials::from_env`], keyed by provider name.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
];

/// Lookup of provider name to API key.
pub trait CredentialSource {
    fn has_credential(&self, provider: &str) -> bool;

    fn get_credential(&self, provider: &str) -> Option<&str>;
}

/// In-memory credential map, assembled once at start-up.
#[derive(Clone, Default)]
pub struct Credentials {
    keys: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the well-known `*_API_KEY` variables from the process environment.
    ///
    /// Unset or blank variables are skipped.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (used by `from_env`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        ENV_KEYS
            .iter()
            .filter_map(|&(provider, var)| lookup(var).map(|key| (provider, key)))
            .fold(Self::new(), |creds, (provider, key)| creds.with(provider, key))
    }

    /// Add a key. Blank keys are ignored.
    pub fn with(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider.into(), key.trim().to_string());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Configured provider names, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl CredentialSource for Credentials {
    fn has_credential(&self, provider: &str) -> bool {
        self.keys.contains_key(provider)
    }

    fn get_credential(&self, provider: &str) -> Option<&str> {
        self.keys.get(provider).map(String::as_str)
    }
}

// Keys never reach logs through Debug.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("providers", &self.providers())
            .finish()
    }
}
