//! User API credentials
//!
//! Values live on the host; this keeps the last fetched copy and checks
//! keys locally before an update is sent.

use std::collections::BTreeMap;

use envpilot_core::prelude::*;
use envpilot_core::validate_credential_key;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsState {
    pub values: BTreeMap<String, String>,
    pub loaded: bool,
    pub loading: bool,
    /// Update sent, waiting for the host
    pub saving: Option<BTreeMap<String, String>>,
    pub error: Option<String>,
}

impl CredentialsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys with a non-empty value
    pub fn configured_keys(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, _)| k.as_str())
    }

    /// Value with everything but the last four characters masked
    pub fn masked(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| mask(v))
    }
}

/// Validate every key of an update
pub fn validate_credentials(credentials: &BTreeMap<String, String>) -> Result<()> {
    for key in credentials.keys() {
        validate_credential_key(key)?;
    }
    Ok(())
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_credentials() {
        let mut creds = BTreeMap::new();
        creds.insert("fmp_api_key".to_string(), "abc".to_string());
        assert!(validate_credentials(&creds).is_ok());

        creds.insert("bad key".to_string(), "x".to_string());
        let err = validate_credentials(&creds).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_masked() {
        let mut state = CredentialsState::new();
        state
            .values
            .insert("fmp_api_key".into(), "sk-123456789".into());
        state.values.insert("short".into(), "abc".into());
        assert_eq!(state.masked("fmp_api_key").unwrap(), "********6789");
        assert_eq!(state.masked("short").unwrap(), "***");
        assert_eq!(state.masked("missing"), None);
    }

    #[test]
    fn test_configured_keys_skip_blank() {
        let mut state = CredentialsState::new();
        state.values.insert("a".into(), "1".into());
        state.values.insert("b".into(), " ".into());
        assert_eq!(state.configured_keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
