//! Email address policy
//!
//! The `validate_email` transition records an address without looking at it.
//! Hosts that want a check call [`EmailPolicy::is_valid`] first and only
//! dispatch the transition when it passes.

use regex::Regex;

/// Accepts anything shaped like `local@domain.tld`
pub const DEFAULT_EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

#[derive(Debug, Clone)]
pub struct EmailPolicy {
    pattern: Regex,
    allowlist: Vec<String>,
}

impl EmailPolicy {
    pub fn new(pattern: &str, allowlist: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            allowlist: allowlist
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        })
    }

    pub fn is_valid(&self, email: &str) -> bool {
        let email = email.trim();
        if email.is_empty() {
            return false;
        }
        self.allowlist.iter().any(|a| a == email) || self.pattern.is_match(email)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for EmailPolicy {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_EMAIL_PATTERN).expect("default pattern compiles"),
            allowlist: Vec::new(),
        }
    }
}
