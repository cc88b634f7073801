//! Identifiers for services (processes that expose a network host/port)
//!
//! A service is addressed by a [`ServiceKey`]: a name such as `"frontend"`
//! plus a tier such as `"local"` or `"k8s"`. Only one provider may exist per
//! key across a Petsfile and everything it loads.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a string is not a valid service identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} {value:?} contains invalid character {ch:?} (allowed: letters, digits, '-', '_', '.')")]
    InvalidChar {
        kind: &'static str,
        value: String,
        ch: char,
    },

    #[error("{kind} {value:?} must start with a letter or digit")]
    InvalidStart { kind: &'static str, value: String },
}

fn validate(kind: &'static str, value: &str) -> Result<(), KeyError> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(KeyError::Empty { kind });
    };
    if !first.is_ascii_alphanumeric() {
        return Err(KeyError::InvalidStart {
            kind,
            value: value.to_string(),
        });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(KeyError::InvalidChar {
            kind,
            value: value.to_string(),
            ch,
        });
    }
    Ok(())
}

/// A name for the service, e.g. `"my-frontend"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();
        validate("service name", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tier for the service, e.g. `"local"`, `"staging"`, `"k8s"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    pub fn new(tier: impl Into<String>) -> Result<Self, KeyError> {
        let tier = tier.into();
        validate("tier", &tier)?;
        Ok(Self(tier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The primary key for one way of running a service.
///
/// The empty key (see [`ServiceKey::global`]) is the top-level scope used
/// while a Petsfile is evaluated outside of any provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub name: ServiceName,
    pub tier: Tier,
}

impl ServiceKey {
    /// Build a key from raw strings, validating both halves.
    pub fn new(name: impl Into<String>, tier: impl Into<String>) -> Result<Self, KeyError> {
        Ok(Self {
            name: ServiceName::new(name)?,
            tier: Tier::new(tier)?,
        })
    }

    pub fn from_parts(name: ServiceName, tier: Tier) -> Self {
        Self { name, tier }
    }

    pub fn global() -> Self {
        Self::default()
    }

    pub fn is_global(&self) -> bool {
        self.name.is_empty() && self.tier.is_empty()
    }

    /// The same service on a different tier.
    pub fn with_tier(&self, tier: Tier) -> Self {
        Self {
            name: self.name.clone(),
            tier,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("global")
        } else {
            write!(f, "{}-{}", self.name, self.tier)
        }
    }
}
