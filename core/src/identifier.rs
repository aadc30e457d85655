//! Identifiers for aggregates and sagas.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `Identifier` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdentifierError(String);

/// Unique identifier of an aggregate or saga instance.
///
/// Identifiers are opaque strings. Aggregate identifiers are conventionally
/// namespaced with the lowercased aggregate type name, for example
/// `"order-5f0c..."`; see [`Identifier::namespaced`].
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (trusted input)
///
/// # Examples
///
/// ```
/// use eventide_core::Identifier;
///
/// let id = Identifier::new("order-12345");
/// assert_eq!(id.as_str(), "order-12345");
///
/// let parsed: Identifier = "customer-abc".parse().unwrap();
/// assert_eq!(parsed, Identifier::new("customer-abc"));
/// ```
///
/// On the wire an identifier is a string; numeric ids are accepted and kept in
/// their decimal form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identifier(String);

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Number(n) => Self::from(n),
        })
    }
}

impl Identifier {
    /// Create a new `Identifier` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a `"<lowercased-type-name>-<raw-id>"` identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_core::Identifier;
    ///
    /// let id = Identifier::namespaced("Order", "42");
    /// assert_eq!(id.as_str(), "order-42");
    /// ```
    #[must_use]
    pub fn namespaced(type_name: &str, raw: impl fmt::Display) -> Self {
        Self(format!("{}-{raw}", type_name.to_lowercase()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is the empty string.
    ///
    /// Empty identifiers are treated like absent ones by every validator.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert the `Identifier` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdentifierError(
                "Identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for Identifier {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
