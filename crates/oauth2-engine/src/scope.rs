//! Scope parsing and subset rules (RFC 6749 §3.3).
//!
//! A scope is an unordered set of case-sensitive tokens matching
//! `[A-Za-z0-9_]{2,16}`. Its canonical string form joins the tokens with a
//! single space, keeping first-occurrence order.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static SCOPE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{2,16}$").expect("scope token pattern is valid"));

/// Why a scope string was rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope is empty")]
    Empty,

    #[error("scope token {0:?} is malformed")]
    Malformed(String),
}

/// A set of scope tokens.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    tokens: Vec<String>,
}

impl Scope {
    /// Parse a space-delimited scope string, rejecting malformed tokens.
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        let mut tokens: Vec<String> = Vec::new();
        for token in raw.split_ascii_whitespace() {
            if !SCOPE_TOKEN.is_match(token) {
                return Err(ScopeError::Malformed(token.to_owned()));
            }
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_owned());
            }
        }
        if tokens.is_empty() {
            return Err(ScopeError::Empty);
        }
        Ok(Self { tokens })
    }

    /// Split a stored or required scope without format checks.
    ///
    /// Used for values the engine did not receive from a client, such as the
    /// scope a resource requires or the scope recorded on a token.
    #[must_use]
    pub fn lenient(raw: &str) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        for token in raw.split_ascii_whitespace() {
            if !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_owned());
            }
        }
        Self { tokens }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// True when every token of `self` also appears in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.tokens.iter().all(|t| other.contains(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset_of(other)
    }
}

impl Eq for Scope {}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check a requested scope the way the authorization and token endpoints do.
///
/// - a present scope must be well formed and a subset of `supported`;
/// - when `ceiling` is given (refresh grant), it must also be a subset of it;
/// - an absent scope falls back to `default`, or fails when there is none.
pub fn check_requested(
    requested: Option<&str>,
    supported: &Scope,
    default: Option<&Scope>,
    ceiling: Option<&Scope>,
) -> crate::ProtocolResult<Scope> {
    use crate::ProtocolError;

    let Some(raw) = requested else {
        return default
            .cloned()
            .ok_or_else(|| ProtocolError::invalid_scope("The scope is mandatory"));
    };

    let scope = Scope::parse(raw)
        .map_err(|_| ProtocolError::invalid_scope("The requested scope is invalid or malformed"))?;

    if !scope.is_subset_of(supported) {
        return Err(ProtocolError::invalid_scope("The requested scope is invalid or unknown"));
    }
    if let Some(granted) = ceiling {
        if !scope.is_subset_of(granted) {
            return Err(ProtocolError::invalid_scope(
                "The requested scope exceeds the scope originally granted",
            ));
        }
    }
    Ok(scope)
}

/// Resource-side sufficiency: does `granted` cover `required`?
///
/// An empty requirement is satisfied by any grant; a non-empty requirement is
/// never satisfied by an empty grant.
#[must_use]
pub fn is_sufficient(required: &Scope, granted: &Scope) -> bool {
    if required.is_empty() {
        return true;
    }
    if granted.is_empty() {
        return false;
    }
    required.is_subset_of(granted)
}
