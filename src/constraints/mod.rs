//! Security constraints: deny rules keyed by role and public permit rules.
//!
//! Evaluation is pure and never fails. Anything that could be wrong with a
//! policy (bad pattern, bad method token) is rejected when it is deserialized,
//! so a running server only ever holds valid constraints.

mod pattern;

pub use self::pattern::{Pattern, PatternError};

use axum::http::Method;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const ANY_METHOD: &str = "*";

/// Set of HTTP method tokens, upper-cased on load. `*` admits every method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct MethodSet {
    any: bool,
    methods: BTreeSet<String>,
}

impl MethodSet {
    #[must_use]
    pub fn contains(&self, method: &Method) -> bool {
        self.any || self.methods.contains(method.as_str())
    }
}

impl TryFrom<Vec<String>> for MethodSet {
    type Error = String;

    fn try_from(values: Vec<String>) -> Result<Self, Self::Error> {
        let mut set = Self::default();
        for value in values {
            let token = value.trim().to_ascii_uppercase();
            if token == ANY_METHOD {
                set.any = true;
                continue;
            }
            let method = Method::from_bytes(token.as_bytes())
                .map_err(|_| format!("invalid HTTP method: {value:?}"))?;
            set.methods.insert(method.as_str().to_string());
        }
        Ok(set)
    }
}

/// For paths matching `pattern`, only roles whose mapping lists the method pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyMatcher {
    pub pattern: Pattern,
    #[serde(default)]
    pub role_mappings: BTreeMap<String, MethodSet>,
}

/// Paths matching `pattern` are reachable without credentials for `methods`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermitMatcher {
    pub pattern: Pattern,
    pub methods: MethodSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecurityConstraints {
    #[serde(default, rename = "constraints")]
    pub deny_matchers: Vec<DenyMatcher>,
    #[serde(default, rename = "publicConstraints")]
    pub permit_matchers: Vec<PermitMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// A permit matcher opened the path.
    Public,
    /// No deny matcher covers the path.
    Unconstrained,
    RoleGranted { pattern: String, role: String },
    NoRoleGranted { pattern: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public path"),
            Self::Unconstrained => f.write_str("no constraint covers the path"),
            Self::RoleGranted { pattern, role } => {
                write!(f, "role {role} granted by constraint {pattern}")
            }
            Self::NoRoleGranted { pattern } => {
                write!(f, "no role granted by constraint {pattern}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: Reason,
}

impl AuthorizationDecision {
    #[must_use]
    pub const fn allow(reason: Reason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    #[must_use]
    pub const fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

impl SecurityConstraints {
    #[must_use]
    pub const fn new(deny_matchers: Vec<DenyMatcher>, permit_matchers: Vec<PermitMatcher>) -> Self {
        Self {
            deny_matchers,
            permit_matchers,
        }
    }

    /// True when a permit matcher covers both the path and the method.
    #[must_use]
    pub fn is_public(&self, path: &str, method: &Method) -> bool {
        self.permit_matchers
            .iter()
            .any(|permit| permit.pattern.matches(path) && permit.methods.contains(method))
    }

    /// Decide whether a caller holding `roles` may use `method` on `path`.
    ///
    /// The most specific deny matcher for the path decides; when none matches
    /// the path is open.
    #[must_use]
    pub fn evaluate(
        &self,
        path: &str,
        method: &Method,
        roles: &BTreeSet<String>,
    ) -> AuthorizationDecision {
        let Some(matcher) = self.deny_matcher_for(path) else {
            return AuthorizationDecision::allow(Reason::Unconstrained);
        };

        let pattern = matcher.pattern.to_string();

        let granted = roles.iter().find(|role| {
            matcher
                .role_mappings
                .get(role.as_str())
                .is_some_and(|methods| methods.contains(method))
        });

        match granted {
            Some(role) => AuthorizationDecision::allow(Reason::RoleGranted {
                pattern,
                role: role.clone(),
            }),
            None => AuthorizationDecision::deny(Reason::NoRoleGranted { pattern }),
        }
    }

    // Longest literal prefix wins; on a tie the first declared matcher stays.
    fn deny_matcher_for(&self, path: &str) -> Option<&DenyMatcher> {
        self.deny_matchers
            .iter()
            .filter(|matcher| matcher.pattern.matches(path))
            .fold(None, |best: Option<&DenyMatcher>, candidate| match best {
                Some(current)
                    if current.pattern.specificity() >= candidate.pattern.specificity() =>
                {
                    Some(current)
                }
                _ => Some(candidate),
            })
    }
}
