//! Header redaction policy for captured exchanges.
//!
//! # Responsibilities
//! - Decide per header name whether a captured header is kept, redacted or deleted
//! - Layer a route's policy over the global one
//! - Produce the filtered header list handed to log sinks
//!
//! # Resolution order
//! 1. `authorization` → always redacted
//! 2. `content-type`, `content-length`, `content-encoding` → always kept
//! 3. exact include entry → its rule
//! 4. any include entries exist → deleted
//! 5. exact exclude entry → its rule
//! 6. otherwise kept
//!
//! Names compare case-insensitively; keys are stored lowercase.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Replacement value for redacted headers.
pub const REDACTED: &str = "[REDACTED]";

/// Headers content decoding depends on; never altered.
const UNTOUCHABLE: [&str; 3] = ["content-type", "content-length", "content-encoding"];

/// Per-header decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderRule {
    Keep,
    Redact,
    Delete,
}

/// Rejected policy definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderPolicyError {
    #[error("header policy defines both include and exclude rules")]
    Ambiguous,
}

/// Include and exclude rule sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPolicy {
    includes: HashMap<String, HeaderRule>,
    excludes: HashMap<String, HeaderRule>,
}

impl HeaderPolicy {
    /// Build a policy without checking for ambiguity.
    ///
    /// Merged policies legitimately carry both sets; configuration input goes
    /// through [`try_new`](Self::try_new) instead.
    pub fn new<I, E, K, L>(includes: I, excludes: E) -> Self
    where
        I: IntoIterator<Item = (K, HeaderRule)>,
        E: IntoIterator<Item = (L, HeaderRule)>,
        K: AsRef<str>,
        L: AsRef<str>,
    {
        Self {
            includes: normalize(includes),
            excludes: normalize(excludes),
        }
    }

    /// Build a policy from one configuration block.
    pub fn try_new<I, E, K, L>(includes: I, excludes: E) -> Result<Self, HeaderPolicyError>
    where
        I: IntoIterator<Item = (K, HeaderRule)>,
        E: IntoIterator<Item = (L, HeaderRule)>,
        K: AsRef<str>,
        L: AsRef<str>,
    {
        let policy = Self::new(includes, excludes);
        if !policy.includes.is_empty() && !policy.excludes.is_empty() {
            return Err(HeaderPolicyError::Ambiguous);
        }
        Ok(policy)
    }

    /// Layer `local` over `global`; any header `local` names wins.
    pub fn merge(global: &HeaderPolicy, local: &HeaderPolicy) -> HeaderPolicy {
        let mut includes = global.includes.clone();
        let mut excludes = global.excludes.clone();

        for (name, rule) in &local.includes {
            excludes.remove(name);
            includes.insert(name.clone(), *rule);
        }
        for (name, rule) in &local.excludes {
            includes.remove(name);
            excludes.insert(name.clone(), *rule);
        }

        HeaderPolicy { includes, excludes }
    }

    pub fn resolve(&self, name: &str) -> HeaderRule {
        let name = name.to_ascii_lowercase();

        if name == "authorization" {
            return HeaderRule::Redact;
        }
        if UNTOUCHABLE.contains(&name.as_str()) {
            return HeaderRule::Keep;
        }
        if let Some(rule) = self.includes.get(&name) {
            return *rule;
        }
        if !self.includes.is_empty() {
            return HeaderRule::Delete;
        }
        if let Some(rule) = self.excludes.get(&name) {
            return *rule;
        }
        HeaderRule::Keep
    }

    /// Apply the policy to a header map.
    pub fn filter(&self, headers: &HeaderMap) -> CapturedHeaders {
        let mut out = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            match self.resolve(name.as_str()) {
                HeaderRule::Keep => out.push((
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )),
                HeaderRule::Redact => out.push((name.as_str().to_string(), REDACTED.to_string())),
                HeaderRule::Delete => {}
            }
        }
        CapturedHeaders(out)
    }
}

fn normalize<T, K>(entries: T) -> HashMap<String, HeaderRule>
where
    T: IntoIterator<Item = (K, HeaderRule)>,
    K: AsRef<str>,
{
    entries
        .into_iter()
        .map(|(name, rule)| (name.as_ref().trim().to_ascii_lowercase(), rule))
        .collect()
}

/// Post-policy headers in header-map order. A repeated header keeps every
/// value, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapturedHeaders(Vec<(String, String)>);

impl CapturedHeaders {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for CapturedHeaders {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NONE: [(&str, HeaderRule); 0] = [];

    #[test]
    fn empty_policy_keeps_everything_but_authorization() {
        let policy = HeaderPolicy::default();
        assert_eq!(policy.resolve("x-anything"), HeaderRule::Keep);
        assert_eq!(policy.resolve("Authorization"), HeaderRule::Redact);
    }

    #[test]
    fn includes_act_as_allow_list() {
        let policy = HeaderPolicy::try_new([("X-Trace", HeaderRule::Keep), ("cookie", HeaderRule::Redact)], NONE)
            .unwrap();

        assert_eq!(policy.resolve("x-trace"), HeaderRule::Keep);
        assert_eq!(policy.resolve("COOKIE"), HeaderRule::Redact);
        assert_eq!(policy.resolve("x-other"), HeaderRule::Delete);
        assert_eq!(policy.resolve("content-type"), HeaderRule::Keep);
        assert_eq!(policy.resolve("Content-Encoding"), HeaderRule::Keep);
    }

    #[test]
    fn excludes_act_as_deny_list() {
        let policy = HeaderPolicy::try_new(NONE, [("x-secret", HeaderRule::Delete), ("cookie", HeaderRule::Redact)])
            .unwrap();

        assert_eq!(policy.resolve("X-Secret"), HeaderRule::Delete);
        assert_eq!(policy.resolve("cookie"), HeaderRule::Redact);
        assert_eq!(policy.resolve("x-other"), HeaderRule::Keep);
    }

    #[test]
    fn authorization_cannot_be_kept_or_deleted() {
        let keep = HeaderPolicy::new([("authorization", HeaderRule::Keep)], NONE);
        let delete = HeaderPolicy::new(NONE, [("authorization", HeaderRule::Delete)]);
        assert_eq!(keep.resolve("authorization"), HeaderRule::Redact);
        assert_eq!(delete.resolve("authorization"), HeaderRule::Redact);
    }

    #[test]
    fn untouchable_headers_ignore_excludes() {
        let policy = HeaderPolicy::new(NONE, [("content-length", HeaderRule::Delete)]);
        assert_eq!(policy.resolve("content-length"), HeaderRule::Keep);
    }

    #[test]
    fn ambiguous_blocks_are_rejected() {
        let err = HeaderPolicy::try_new([("a", HeaderRule::Keep)], [("b", HeaderRule::Delete)]).unwrap_err();
        assert_eq!(err, HeaderPolicyError::Ambiguous);
    }

    #[test]
    fn local_rules_win_over_global() {
        let global = HeaderPolicy::new([("A", HeaderRule::Keep)], [("B", HeaderRule::Delete)]);
        let local = HeaderPolicy::new(NONE, [("a", HeaderRule::Delete)]);

        let merged = HeaderPolicy::merge(&global, &local);

        assert_eq!(merged.resolve("a"), HeaderRule::Delete);
        assert_eq!(merged.resolve("b"), HeaderRule::Delete);
    }

    #[test]
    fn local_include_lifts_global_exclude() {
        let global = HeaderPolicy::new(NONE, [("x-debug", HeaderRule::Delete)]);
        let local = HeaderPolicy::new([("X-Debug", HeaderRule::Redact)], NONE);

        let merged = HeaderPolicy::merge(&global, &local);

        assert_eq!(merged.resolve("x-debug"), HeaderRule::Redact);
        assert_eq!(merged.resolve("x-other"), HeaderRule::Delete);
    }

    #[test]
    fn filter_applies_rules_in_header_map_order() {
        let policy = HeaderPolicy::new(NONE, [("cookie", HeaderRule::Redact), ("x-drop", HeaderRule::Delete)]);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("x-drop", HeaderValue::from_static("gone"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let filtered = policy.filter(&headers);

        assert_eq!(filtered.get("Authorization"), Some(REDACTED));
        assert_eq!(filtered.get("cookie"), Some(REDACTED));
        assert_eq!(filtered.get("x-drop"), None);
        let accepts: Vec<&str> = filtered
            .iter()
            .filter(|(n, _)| *n == "accept")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(accepts, vec!["text/html", "application/json"]);
    }
}
