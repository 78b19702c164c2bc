//! Route lookup.
//!
//! # Responsibilities
//! - Compile route configs into matchers and merged header policies
//! - Look up matching route for a request head
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default
//! - Header policies are merged once here, not per exchange

use axum::http::Uri;
use std::sync::Arc;
use thiserror::Error;

use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher, RequestHead};
use crate::security::headers::{HeaderPolicy, HeaderPolicyError};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route '{route}': invalid upstream '{upstream}'")]
    InvalidUpstream { route: String, upstream: String },

    #[error("route '{route}': {source}")]
    Policy {
        route: String,
        #[source]
        source: HeaderPolicyError,
    },
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    /// Upstream base URI; the request path and query are appended to it.
    pub upstream: Uri,
    pub priority: u32,
    pub capture: bool,
    /// Global policy with this route's rules layered on top.
    pub policy: Arc<HeaderPolicy>,
    matcher: AndMatcher,
}

impl Route {
    pub fn matches(&self, head: &RequestHead<'_>) -> bool {
        self.matcher.matches(head)
    }
}

/// Routes in match order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig], global: &Arc<HeaderPolicy>) -> Result<Self, RouteError> {
        let mut routes = Vec::with_capacity(configs.len());

        for config in configs {
            let upstream: Uri = config.upstream.parse().map_err(|_| RouteError::InvalidUpstream {
                route: config.name.clone(),
                upstream: config.upstream.clone(),
            })?;
            if upstream.scheme_str() != Some("http") || upstream.authority().is_none() {
                return Err(RouteError::InvalidUpstream {
                    route: config.name.clone(),
                    upstream: config.upstream.clone(),
                });
            }

            let policy = match &config.headers {
                Some(local) => {
                    let local = local.to_policy().map_err(|source| RouteError::Policy {
                        route: config.name.clone(),
                        source,
                    })?;
                    Arc::new(HeaderPolicy::merge(global, &local))
                }
                None => Arc::clone(global),
            };

            let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
            if let Some(host) = &config.host {
                matchers.push(Box::new(HostMatcher::new(host)));
            }
            if let Some(prefix) = &config.path_prefix {
                matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
            }

            routes.push(Arc::new(Route {
                name: config.name.clone(),
                upstream,
                priority: config.priority,
                capture: config.capture,
                policy,
                matcher: AndMatcher::new(matchers),
            }));
        }

        // Stable sort keeps config order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        for route in &routes {
            tracing::info!(
                route = %route.name,
                upstream = %route.upstream,
                priority = route.priority,
                capture = route.capture,
                "Route registered"
            );
        }

        Ok(Self { routes })
    }

    /// First route, in priority order, whose conditions all hold.
    pub fn match_head(&self, head: &RequestHead<'_>) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(head)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
