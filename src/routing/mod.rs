//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → matcher.rs (RequestHead, evaluate match conditions)
//!     → router.rs (route lookup)
//!     → Return: matched Route (upstream, capture flag, header policy) or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Merge route header rules over the global policy
//!     → Compile matchers
//!     → Sort by priority
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use matcher::RequestHead;
pub use router::{Route, RouteError, RouteTable};
