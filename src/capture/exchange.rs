//! Exchange identity and direction.
//!
//! # Responsibilities
//! - Generate the correlation key for one proxied exchange
//! - Name the two halves of an exchange for buffers, files and log fields

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Random characters leading the id; the archive shards on these.
pub const SHARD_PREFIX_LEN: usize = 4;

/// Hex digits of the millisecond timestamp.
const TIMESTAMP_LEN: usize = 12;

/// Random characters after the timestamp.
const SUFFIX_LEN: usize = 6;

/// Unique identifier for a proxied exchange.
///
/// Layout: `<shard prefix><timestamp><suffix>`. The shard prefix is random
/// so archive directories fan out evenly. The timestamp (milliseconds since
/// epoch, zero-padded hex) orders ids created on one shard, and the suffix
/// separates ids created within the same clock tick. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(Arc<str>);

impl ExchangeId {
    /// Generate a new exchange id.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let mut rng = rand::thread_rng();
        let shard = random_chars(&mut rng, SHARD_PREFIX_LEN);
        let suffix = random_chars(&mut rng, SUFFIX_LEN);

        Self(format!("{}{:0width$x}{}", shard, millis, suffix, width = TIMESTAMP_LEN).into())
    }

    /// The millisecond timestamp part, which sorts chronologically.
    pub fn timestamp_part(&self) -> Option<&str> {
        self.0.get(SHARD_PREFIX_LEN..SHARD_PREFIX_LEN + TIMESTAMP_LEN)
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the id can be used verbatim as a file name component.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

fn random_chars<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

impl From<&str> for ExchangeId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for ExchangeId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Both directions, request first.
    pub const ALL: [Direction; 2] = [Direction::Request, Direction::Response];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
