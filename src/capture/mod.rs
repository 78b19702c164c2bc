//! Traffic capture subsystem.
//!
//! # Data Flow
//! ```text
//! Proxied body chunk (direction, exchange id, bytes)
//!     → repository.rs (write: create / append / spill)
//!     → state.rs (InMemory ──threshold──▶ OnDisk, one-way)
//!
//! Exchange complete:
//!     → repository.rs (get) → body.rs (BodyProvider, gzip/deflate decoding)
//!     → access_log (sinks read bodies lazily)
//!     → repository.rs (cleanup | persist_for_error)
//!       or archive.rs (move into <base>/<date>/<c1>/<c2>/<c3>/<c4>/<id>/)
//! ```
//!
//! # Design Decisions
//! - One spill file per (exchange id, direction): `<id>_<direction>.raw`
//! - Capture failures never touch the proxied byte stream
//! - Every buffer is released exactly once: cleanup, archive, or preserve

pub mod archive;
pub mod body;
pub mod error;
pub mod exchange;
pub mod repository;
pub mod state;

pub use archive::ArchiveManager;
pub use body::{BodyProvider, BodySource, ContentEncoding};
pub use error::CaptureError;
pub use exchange::{Direction, ExchangeId};
pub use repository::BufferRepository;
pub use state::BufferMode;
