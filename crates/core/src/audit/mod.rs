//! Advisory audit trail.
//!
//! Producers hold an [`AuditHandle`]; a single [`AuditWriter`] task persists
//! events. Audit failures are logged and never fail the caller.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
