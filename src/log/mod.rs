//! The append-only action log.
//!
//! The log is an arena of immutable [`ActionRecord`](crate::ActionRecord)s
//! plus secondary indices by action and by flow. It is passed explicitly to
//! the matcher and the engine; there is no global instance.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryActionLog;
pub use traits::ActionLog;

#[cfg(feature = "persistent")]
pub use persistent::{FileActionLog, FileLogConfig};
