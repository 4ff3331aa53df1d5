//! Cache management module

mod bounded;
mod entry;

pub use bounded::BoundedCache;
pub use entry::{CachedConfiguration, EntryOrigin};
