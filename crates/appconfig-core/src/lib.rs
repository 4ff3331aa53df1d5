//! AppConfig Cache Core Business Logic
//!
//! This crate provides the core functionality for the configuration cache:
//! the bounded content cache, the background refresh scheduler, the
//! resource name resolver, and the facade that ties them together.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod refresh;
pub mod resolver;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{BoundedCache, CachedConfiguration, EntryOrigin};
pub use config::{FacadeOptions, StoreTarget};
pub use error::CoreError;
pub use facade::ConfigurationFacade;
pub use refresh::{CacheRefresher, ConfigurationCache, RefreshScheduler, SweepReport};
pub use resolver::{NameResolver, ResourceKind};
pub use source::{CallTimeout, ConfigurationSource};
