//! AppConfig Store Client
//!
//! This crate provides the client for communicating with the remote
//! configuration store: the `ConfigStore` contract the cache layer is
//! written against, and an HTTP implementation of it.

pub mod client;
pub mod error;
pub mod store;

pub use client::{HttpConfigStore, HttpConfigStoreConfig};
pub use error::StoreError;
pub use store::{
    ConfigStore, FetchedConfiguration, GetConfigurationRequest, Page, ResourceSummary,
    StartDeploymentRequest,
};
