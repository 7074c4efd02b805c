//! # cloudkit
//!
//! Provider-side building blocks for the provisioning engine.
//!
//! This crate provides:
//! - The resource schema registry: a closed set of [`ResourceKind`]s, each
//!   with a static [`Schema`] of input and computed attributes
//! - The [`CloudApi`] trait, the provider's create/read/update/delete API
//! - Categorized provider errors and retry with exponential backoff
//! - [`Sandbox`], a file-backed account implementing [`CloudApi`]
//!
//! ## Example
//!
//! ```no_run
//! use cloudkit::{CloudApi, ResourceKind, Sandbox};
//! use serde_json::json;
//!
//! let account = Sandbox::in_memory();
//! let attributes = json!({"cidr_block": "10.0.0.0/16"});
//! let network = account
//!     .create(ResourceKind::Network, "network.ci", attributes.as_object().unwrap())
//!     .unwrap();
//! println!("created {}", network.id);
//! ```
//!
//! ## Retry Logic
//!
//! Throttling and unavailability are transient; wrap calls in
//! [`retry::with_retry`] to retry them with backoff configured by
//! [`RetryConfig`]. Every other error category is terminal.

#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod schema;
pub mod types;

pub use backend::CloudApi;
pub use backend::sandbox::{Call, Fault, Sandbox};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use schema::{AttrType, AttributeSpec, Presence, ResourceKind, Schema};
pub use types::{Attributes, Operation, RemoteObject, RetryConfig};
