//! HTTP/JSON surface for the simcloud lifecycle driver
//!
//! A controller-manager host calls these routes instead of a cloud provider
//! plugin. Each route maps one-to-one onto a [`simcloud_driver::Driver`]
//! operation.

#![deny(missing_docs)]

pub mod error;
pub mod router;

pub use error::ApiError;
pub use router::{routes, serve};
