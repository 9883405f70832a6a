//! Core Components
//!
//! HTTP transport shared by every collaborator.

pub mod transport;

pub use transport::*;
