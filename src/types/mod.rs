//! Engine Types
//!
//! Core type definitions shared by the token lifecycle components.

pub mod config;
pub mod revocation;
pub mod token;

pub use config::*;
pub use revocation::*;
pub use token::*;
