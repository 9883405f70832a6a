//! Resource Access
//!
//! The per resource server access loop and its resource rotation.

pub mod access_loop;
pub mod cycle;

pub use access_loop::{AccessLoop, LoopExit, LoopSettings, LoopState};
pub use cycle::ResourceCycle;
