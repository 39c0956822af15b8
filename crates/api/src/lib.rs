//! Fabric operator API definitions
//!
//! The `Configuration` custom resource, its status machinery (conditions,
//! matching node addresses, managed object audit list) and the shared
//! constants used across the controllers.

pub mod configuration;
pub mod reference;

pub use configuration::*;
pub use reference::*;
