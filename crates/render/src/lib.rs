//! Render collaborator boundary
//!
//! The configuration controller consumes rendered object bodies through the
//! [`Renderer`] trait and applies them in the fixed order defined by
//! [`ObjectKind::ORDERED`]. The templating engine that produces the bodies is
//! external; this crate ships a [`DirRenderer`] that loads pre-rendered
//! manifests from a mounted directory, plus the shell scripts used to mutate
//! database cluster membership.

pub mod objects;
pub mod scripts;

pub use objects::*;
pub use scripts::*;

use thiserror::Error;

/// Errors surfaced by the render boundary.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Manifest directory could not be read
    #[error("error reading manifest source: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest document failed to parse
    #[error("error parsing manifest document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A manifest document is missing a required field
    #[error("manifest document missing field: {0}")]
    MissingField(&'static str),
}
