// src/library/mod.rs - Versioned task catalog

pub mod loader;
pub mod registry;
pub mod types;

pub use loader::LibraryDocument;
pub use registry::{LibraryStats, TaskLibrary, TaskQuery};
pub use types::*;
