//! Configuration types and YAML loading.

mod loader;
mod types;

pub use types::*;
