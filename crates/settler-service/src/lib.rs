//! Service entry point for the settlement engine.
//!
//! - `cli`: command-line interface
//! - `engine`: builds every configured settler and its collaborators

pub mod cli;
pub mod engine;

pub use engine::{Deployment, OrderDocument, SettlerEngine};
