//! HTTP handlers.

pub mod analysis;
pub mod health;
pub mod jobs;
pub mod stories;

pub use health::{health, ready};
