//! Artifact storage for StoryVox.
//!
//! This crate provides:
//! - Cloudflare R2 client (upload, download, presigned URLs, deletion)
//! - The [`ArtifactStore`] trait: upload returns a URL, download takes any URL
//! - A filesystem-backed store for local development
//! - The object key layout for job artifacts

pub mod artifact;
pub mod client;
pub mod error;
pub mod keys;

pub use artifact::{download_url, ArtifactStore, LocalArtifactStore, R2ArtifactStore};
pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
