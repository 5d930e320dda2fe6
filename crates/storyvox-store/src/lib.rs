//! Persistence for StoryVox jobs, subtitles and stories.
//!
//! This crate provides:
//! - The `JobStore`, `SubtitleStore` and `StoryStore` contracts
//! - A Firestore REST implementation (service account auth via gcp_auth,
//!   optimistic concurrency on status writes, retry with backoff)
//! - An in-memory implementation for local runs and tests
//! - `StoreSet`, the bundle chosen once at startup

pub mod client;
pub mod contract;
pub mod error;
pub mod firestore_jobs;
pub mod firestore_stories;
pub mod firestore_subtitles;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use contract::{JobStore, StoreSet, StoryStore, SubtitleStore, PROTECTED_FIELDS};
pub use error::{StoreError, StoreResult};
pub use firestore_jobs::FirestoreJobStore;
pub use firestore_stories::FirestoreStoryStore;
pub use firestore_subtitles::FirestoreSubtitleStore;
pub use memory::MemoryStore;
pub use retry::RetryConfig;
