//! Storage abstraction for the persistence coordinator.
//!
//! Four narrow traits describe the backend shapes a coordinator can be
//! wired to. Each variant in [`crate::persist`] takes the combination it
//! needs, so a backend only implements the operations it actually serves.
//!
//! | Trait | Serves |
//! |-------|--------|
//! | [`IndexStore`] | sparse index rows and whole-document tags rows, keyed by [`NaturalKey`] |
//! | [`ContentStore`] | append-only raw content records |
//! | [`DocumentStore`] | revisioned documents with optimistic concurrency |
//! | [`ColumnStore`] | a wide column family with idempotent cell writes |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::keys::NaturalKey;
use crate::tag::Tag;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored revision no longer matches the one presented.
    #[error("revision conflict on document {id}")]
    Conflict { id: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Index rows (natural key + descriptive columns) and tags rows (natural
/// key + full document), both matched by null-safe natural-key equality.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Row id of the index row with exactly this natural key.
    async fn find_index_row(&self, key: &NaturalKey) -> StoreResult<Option<i64>>;

    async fn insert_index_row(&self, key: &NaturalKey, columns: &[(Tag, String)]) -> StoreResult<i64>;

    /// Overwrite only the given columns; all other columns keep their value.
    async fn update_index_row(&self, id: i64, columns: &[(Tag, String)]) -> StoreResult<()>;

    async fn tags_row_exists(&self, key: &NaturalKey) -> StoreResult<bool>;

    async fn insert_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()>;

    async fn update_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()>;
}

/// Raw input bytes. Every call adds a record; nothing is deduplicated.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_content(&self, key: &NaturalKey, bytes: &[u8]) -> StoreResult<()>;
}

/// Documents addressed by id and guarded by a revision token.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current revision of `id`, or `None` if the document does not exist.
    async fn fetch_revision(&self, id: &str) -> StoreResult<Option<String>>;

    /// Create `id`; returns the new revision.
    async fn create_document(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String>;

    /// Replace `id` if its revision is still `revision`; returns the new
    /// revision or [`StoreError::Conflict`].
    async fn update_document(
        &self,
        id: &str,
        revision: &str,
        body: &Map<String, Value>,
    ) -> StoreResult<String>;
}

/// Wide column family. Writing the same cell twice leaves one cell.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    async fn put_cell(&self, row_key: &str, column: &str, value: &[u8]) -> StoreResult<()>;
}

/// Compute the revision that follows `previous` for a document body.
///
/// Tokens look like `3-5f1e...` (generation, dash, 32 hex digits of the
/// body's SHA-256). The generation starts at 1.
pub fn next_revision(previous: Option<&str>, body: &[u8]) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let digest = hex::encode(Sha256::digest(body));
    format!("{}-{}", generation, &digest[..32])
}

/// Generation number of a revision token.
pub fn revision_generation(revision: &str) -> Option<u64> {
    revision.split_once('-')?.0.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_revision_increments_generation() {
        let first = next_revision(None, b"{}");
        assert!(first.starts_with("1-"));
        assert_eq!(first.len(), 2 + 32);

        let second = next_revision(Some(&first), b"{}");
        assert_eq!(revision_generation(&second), Some(2));
        assert_eq!(first[2..], second[2..]);
    }

    #[test]
    fn test_revision_generation_rejects_garbage() {
        assert_eq!(revision_generation("abc"), None);
        assert_eq!(revision_generation("x-1"), None);
    }
}
