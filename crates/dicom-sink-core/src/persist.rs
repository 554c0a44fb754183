//! Persistence coordinator.
//!
//! A [`Persister`] takes one finished [`Transcoded`] record plus the raw
//! input bytes and writes them with upsert semantics, so that ingesting the
//! same file again converges on the same stored state. Two variants exist:
//!
//! - [`IndexedPersister`]: index row (sparse merge), tags row (overwrite)
//!   and content record (always appended), all keyed by the [`NaturalKey`].
//! - [`DocumentPersister`]: one revisioned document per primary identifier
//!   plus idempotent cells in a wide column family.
//!
//! Revision conflicts are reported, never retried.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::keys::{KeyModel, NaturalKey};
use crate::store::{ColumnStore, ContentStore, DocumentStore, IndexStore, StoreError};
use crate::transcode::Transcoded;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("record has no {0} identifier")]
    MissingIdentifier(&'static str),

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{stage} write failed: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

impl PersistError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PersistError::Store {
                source: StoreError::Conflict { .. },
                ..
            }
        )
    }
}

fn at(stage: &'static str) -> impl FnOnce(StoreError) -> PersistError {
    move |source| PersistError::Store { stage, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowChange {
    Created,
    Updated,
}

impl fmt::Display for RowChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowChange::Created => write!(f, "created"),
            RowChange::Updated => write!(f, "updated"),
        }
    }
}

/// What a single `persist` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum PersistOutcome {
    Indexed {
        key: NaturalKey,
        index: RowChange,
        tags: RowChange,
    },
    Document {
        id: String,
        revision: String,
        change: RowChange,
    },
}

/// One backend combination.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn persist(&self, record: &Transcoded, raw: &[u8]) -> Result<PersistOutcome, PersistError>;
}

/// Index/tags/content persistence keyed by the natural key.
pub struct IndexedPersister {
    index: Arc<dyn IndexStore>,
    content: Arc<dyn ContentStore>,
    keys: KeyModel,
}

impl IndexedPersister {
    pub fn new(index: Arc<dyn IndexStore>, content: Arc<dyn ContentStore>, keys: KeyModel) -> Self {
        Self {
            index,
            content,
            keys,
        }
    }
}

#[async_trait]
impl Persister for IndexedPersister {
    async fn persist(&self, record: &Transcoded, raw: &[u8]) -> Result<PersistOutcome, PersistError> {
        let key = self.keys.natural_key(&record.document);
        let columns = self.keys.descriptive_values(&record.document);

        let index = match self.index.find_index_row(&key).await.map_err(at("index"))? {
            None => {
                self.index
                    .insert_index_row(&key, &columns)
                    .await
                    .map_err(at("index"))?;
                RowChange::Created
            }
            Some(id) => {
                if !columns.is_empty() {
                    self.index
                        .update_index_row(id, &columns)
                        .await
                        .map_err(at("index"))?;
                }
                RowChange::Updated
            }
        };

        let document = serde_json::to_string(&record.document)?;
        let tags = if self.index.tags_row_exists(&key).await.map_err(at("tags"))? {
            self.index
                .update_tags_row(&key, &document)
                .await
                .map_err(at("tags"))?;
            RowChange::Updated
        } else {
            self.index
                .insert_tags_row(&key, &document)
                .await
                .map_err(at("tags"))?;
            RowChange::Created
        };

        self.content
            .insert_content(&key, raw)
            .await
            .map_err(at("content"))?;

        tracing::debug!(?key, %index, %tags, "indexed record");
        Ok(PersistOutcome::Indexed { key, index, tags })
    }
}

/// Which identifier keys the column-family row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnKey {
    #[default]
    Grouping,
    Primary,
}

/// Revisioned document plus column-family persistence keyed by the
/// captured identifiers.
pub struct DocumentPersister {
    documents: Arc<dyn DocumentStore>,
    columns: Arc<dyn ColumnStore>,
    column_key: ColumnKey,
    store_document_bytes: bool,
}

impl DocumentPersister {
    pub fn new(documents: Arc<dyn DocumentStore>, columns: Arc<dyn ColumnStore>) -> Self {
        Self {
            documents,
            columns,
            column_key: ColumnKey::default(),
            store_document_bytes: false,
        }
    }

    pub fn column_key(mut self, column_key: ColumnKey) -> Self {
        self.column_key = column_key;
        self
    }

    /// Also write the JSON document bytes next to the raw bytes.
    pub fn store_document_bytes(mut self, enabled: bool) -> Self {
        self.store_document_bytes = enabled;
        self
    }
}

#[async_trait]
impl Persister for DocumentPersister {
    async fn persist(&self, record: &Transcoded, raw: &[u8]) -> Result<PersistOutcome, PersistError> {
        let ids = &record.identifiers;
        let id = ids
            .primary
            .as_deref()
            .ok_or(PersistError::MissingIdentifier("primary"))?;
        let row_key = match self.column_key {
            ColumnKey::Grouping => ids
                .grouping
                .as_deref()
                .ok_or(PersistError::MissingIdentifier("grouping"))?,
            ColumnKey::Primary => id,
        };

        let (revision, change) =
            match self.documents.fetch_revision(id).await.map_err(at("document"))? {
                None => {
                    let rev = self
                        .documents
                        .create_document(id, &record.document)
                        .await
                        .map_err(at("document"))?;
                    (rev, RowChange::Created)
                }
                Some(current) => {
                    let rev = self
                        .documents
                        .update_document(id, &current, &record.document)
                        .await
                        .map_err(at("document"))?;
                    (rev, RowChange::Updated)
                }
            };

        self.columns
            .put_cell(row_key, &format!("data:{id}"), raw)
            .await
            .map_err(at("column"))?;
        if self.store_document_bytes {
            self.columns
                .put_cell(row_key, &format!("document:{id}"), &record.to_json_bytes()?)
                .await
                .map_err(at("column"))?;
        }

        tracing::debug!(id, %revision, %change, "stored document");
        Ok(PersistOutcome::Document {
            id: id.to_string(),
            revision,
            change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{
        InMemoryColumnStore, InMemoryContentStore, InMemoryDocumentStore, InMemoryIndexStore,
    };
    use crate::store::{revision_generation, StoreResult};
    use crate::tag::tags;
    use crate::transcode::IdentifierSet;
    use serde_json::{json, Map, Value};

    fn record(document: Value) -> Transcoded {
        let document = document.as_object().unwrap().clone();
        let identifiers = IdentifierSet {
            primary: document
                .get("t00080018")
                .and_then(Value::as_str)
                .map(str::to_string),
            grouping: document
                .get("t00100020")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        Transcoded {
            document,
            identifiers,
            notes: Vec::new(),
        }
    }

    fn scenario() -> Transcoded {
        record(json!({
            "t00100020": "P1",
            "t0020000d": "S1",
            "t0020000e": "SE1",
            "t00080018": "O1",
            "t00080060": "CT",
        }))
    }

    fn indexed() -> (
        IndexedPersister,
        Arc<InMemoryIndexStore>,
        Arc<InMemoryContentStore>,
    ) {
        let index = Arc::new(InMemoryIndexStore::new());
        let content = Arc::new(InMemoryContentStore::new());
        let persister = IndexedPersister::new(index.clone(), content.clone(), KeyModel::standard());
        (persister, index, content)
    }

    #[tokio::test]
    async fn test_indexed_first_ingest_creates_rows() {
        let (persister, index, content) = indexed();
        let rec = scenario();
        let outcome = persister.persist(&rec, b"raw").await.unwrap();

        let key = KeyModel::standard().natural_key(&rec.document);
        assert_eq!(
            outcome,
            PersistOutcome::Indexed {
                key: key.clone(),
                index: RowChange::Created,
                tags: RowChange::Created,
            }
        );
        let rows = index.index_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.owner.as_deref(), Some("P1"));
        assert_eq!(rows[0].columns[&tags::MODALITY], "CT");
        let stored: Value = serde_json::from_str(&index.tags_row(&key).unwrap()).unwrap();
        assert_eq!(stored["t00080060"], "CT");
        assert_eq!(content.records(), vec![(key, b"raw".to_vec())]);
    }

    #[tokio::test]
    async fn test_indexed_reingest_duplicates_only_content() {
        let (persister, index, content) = indexed();
        let rec = scenario();
        persister.persist(&rec, b"raw").await.unwrap();
        let outcome = persister.persist(&rec, b"raw").await.unwrap();

        assert!(matches!(
            outcome,
            PersistOutcome::Indexed {
                index: RowChange::Updated,
                tags: RowChange::Updated,
                ..
            }
        ));
        assert_eq!(index.index_rows().len(), 1);
        assert_eq!(index.tags_row_count(), 1);
        assert_eq!(content.len(), 2);
    }

    #[tokio::test]
    async fn test_indexed_sparse_merge_keeps_absent_columns() {
        let (persister, index, _) = indexed();
        let mut first = scenario();
        first
            .document
            .insert("t00081030".to_string(), json!("HEAD"));
        persister.persist(&first, b"a").await.unwrap();

        let mut second = scenario();
        second.document.insert("t00080060".to_string(), json!("MR"));
        second.document.insert("t00081030".to_string(), Value::Null);
        persister.persist(&second, b"b").await.unwrap();

        let rows = index.index_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns[&tags::MODALITY], "MR");
        assert_eq!(rows[0].columns[&tags::STUDY_DESCRIPTION], "HEAD");
    }

    #[tokio::test]
    async fn test_indexed_distinct_keys_get_distinct_rows() {
        let (persister, index, _) = indexed();
        persister.persist(&scenario(), b"a").await.unwrap();
        let other = record(json!({"t00100020": "P1", "t00080018": "O2"}));
        persister.persist(&other, b"b").await.unwrap();
        assert_eq!(index.index_rows().len(), 2);
        assert_eq!(index.tags_row_count(), 2);
    }

    #[tokio::test]
    async fn test_document_reingest_advances_revision() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let cols = Arc::new(InMemoryColumnStore::new());
        let persister = DocumentPersister::new(docs.clone(), cols.clone()).store_document_bytes(true);
        let rec = scenario();

        let first = persister.persist(&rec, b"raw").await.unwrap();
        let second = persister.persist(&rec, b"raw").await.unwrap();

        let (PersistOutcome::Document { revision: r1, change: c1, .. }, PersistOutcome::Document { revision: r2, change: c2, .. }) =
            (first, second)
        else {
            panic!("expected document outcomes");
        };
        assert_eq!(c1, RowChange::Created);
        assert_eq!(c2, RowChange::Updated);
        assert_eq!(revision_generation(&r1), Some(1));
        assert_eq!(revision_generation(&r2), Some(2));

        assert_eq!(docs.len(), 1);
        assert_eq!(docs.get("O1").unwrap().0, r2);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols.get("P1", "data:O1").unwrap(), b"raw");
        assert!(cols.get("P1", "document:O1").is_some());
    }

    #[tokio::test]
    async fn test_document_column_key_primary() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let cols = Arc::new(InMemoryColumnStore::new());
        let persister =
            DocumentPersister::new(docs, cols.clone()).column_key(ColumnKey::Primary);
        persister.persist(&scenario(), b"raw").await.unwrap();
        assert!(cols.get("O1", "data:O1").is_some());
        assert!(cols.get("O1", "document:O1").is_none());
    }

    #[tokio::test]
    async fn test_document_requires_identifiers() {
        let persister = DocumentPersister::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryColumnStore::new()),
        );
        let rec = record(json!({"t00080018": "O1"}));
        let err = persister.persist(&rec, b"raw").await.unwrap_err();
        assert!(matches!(err, PersistError::MissingIdentifier("grouping")));
    }

    /// Document store where another writer lands between fetch and update.
    struct RacingStore {
        inner: InMemoryDocumentStore,
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn fetch_revision(&self, id: &str) -> StoreResult<Option<String>> {
            let current = self.inner.fetch_revision(id).await?;
            if let Some(rev) = &current {
                let mut body = Map::new();
                body.insert("writer".to_string(), json!("other"));
                self.inner.update_document(id, rev, &body).await?;
            }
            Ok(current)
        }

        async fn create_document(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String> {
            self.inner.create_document(id, body).await
        }

        async fn update_document(
            &self,
            id: &str,
            revision: &str,
            body: &Map<String, Value>,
        ) -> StoreResult<String> {
            self.inner.update_document(id, revision, body).await
        }
    }

    #[tokio::test]
    async fn test_document_conflict_is_not_retried() {
        let docs = Arc::new(RacingStore {
            inner: InMemoryDocumentStore::new(),
        });
        let cols = Arc::new(InMemoryColumnStore::new());
        let persister = DocumentPersister::new(docs.clone(), cols.clone());
        let rec = scenario();

        persister.persist(&rec, b"raw").await.unwrap();
        let err = persister.persist(&rec, b"raw").await.unwrap_err();
        assert!(err.is_conflict());

        let (rev, body) = docs.inner.get("O1").unwrap();
        assert_eq!(revision_generation(&rev), Some(2));
        assert_eq!(body["writer"], "other");
    }
}
