//! In-memory store implementations for tests and dry runs.
//!
//! Each store keeps its rows behind `std::sync::RwLock`. Natural keys are
//! compared with plain `Option` equality, so absent components match each
//! other the way SQL `IS` does.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::keys::NaturalKey;
use crate::tag::Tag;

use super::{
    next_revision, ColumnStore, ContentStore, DocumentStore, IndexStore, StoreError, StoreResult,
};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend(anyhow!("in-memory store lock poisoned"))
}

/// One stored index row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub id: i64,
    pub key: NaturalKey,
    pub columns: BTreeMap<Tag, String>,
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    index: RwLock<Vec<IndexRow>>,
    tags: RwLock<HashMap<NaturalKey, String>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_rows(&self) -> Vec<IndexRow> {
        self.index.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn tags_row(&self, key: &NaturalKey) -> Option<String> {
        self.tags.read().ok()?.get(key).cloned()
    }

    pub fn tags_row_count(&self) -> usize {
        self.tags.read().map(|rows| rows.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn find_index_row(&self, key: &NaturalKey) -> StoreResult<Option<i64>> {
        let rows = self.index.read().map_err(poisoned)?;
        Ok(rows.iter().find(|row| row.key == *key).map(|row| row.id))
    }

    async fn insert_index_row(&self, key: &NaturalKey, columns: &[(Tag, String)]) -> StoreResult<i64> {
        let mut rows = self.index.write().map_err(poisoned)?;
        let id = rows.len() as i64 + 1;
        rows.push(IndexRow {
            id,
            key: key.clone(),
            columns: columns.iter().cloned().collect(),
        });
        Ok(id)
    }

    async fn update_index_row(&self, id: i64, columns: &[(Tag, String)]) -> StoreResult<()> {
        let mut rows = self.index.write().map_err(poisoned)?;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| anyhow!("index row {id} not found"))?;
        for (tag, value) in columns {
            row.columns.insert(*tag, value.clone());
        }
        Ok(())
    }

    async fn tags_row_exists(&self, key: &NaturalKey) -> StoreResult<bool> {
        Ok(self.tags.read().map_err(poisoned)?.contains_key(key))
    }

    async fn insert_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()> {
        let mut rows = self.tags.write().map_err(poisoned)?;
        rows.insert(key.clone(), document.to_string());
        Ok(())
    }

    async fn update_tags_row(&self, key: &NaturalKey, document: &str) -> StoreResult<()> {
        let mut rows = self.tags.write().map_err(poisoned)?;
        match rows.get_mut(key) {
            Some(existing) => {
                *existing = document.to_string();
                Ok(())
            }
            None => Err(anyhow!("tags row not found").into()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryContentStore {
    records: RwLock<Vec<(NaturalKey, Vec<u8>)>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<(NaturalKey, Vec<u8>)> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn insert_content(&self, key: &NaturalKey, bytes: &[u8]) -> StoreResult<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.push((key.clone(), bytes.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, (String, Map<String, Value>)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision and body of `id`.
    pub fn get(&self, id: &str) -> Option<(String, Map<String, Value>)> {
        self.docs.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn body_bytes(body: &Map<String, Value>) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| StoreError::Backend(e.into()))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch_revision(&self, id: &str) -> StoreResult<Option<String>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(id).map(|(rev, _)| rev.clone()))
    }

    async fn create_document(&self, id: &str, body: &Map<String, Value>) -> StoreResult<String> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        if docs.contains_key(id) {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        let rev = next_revision(None, &body_bytes(body)?);
        docs.insert(id.to_string(), (rev.clone(), body.clone()));
        Ok(rev)
    }

    async fn update_document(
        &self,
        id: &str,
        revision: &str,
        body: &Map<String, Value>,
    ) -> StoreResult<String> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        match docs.get_mut(id) {
            Some((current, stored)) if current == revision => {
                let rev = next_revision(Some(current), &body_bytes(body)?);
                *current = rev.clone();
                *stored = body.clone();
                Ok(rev)
            }
            _ => Err(StoreError::Conflict { id: id.to_string() }),
        }
    }
}

#[derive(Default)]
pub struct InMemoryColumnStore {
    cells: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, row_key: &str, column: &str) -> Option<Vec<u8>> {
        self.cells
            .read()
            .ok()?
            .get(&(row_key.to_string(), column.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.cells.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn put_cell(&self, row_key: &str, column: &str, value: &[u8]) -> StoreResult<()> {
        let mut cells = self.cells.write().map_err(poisoned)?;
        cells.insert((row_key.to_string(), column.to_string()), value.to_vec());
        Ok(())
    }
}
