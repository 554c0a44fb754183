//! Persister wiring from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use dicom_sink_core::keys::KeyModel;
use dicom_sink_core::persist::{DocumentPersister, IndexedPersister, Persister};
use dicom_sink_core::store::DocumentStore;

use crate::config::{BackendKind, Config, DocumentStoreKind};
use crate::couch_store::CouchDocumentStore;
use crate::sqlite_store::{indexed_stores, SqliteColumnStore, SqliteDocumentStore};

/// Build the persister selected by `[backend]`.
pub fn build_persister(config: &Config, pool: &SqlitePool) -> Result<Arc<dyn Persister>> {
    let keys = KeyModel::standard();
    match config.backend.kind {
        BackendKind::Indexed => {
            let (index, content) = indexed_stores(pool, &keys);
            Ok(Arc::new(IndexedPersister::new(index, content, keys)))
        }
        BackendKind::Document => {
            let document = &config.backend.document;
            let documents: Arc<dyn DocumentStore> = match document.store {
                DocumentStoreKind::Sqlite => Arc::new(SqliteDocumentStore::new(pool.clone())),
                DocumentStoreKind::Couchdb => Arc::new(couch_store(config)?),
            };
            let columns = Arc::new(SqliteColumnStore::new(pool.clone()));
            Ok(Arc::new(
                DocumentPersister::new(documents, columns)
                    .column_key(document.column_key.into())
                    .store_document_bytes(document.store_document_bytes),
            ))
        }
    }
}

pub fn couch_store(config: &Config) -> Result<CouchDocumentStore> {
    let couch = config
        .couchdb
        .as_ref()
        .context("CouchDB backend selected but [couchdb] is not configured")?;
    CouchDocumentStore::from_config(couch)
}
