//! # dicom-sink
//!
//! Ingests DICOM Part-10 files as JSON documents into SQLite or CouchDB.
//!
//! Each file is read in one forward pass, transcoded into a JSON document
//! keyed by lowercase hex tags (`t0020000d`) and persisted with upsert
//! semantics, so ingesting the same tree twice converges on the same index
//! and document state. The format logic lives in [`dicom_sink_core`]; this
//! crate adds configuration, the native backends and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌────────────────────────┐
//! │  walkdir  │──▶│ Part10Reader →   │──▶│ Persister              │
//! │ *.dcm     │   │ Transcoder       │   │ indexed:  SQLite       │
//! └───────────┘   └──────────────────┘   │ document: SQLite/Couch │
//!                                         └────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dcmsink init                      # create tables (and CouchDB database)
//! dcmsink ingest ./incoming         # ingest every .dcm file
//! dcmsink stats                     # row counts
//! dcmsink get 1.2.840.113619.2.1    # stored document for one instance
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite implementations of the store traits |
//! | [`couch_store`] | CouchDB document store |
//! | [`backend`] | Persister selection from config |
//! | [`ingest`] | Ingestion driver |
//! | [`stats`] | `dcmsink stats` |
//! | [`get`] | `dcmsink get` |

pub mod backend;
pub mod config;
pub mod couch_store;
pub mod db;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
