//! # DICOM Sink Core
//!
//! Pure logic for turning DICOM Part-10 records into JSON documents and
//! persisting them with upsert semantics: tag and VR model, the attribute
//! event stream and its Part-10 reader, the key model, the transcoder, the
//! storage traits with in-memory backends, and the persistence coordinator.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. Native
//! backends and the ingestion driver live in the `dicom-sink` crate.
//!
//! ```text
//! bytes ──▶ part10::Part10Reader ──events──▶ transcode::Transcoder
//!                                                 │ Transcoded { document, identifiers }
//!                                                 ▼
//!                                      persist::Persister ──▶ store::*
//! ```

pub mod event;
pub mod keys;
pub mod part10;
pub mod persist;
pub mod store;
pub mod tag;
pub mod transcode;
pub mod vr;
