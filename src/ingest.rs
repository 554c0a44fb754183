//! Ingestion driver.
//!
//! Walks a file tree, and for every file with the configured extension
//! reads the bytes, runs reader and transcoder to completion, then hands the
//! record to the configured [`Persister`]. Files are processed one at a time
//! in sorted path order.
//!
//! A hard failure stops the walk unless `keep_going` is set, in which case
//! the failure is recorded and the next file is processed; the run still
//! fails at the end if anything failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use walkdir::WalkDir;

use dicom_sink_core::part10::{BulkDataMode, Part10Reader, ReaderOptions};
use dicom_sink_core::persist::{PersistError, PersistOutcome, Persister, RowChange};
use dicom_sink_core::transcode::{transcode, TranscodeError, TranscodeOptions, Transcoded};

use crate::backend;
use crate::config::Config;
use crate::db;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: TranscodeError,
    },

    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub extension: String,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub keep_going: bool,
    pub dry_run: bool,
    pub bulk_data: BulkDataMode,
    pub bulk_threshold: usize,
    pub transcode: TranscodeOptions,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extension: config.ingest.extension.clone(),
            exclude_globs: config.ingest.exclude_globs.clone(),
            follow_symlinks: config.ingest.follow_symlinks,
            keep_going: config.ingest.keep_going,
            dry_run: false,
            bulk_data: config.ingest.bulk_data.into(),
            bulk_threshold: config.ingest.bulk_threshold,
            transcode: TranscodeOptions {
                include_binary: config.ingest.include_binary,
                ..TranscodeOptions::default()
            },
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub soft_failures: usize,
    /// `None` on a dry run.
    pub persisted: Option<PersistOutcome>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub discovered: usize,
    pub processed: usize,
    pub soft_failures: usize,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl IngestReport {
    fn record(&mut self, outcome: &FileOutcome) {
        self.processed += 1;
        self.soft_failures += outcome.soft_failures;
        let change = match &outcome.persisted {
            Some(PersistOutcome::Indexed { index, .. }) => Some(*index),
            Some(PersistOutcome::Document { change, .. }) => Some(*change),
            None => None,
        };
        match change {
            Some(RowChange::Created) => self.created += 1,
            Some(RowChange::Updated) => self.updated += 1,
            None => {}
        }
    }
}

/// Reader → transcoder → persister for a sequence of files.
pub struct IngestPipeline {
    persister: Option<Arc<dyn Persister>>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(persister: Arc<dyn Persister>, options: IngestOptions) -> Self {
        Self {
            persister: Some(persister),
            options,
        }
    }

    /// A pipeline that reads and transcodes but never persists.
    pub fn dry_run(options: IngestOptions) -> Self {
        Self {
            persister: None,
            options: IngestOptions {
                dry_run: true,
                ..options
            },
        }
    }

    /// Decode one in-memory file.
    pub fn decode(&self, path: &Path, bytes: &[u8]) -> Result<Transcoded, TranscodeError> {
        let reader = Part10Reader::new(
            bytes,
            ReaderOptions {
                bulk_data: self.options.bulk_data,
                bulk_threshold: self.options.bulk_threshold,
                source_uri: path.display().to_string(),
            },
        )?;
        transcode(reader, &self.options.transcode)
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let bytes = std::fs::read(path).map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let record = self.decode(path, &bytes).map_err(|source| IngestError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        if !record.notes.is_empty() {
            tracing::warn!(
                path = %path.display(),
                count = record.notes.len(),
                "values could not be decoded and were stored as null"
            );
        }

        let persisted = match &self.persister {
            Some(persister) => Some(persister.persist(&record, &bytes).await.map_err(
                |source| IngestError::Persist {
                    path: path.to_path_buf(),
                    source,
                },
            )?),
            None => None,
        };

        tracing::debug!(path = %path.display(), ?persisted, "file ingested");
        Ok(FileOutcome {
            path: path.to_path_buf(),
            soft_failures: record.notes.len(),
            persisted,
        })
    }

    /// Ingest every matching file under `root` (or `root` itself if it is a
    /// file).
    pub async fn run(&self, root: &Path) -> Result<IngestReport> {
        let files = discover(root, &self.options)?;
        let mut report = IngestReport {
            discovered: files.len(),
            ..IngestReport::default()
        };
        tracing::info!(root = %root.display(), files = files.len(), "starting ingest");

        for path in &files {
            match self.ingest_file(path).await {
                Ok(outcome) => {
                    println!("Processed file {}", path.display());
                    report.record(&outcome);
                }
                Err(e) if self.options.keep_going => {
                    tracing::error!(error = %e, "skipping file");
                    report.failures.push((path.clone(), e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }
}

/// Files to ingest under `root`, sorted by path.
pub fn discover(root: &Path, options: &IngestOptions) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let exclude_set = build_globset(&options.exclude_globs)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !has_extension(path, &options.extension) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

/// CLI flags for `dcmsink ingest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestFlags {
    pub keep_going: bool,
    pub dry_run: bool,
    pub include_binary: bool,
}

/// CLI entry point.
pub async fn run_ingest(config: &Config, path: Option<PathBuf>, flags: IngestFlags) -> Result<()> {
    let root = path
        .or_else(|| config.ingest.root.clone())
        .context("No path given and ingest.root is not configured")?;

    let mut options = IngestOptions::from_config(config);
    options.keep_going |= flags.keep_going;
    options.transcode.include_binary |= flags.include_binary;

    let (report, pool) = if flags.dry_run {
        let pipeline = IngestPipeline::dry_run(options);
        (pipeline.run(&root).await?, None)
    } else {
        let pool = db::connect(config).await?;
        let persister = backend::build_persister(config, &pool)?;
        let pipeline = IngestPipeline::new(persister, options);
        (pipeline.run(&root).await?, Some(pool))
    };

    if flags.dry_run {
        println!("ingest {} (dry-run)", root.display());
    } else {
        println!("ingest {}", root.display());
    }
    println!("  files found: {}", report.discovered);
    println!("  processed: {}", report.processed);
    if !flags.dry_run {
        println!("  created: {}", report.created);
        println!("  updated: {}", report.updated);
    }
    println!("  soft failures: {}", report.soft_failures);

    if let Some(pool) = pool {
        pool.close().await;
    }

    if !report.failures.is_empty() {
        println!("  failed: {}", report.failures.len());
        for (path, error) in &report.failures {
            println!("    {}: {}", path.display(), error);
        }
        bail!(
            "{} of {} files failed",
            report.failures.len(),
            report.discovered
        );
    }

    println!("ok");
    Ok(())
}
