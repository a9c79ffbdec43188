//! Embedded analytical store.
//!
//! Layout: `{root}/{table}.parquet` holds the table data and
//! `{root}/{table}.meta.json` records where it came from.
//!
//! The store is an explicitly owned handle: open it once and pass it by
//! reference to ingestion and indicator queries.

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::files::write_parquet;
use crate::data::provider::DataError;
use crate::domain::is_identifier;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid table name '{0}': use ASCII alphanumerics and '_'")]
    InvalidTableName(String),

    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    #[error("source file {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("table read error: {0}")]
    Read(String),

    #[error("table metadata error: {0}")]
    Meta(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Provenance recorded when a table is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub source: PathBuf,
    pub source_hash: String,
    pub row_count: usize,
    pub created_at: NaiveDateTime,
}

/// Outcome of a create-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum TableCreation {
    Created(TableMeta),
    AlreadyExists,
}

/// Handle to the on-disk store.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", root.display())))?;
        tracing::debug!(root = %root.display(), "store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.parquet"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.meta.json"))
    }

    fn check_name(name: &str) -> Result<(), StoreError> {
        if is_identifier(name) {
            Ok(())
        } else {
            Err(StoreError::InvalidTableName(name.to_string()))
        }
    }

    pub fn table_exists(&self, name: &str) -> bool {
        is_identifier(name) && self.table_path(name).is_file()
    }

    /// Create table `name` as a copy of the Parquet file at `source`, unless a
    /// table of that name already exists. An existing table is never touched.
    pub fn create_table_from_parquet(
        &self,
        name: &str,
        source: &Path,
    ) -> Result<TableCreation, StoreError> {
        Self::check_name(name)?;

        if self.table_exists(name) {
            return Ok(TableCreation::AlreadyExists);
        }

        if !source.is_file() {
            return Err(StoreError::SourceMissing(source.to_path_buf()));
        }

        let bytes = fs::read(source)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", source.display())))?;
        let source_hash = blake3::hash(&bytes).to_hex().to_string();
        let mut df = ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| StoreError::Read(format!("{}: {e}", source.display())))?;

        let path = self.table_path(name);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        let meta = TableMeta {
            name: name.to_string(),
            source: source.to_path_buf(),
            source_hash,
            row_count: df.height(),
            created_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Meta(format!("serialize: {e}")))?;
        fs::write(self.meta_path(name), meta_json)
            .map_err(|e| StoreError::Meta(format!("write: {e}")))?;

        Ok(TableCreation::Created(meta))
    }

    /// Known table names, sorted.
    pub fn tables(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::Io(format!("read dir {}: {e}", self.root.display())))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_identifier(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Lazy scan over a table.
    pub fn scan(&self, name: &str) -> Result<LazyFrame, StoreError> {
        Self::check_name(name)?;
        if !self.table_exists(name) {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        LazyFrame::scan_parquet(self.table_path(name), Default::default())
            .map_err(|e| StoreError::Read(format!("{name}: {e}")))
    }

    /// Full table contents.
    pub fn read(&self, name: &str) -> Result<DataFrame, StoreError> {
        self.scan(name)?
            .collect()
            .map_err(|e| StoreError::Read(format!("{name}: {e}")))
    }

    /// Creation metadata, if the sidecar exists.
    pub fn meta(&self, name: &str) -> Result<Option<TableMeta>, StoreError> {
        Self::check_name(name)?;
        let path = self.meta_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| StoreError::Meta(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Meta(format!("parse {}: {e}", path.display())))
    }
}

/// BLAKE3 hex digest of a file's bytes.
pub fn file_hash(path: &Path) -> Result<String, StoreError> {
    let bytes =
        fs::read(path).map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
