//! Storage for tables that are expensive to recompute, such as the lookup built through the
//! identifier mapping service.

use crate::reader::{read_tsv, TsvOptions};
use crate::writer::write_tsv;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The key the lookup is cached under.
pub const LOOKUP_KEY: &str = "lookup";

/// A keyed store of tables.
pub trait CacheStore {
    /// Returns the table stored under `key`, if any.
    fn get(&self, key: &str) -> anyhow::Result<Option<DataFrame>>;
    /// Stores `table` under `key`, replacing what was there.
    fn put(&mut self, key: &str, table: &DataFrame) -> anyhow::Result<()>;
}

/// Keeps tables in memory for the lifetime of the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    tables: HashMap<String, DataFrame>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<DataFrame>> {
        Ok(self.tables.get(key).cloned())
    }

    fn put(&mut self, key: &str, table: &DataFrame) -> anyhow::Result<()> {
        self.tables.insert(key.to_string(), table.clone());
        Ok(())
    }
}

/// Keeps every table as `<dir>/<key>.tsv`.
#[derive(Debug, Clone)]
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn new<T: AsRef<Path>>(dir: T) -> DirCache {
        DirCache {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.tsv", key))
    }
}

impl CacheStore for DirCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<DataFrame>> {
        let path = self.path_of(key);
        if !path.is_file() {
            debug!("cache miss for {:?} at {:?}", key, path);
            return Ok(None);
        }
        debug!("cache hit for {:?} at {:?}", key, path);
        Ok(Some(read_tsv(&path, &TsvOptions::default())?))
    }

    fn put(&mut self, key: &str, table: &DataFrame) -> anyhow::Result<()> {
        write_tsv(table, self.path_of(key))
    }
}
