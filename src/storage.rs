//! Fjall-backed key-value storage used as the delegated backing store
//! behind the dialogue slot map, the context cache, and undelivered alerts.
//!
//! The core treats this as a pluggable write-through/read-through layer;
//! callers keep their own in-memory state and degrade gracefully when a
//! backing operation fails.

use anyhow::{Context, Result};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use std::path::Path;

/// A shared fjall keyspace holding one partition per store.
pub struct KvStore {
    keyspace: Keyspace,
}

impl KvStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path)
            .open()
            .context("Failed to open fjall keyspace")?;
        Ok(Self { keyspace })
    }

    /// Open (or create) a named partition.
    pub fn partition(&self, name: &str) -> Result<KvPartition> {
        let partition = self
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())
            .context(format!("Failed to open partition '{name}'"))?;
        Ok(KvPartition { partition })
    }

    /// Flush all partitions to disk.
    pub fn flush(&self) -> Result<()> {
        self.keyspace
            .persist(fjall::PersistMode::SyncAll)
            .context("Failed to persist keyspace")?;
        Ok(())
    }
}

/// A single partition with byte-oriented operations.
#[derive(Clone)]
pub struct KvPartition {
    partition: PartitionHandle,
}

impl KvPartition {
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition
            .insert(key, value)
            .context("Failed to put value")?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let res = self.partition.get(key).context("Failed to get value")?;
        Ok(res.map(|slice| slice.to_vec()))
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.partition
            .remove(key)
            .context("Failed to delete value")?;
        Ok(())
    }

    /// Collect all entries whose key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.partition.prefix(prefix) {
            let (key, value) = item.context("Failed to scan prefix")?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partition_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path()).unwrap();
        let part = store.partition("slots").unwrap();

        part.put(b"user:1:company_name", b"Acme").unwrap();
        assert_eq!(
            part.get(b"user:1:company_name").unwrap(),
            Some(b"Acme".to_vec())
        );

        part.delete(b"user:1:company_name").unwrap();
        assert!(part.get(b"user:1:company_name").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::open(temp_dir.path()).unwrap();
        let part = store.partition("pending_alerts").unwrap();

        part.put(b"alerts:u1:a", b"1").unwrap();
        part.put(b"alerts:u1:b", b"2").unwrap();
        part.put(b"alerts:u2:a", b"3").unwrap();

        let hits = part.scan_prefix(b"alerts:u1:").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let store = KvStore::open(&path).unwrap();
            let part = store.partition("context").unwrap();
            part.put(b"ns:m1", b"{}").unwrap();
            store.flush().unwrap();
        }

        {
            let store = KvStore::open(&path).unwrap();
            let part = store.partition("context").unwrap();
            assert_eq!(part.get(b"ns:m1").unwrap(), Some(b"{}".to_vec()));
        }
    }
}
