//! Storage engines beneath the catalog store.
//!
//! `MemoryEngine` backs tests and the default development store;
//! `FjallEngine` backs the daemon. Both expose the same family-dump format
//! for checkpoints and meta-SST exports so a backup taken on one engine can
//! be restored on the other.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use fjall::{Keyspace, PartitionCreateOptions, PersistMode};

use crate::{Batch, BatchOp, SC_ASYNC, SC_FILTERING};

/// Key filter applied while exporting a family.
pub type KeyFilter<'a> = &'a dyn Fn(&[u8]) -> bool;

/// Storage-engine seam of the catalog store.
///
/// Engines are ordered byte maps. Scans return owned entry lists in
/// ascending key order; batches apply atomically.
pub trait KvEngine: Send + Sync + 'static {
    /// Bit-OR of `SC_*` capability flags.
    fn capability(&self) -> u32;

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, ascending.
    fn prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// All entries in `[start, end)`, ascending. An empty `end` means
    /// unbounded.
    fn range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Entries starting at `start` that still carry `prefix`.
    fn range_with_prefix(
        &self,
        start: &[u8],
        prefix: &[u8],
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn apply_batch(&self, batch: &Batch) -> anyhow::Result<()>;

    fn flush(&self) -> anyhow::Result<()>;

    fn compact(&self) -> anyhow::Result<()>;

    /// Copy the whole table into `dir/name` and return the checkpoint
    /// directory.
    fn create_checkpoint(&self, dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
        let cp_dir = dir.join(name);
        fs::create_dir_all(&cp_dir).context("create checkpoint dir")?;
        let entries = self.range(&[], &[])?;
        write_table_file(&cp_dir.join("catalog.tbl"), &entries)?;
        Ok(cp_dir)
    }

    fn drop_checkpoint(&self, dir: &Path, name: &str) -> anyhow::Result<()> {
        let cp_dir = dir.join(name);
        if cp_dir.exists() {
            fs::remove_dir_all(&cp_dir).context("remove checkpoint dir")?;
        }
        Ok(())
    }

    /// Dump one key family to a record file under `dir/name` for off-node
    /// restore. Returns the written files.
    fn backup_table(
        &self,
        dir: &Path,
        name: &str,
        table_prefix: &[u8],
        filter: Option<KeyFilter<'_>>,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .prefix(table_prefix)?
            .into_iter()
            .filter(|(key, _)| filter.map_or(true, |keep| keep(key)))
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let out_dir = dir.join(name);
        fs::create_dir_all(&out_dir).context("create backup dir")?;
        let file = out_dir.join(format!("family_{:02x}.tbl", table_prefix.first().unwrap_or(&0)));
        write_table_file(&file, &entries)?;
        Ok(vec![file])
    }

    /// Ingest record files previously produced by `backup_table` or
    /// `create_checkpoint`.
    fn restore_from_files(&self, files: &[PathBuf]) -> anyhow::Result<()> {
        for file in files {
            let entries = read_table_file(file)?;
            let batch: Batch = entries
                .into_iter()
                .map(|(key, value)| BatchOp::Put { key, value })
                .collect();
            self.apply_batch(&batch)?;
        }
        Ok(())
    }
}

/// In-memory engine over an ordered map.
pub struct MemoryEngine {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryEngine {
    fn capability(&self) -> u32 {
        SC_ASYNC
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let guard = self.inner.read().expect("memory engine lock poisoned");
        Ok(guard.get(key).cloned())
    }

    fn prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.inner.read().expect("memory engine lock poisoned");
        Ok(guard
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.inner.read().expect("memory engine lock poisoned");
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };
        Ok(guard
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn range_with_prefix(
        &self,
        start: &[u8],
        prefix: &[u8],
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.inner.read().expect("memory engine lock poisoned");
        Ok(guard
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply_batch(&self, batch: &Batch) -> anyhow::Result<()> {
        let mut guard = self.inner.write().expect("memory engine lock poisoned");
        for op in batch {
            match op {
                BatchOp::Put { key, value } => {
                    guard.insert(key.clone(), value.clone());
                }
                BatchOp::Remove { key } => {
                    guard.remove(key);
                }
                BatchOp::RemoveRange { start, end } => {
                    let doomed: Vec<Vec<u8>> = guard
                        .range(start.clone()..end.clone())
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in doomed {
                        guard.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn compact(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fjall-backed engine storing the catalog in one keyspace partition.
pub struct FjallEngine {
    keyspace: Arc<Keyspace>,
    table: fjall::PartitionHandle,
}

impl FjallEngine {
    pub fn open(keyspace: Arc<Keyspace>) -> anyhow::Result<Self> {
        let table = keyspace.open_partition("catalog", PartitionCreateOptions::default())?;
        Ok(Self { keyspace, table })
    }

    /// Open a keyspace rooted at `path` and the catalog partition in it.
    pub fn open_at(path: &Path) -> anyhow::Result<Self> {
        let keyspace = Arc::new(
            fjall::Config::new(path)
                .open()
                .context("open fjall keyspace")?,
        );
        Self::open(keyspace)
    }
}

impl KvEngine for FjallEngine {
    fn capability(&self) -> u32 {
        SC_FILTERING | SC_ASYNC
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.table.get(key)?.map(|slice| slice.to_vec()))
    }

    fn prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.table.prefix(prefix.to_vec()) {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn range(&self, start: &[u8], end: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>>> = if end.is_empty() {
            Box::new(self.table.range(start.to_vec()..))
        } else {
            Box::new(self.table.range(start.to_vec()..end.to_vec()))
        };
        for item in iter {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn range_with_prefix(
        &self,
        start: &[u8],
        prefix: &[u8],
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.table.range(start.to_vec()..) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn apply_batch(&self, batch: &Batch) -> anyhow::Result<()> {
        let mut write = self.keyspace.batch();
        for op in batch {
            match op {
                BatchOp::Put { key, value } => {
                    write.insert(&self.table, key.clone(), value.clone());
                }
                BatchOp::Remove { key } => {
                    write.remove(&self.table, key.clone());
                }
                BatchOp::RemoveRange { start, end } => {
                    // Fjall batches have no range delete; expand to per-key
                    // removes over the current range contents.
                    for item in self.table.range(start.clone()..end.clone()) {
                        let (key, _) = item?;
                        write.remove(&self.table, key.to_vec());
                    }
                }
            }
        }
        write.commit()?;
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn compact(&self) -> anyhow::Result<()> {
        // Fjall compacts in the background; a persist is the strongest
        // manual barrier available.
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Write entries as `[u32 key_len][key][u32 value_len][value]` records.
fn write_table_file(path: &Path, entries: &[(Vec<u8>, Vec<u8>)]) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    for (key, value) in entries {
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value);
    }
    let mut file = fs::File::create(path).context("create table file")?;
    file.write_all(&buf).context("write table file")?;
    file.sync_all().context("sync table file")?;
    Ok(())
}

/// Decode a record file produced by `write_table_file`.
fn read_table_file(path: &Path) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let data = fs::read(path).context("read table file")?;
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let key = read_record(&data, &mut offset)?;
        let value = read_record(&data, &mut offset)?;
        out.push((key, value));
    }
    Ok(out)
}

fn read_record(data: &[u8], offset: &mut usize) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(*offset + 4 <= data.len(), "short record length");
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    let len = u32::from_be_bytes(len_bytes) as usize;
    anyhow::ensure!(*offset + len <= data.len(), "short record payload");
    let out = data[*offset..*offset + len].to_vec();
    *offset += len;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_engine_prefix_and_range() {
        let engine = MemoryEngine::new();
        engine
            .apply_batch(&vec![
                BatchOp::Put {
                    key: b"a1".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"a2".to_vec(),
                    value: b"2".to_vec(),
                },
                BatchOp::Put {
                    key: b"b1".to_vec(),
                    value: b"3".to_vec(),
                },
            ])
            .unwrap();

        let hits = engine.prefix(b"a").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, b"a1");

        let ranged = engine.range(b"a2", b"b2").unwrap();
        assert_eq!(ranged.len(), 2);

        let unbounded = engine.range(b"a2", &[]).unwrap();
        assert_eq!(unbounded.len(), 2);
    }

    #[test]
    fn memory_engine_remove_range() {
        let engine = MemoryEngine::new();
        engine
            .apply_batch(&vec![
                BatchOp::Put {
                    key: b"k1".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"k2".to_vec(),
                    value: b"2".to_vec(),
                },
                BatchOp::Put {
                    key: b"k3".to_vec(),
                    value: b"3".to_vec(),
                },
            ])
            .unwrap();
        engine
            .apply_batch(&vec![BatchOp::RemoveRange {
                start: b"k1".to_vec(),
                end: b"k3".to_vec(),
            }])
            .unwrap();
        assert!(engine.get(b"k1").unwrap().is_none());
        assert!(engine.get(b"k2").unwrap().is_none());
        assert!(engine.get(b"k3").unwrap().is_some());
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::new();
        engine
            .apply_batch(&vec![
                BatchOp::Put {
                    key: vec![0x01, 1],
                    value: b"space".to_vec(),
                },
                BatchOp::Put {
                    key: vec![0x02, 2],
                    value: b"other".to_vec(),
                },
            ])
            .unwrap();

        let files = engine
            .backup_table(dir.path(), "backup_1", &[0x01], None)
            .unwrap();
        assert_eq!(files.len(), 1);

        let restored = MemoryEngine::new();
        restored.restore_from_files(&files).unwrap();
        assert_eq!(restored.get(&[0x01, 1]).unwrap().unwrap(), b"space");
        assert!(restored.get(&[0x02, 2]).unwrap().is_none());
    }
}
