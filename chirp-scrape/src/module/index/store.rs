///! Persisted CTID index
///!
///! One `id,title,valid_flag` line per probed id, no header. The file only
///! grows; a later line for an id already present replaces it on read.

use chirp_common::{IndexEntry, ProbeStatus};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{ChirpError, Result};

#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in id order, last line winning per id.
    ///
    /// A missing file is an empty index; any other read failure is
    /// [`ChirpError::IndexUnavailable`].
    pub fn load(&self) -> Result<Vec<IndexEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No index at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ChirpError::IndexUnavailable {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let entries = parse_index(&content);
        tracing::debug!("Loaded {} index entries from {}", entries.len(), self.path.display());
        Ok(entries)
    }

    pub fn valid_entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.load()?.into_iter().filter(IndexEntry::is_valid).collect())
    }

    /// Opens the index for appending, creating it if needed. Existing lines
    /// are never discarded; re-probed ids are written after them.
    pub fn open_writer(&self) -> Result<IndexWriter> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path).map_err(|source| ChirpError::IndexUnavailable {
            path: self.path.clone(),
            source,
        })?;

        Ok(IndexWriter {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
        })
    }
}

fn parse_index(content: &str) -> Vec<IndexEntry> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut entries: BTreeMap<u32, IndexEntry> = BTreeMap::new();

    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Error parsing index line {}: {}", line + 1, e);
                continue;
            }
        };

        let id_field = record.get(0).unwrap_or_default().trim();
        let id = match id_field.parse::<u32>() {
            Ok(id) => id,
            // legacy files started with an `id,title,valid` header
            Err(_) if line == 0 => continue,
            Err(_) => {
                tracing::warn!("Skipping index line {}: bad id '{}'", line + 1, id_field);
                continue;
            }
        };

        let title = record.get(1).unwrap_or_default().trim().to_string();
        let status = match record.get(2).and_then(ProbeStatus::from_flag) {
            Some(status) => status,
            None => {
                tracing::warn!("Skipping index line {}: bad validity flag", line + 1);
                continue;
            }
        };

        entries.insert(id, IndexEntry { id, title, status });
    }

    entries.into_values().collect()
}

/// Appends entries, flushing each line before returning.
pub struct IndexWriter {
    writer: csv::Writer<File>,
}

impl IndexWriter {
    pub fn append(&mut self, entry: &IndexEntry) -> Result<()> {
        let id = entry.id.to_string();
        self.writer
            .write_record([id.as_str(), entry.title.as_str(), entry.status.as_flag()])?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path().join("none.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_last_line_wins_and_skips_legacy_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.csv");
        fs::write(
            &path,
            "id,title,valid\n\
             3,,false\n\
             1,\"Cook County, Illinois\",true\n\
             3,,error\n\
             oops,,true\n\
             2,,maybe\n\
             3,\"Lake County, Illinois\",true\n",
        )
        .unwrap();

        let entries = IndexStore::new(&path).load().unwrap();
        assert_eq!(
            entries,
            vec![
                IndexEntry::valid(1, "Cook County, Illinois"),
                IndexEntry::valid(3, "Lake County, Illinois"),
            ]
        );
    }

    #[test]
    fn test_writer_flushes_each_line() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path().join("nested/index.csv"));

        let mut writer = store.open_writer().unwrap();
        writer.append(&IndexEntry::valid(7, "Cook County, Illinois")).unwrap();
        writer.append(&IndexEntry::error(8)).unwrap();

        // still holding the writer
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content, "7,\"Cook County, Illinois\",true\n8,,error\n");
    }

    #[test]
    fn test_writer_keeps_existing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.csv");
        fs::write(&path, "1,,false\n2,,false\n").unwrap();

        let store = IndexStore::new(&path);
        let mut writer = store.open_writer().unwrap();
        writer.append(&IndexEntry::valid(2, "Lake County, Illinois")).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1,,false\n2,,false\n2,\"Lake County, Illinois\",true\n"
        );
        assert_eq!(
            store.load().unwrap(),
            vec![IndexEntry::miss(1), IndexEntry::valid(2, "Lake County, Illinois")]
        );
    }

    #[test]
    fn test_unreadable_index_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(store.load(), Err(ChirpError::IndexUnavailable { .. })));
    }
}
