use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::entry::Entry;
use crate::search::SearchResult;

/// JSON-lines file of directory entries, one entry per line.
pub struct EntryFile {
    path: PathBuf,
}

/// One line of a search export: the entry plus where it came from.
#[derive(Serialize, Deserialize, Debug)]
pub struct ExportedEntry {
    pub timestamp: String,
    pub message_id: i32,
    #[serde(flatten)]
    pub entry: Entry,
}

impl EntryFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        EntryFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_entry(&self, entry: &Entry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open entry file {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Append every collected entry of `result`, stamped with the time of export.
    pub fn export_result(&self, result: &SearchResult) -> Result<usize> {
        let entries = result.search_entries().unwrap_or_default();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open entry file {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        let timestamp = chrono::Utc::now().to_rfc3339();
        for e in entries {
            let line = ExportedEntry {
                timestamp: timestamp.clone(),
                message_id: result.message_id(),
                entry: e.entry.clone(),
            };
            serde_json::to_writer(&mut writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(entries.len())
    }

    pub fn read_entries(&self) -> Result<Vec<Entry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open entry file {} for reading", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: Entry = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid entry", self.path.display(), number + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::LdapResult;
    use crate::search::SearchResultEntry;

    #[test]
    fn test_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = EntryFile::new(dir.path().join("entries.jsonl"));
        assert!(file.read_entries().unwrap().is_empty());
        file.append_entry(&Entry::new("dc=example,dc=com").with_attribute("objectClass", ["domain"]))
            .unwrap();
        file.append_entry(&Entry::new("ou=people,dc=example,dc=com")).unwrap();
        let entries = file.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].values("objectclass"), ["domain"]);
    }

    #[test]
    fn test_export_lines_read_back_as_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = EntryFile::new(dir.path().join("export.jsonl"));
        let result = SearchResult::from_parts(
            3,
            LdapResult::success(),
            1,
            0,
            Some(vec![SearchResultEntry::new(Entry::new("cn=a,dc=example").with_attribute("cn", ["a"]))]),
            Some(vec![]),
        );
        assert_eq!(file.export_result(&result).unwrap(), 1);
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("\"message_id\":3"));
        let entries = file.read_entries().unwrap();
        assert_eq!(entries[0].dn, "cn=a,dc=example");
    }

    #[test]
    fn test_bad_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"dn\":\"dc=x\"}\nnot json\n").unwrap();
        let err = EntryFile::new(&path).read_entries().unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }
}
