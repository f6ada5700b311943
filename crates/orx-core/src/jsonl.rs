//! Newline-delimited JSON helpers shared by inputs, artifacts and outputs

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{OrxError, Result};

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    Ok(())
}

/// Read every record of a JSONL file
///
/// Blank lines and lines starting with `#` or `//` are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| {
            OrxError::Serialization(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Write records to a JSONL file, replacing any previous content
pub fn write_jsonl<'a, T, I>(path: &Path, rows: I) -> Result<usize>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;

    for row in rows {
        let line =
            serde_json::to_string(row).map_err(|e| OrxError::Serialization(e.to_string()))?;
        writeln!(writer, "{line}").map_err(|e| io_error(path, e))?;
        count += 1;
    }

    writer.flush().map_err(|e| io_error(path, e))?;
    Ok(count)
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> OrxError {
    OrxError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;

    #[test]
    fn test_write_then_read_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/docs.jsonl");

        let docs = vec![Document::new("1", "First."), Document::new("2", "Second.")];
        assert_eq!(write_jsonl(&path, &docs).unwrap(), 2);

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("\n# comment\n// another\n\n");
        fs::write(&path, content).unwrap();

        let read: Vec<Document> = read_jsonl(&path).unwrap();
        assert_eq!(read, docs);
    }

    #[test]
    fn test_read_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"doc_id\": \"1\", \"text\": \"ok\"}\n{not json}\n").unwrap();

        let err = read_jsonl::<Document>(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
