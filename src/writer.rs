use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::error::GraphError;
use crate::record::{GraphRecord, to_wire};

/// Appends JSON lines to gzip files. Each `append` call adds one gzip member,
/// so a destination accumulates batches across calls and adapter runs.
#[derive(Debug, Clone, Copy)]
pub struct StreamWriter {
    level: Compression,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl StreamWriter {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    pub fn append<T: Serialize>(&self, records: &[T], destination: &Path) -> Result<usize, GraphError> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| GraphError::Filesystem(err.to_string()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .map_err(|err| {
                GraphError::Filesystem(format!("open {}: {err}", destination.display()))
            })?;
        let keep = file
            .metadata()
            .map_err(|err| GraphError::Filesystem(err.to_string()))?
            .len();
        let rollback = file
            .try_clone()
            .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        match self.write_member(records, file) {
            Ok(()) => Ok(records.len()),
            Err(err) => {
                // cut the unfinished member so earlier batches stay readable
                rollback.set_len(keep).map_err(|truncate| {
                    GraphError::Filesystem(format!(
                        "{} is corrupt: {err}; truncating failed: {truncate}",
                        destination.display()
                    ))
                })?;
                Err(err)
            }
        }
    }

    fn write_member<T: Serialize>(&self, records: &[T], file: File) -> Result<(), GraphError> {
        let mut encoder = BufWriter::new(GzEncoder::new(file, self.level));
        for record in records {
            let line = to_wire(record)?;
            encoder
                .write_all(line.as_bytes())
                .and_then(|_| encoder.write_all(b"\n"))
                .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        }
        let encoder = encoder
            .into_inner()
            .map_err(|err| GraphError::Filesystem(err.error().to_string()))?;
        let mut file = encoder
            .finish()
            .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        file.flush()
            .map_err(|err| GraphError::Filesystem(err.to_string()))
    }
}

/// All lines of a (possibly multi-member) gzip JSON-lines file.
pub fn read_lines(path: &Path) -> Result<Vec<String>, GraphError> {
    let file = File::open(path)
        .map_err(|err| GraphError::Filesystem(format!("open {}: {err}", path.display())))?;
    BufReader::new(MultiGzDecoder::new(file))
        .lines()
        .filter(|line| line.as_ref().map(|text| !text.is_empty()).unwrap_or(true))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| GraphError::Filesystem(err.to_string()))
}

pub fn read_records(path: &Path) -> Result<Vec<GraphRecord>, GraphError> {
    read_lines(path)?
        .iter()
        .map(|line| GraphRecord::from_wire(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{GraphEdge, GraphNode};

    #[test]
    fn append_accumulates_across_calls() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("out").join("nodes.jsonl.gz");
        let writer = StreamWriter::default();

        writer
            .append(&[GraphNode::new("a", "Gene"), GraphNode::new("b", "Gene")], &path)
            .unwrap();
        writer.append(&[GraphNode::new("c", "Gene")], &path).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[2], GraphRecord::Node(node) if node.id == "c"));
    }

    #[test]
    fn empty_batch_does_not_create_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("edges.jsonl.gz");
        let written = StreamWriter::default()
            .append::<GraphEdge>(&[], &path)
            .unwrap();
        assert_eq!(written, 0);
        assert!(!path.exists());
    }

    #[test]
    fn one_json_value_per_line() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("edges.jsonl.gz");
        let edge = GraphEdge::new("x", "y", "has\nnewline").with_property("note", "a\nb");
        StreamWriter::with_level(1).append(&[edge], &path).unwrap();
        let lines = read_lines(&path).unwrap();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["label"], "has\nnewline");
    }

    struct Flaky {
        id: &'static str,
        fail: bool,
    }

    impl Serialize for Flaky {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if self.fail {
                return Err(serde::ser::Error::custom("refused"));
            }
            serializer.serialize_str(self.id)
        }
    }

    #[test]
    fn failed_batch_leaves_earlier_batches_readable() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nodes.jsonl.gz");
        let writer = StreamWriter::default();
        writer.append(&[Flaky { id: "a", fail: false }], &path).unwrap();

        let failed = writer.append(
            &[Flaky { id: "b", fail: false }, Flaky { id: "c", fail: true }],
            &path,
        );
        assert!(failed.is_err());
        assert_eq!(read_lines(&path).unwrap(), vec!["\"a\""]);

        writer.append(&[Flaky { id: "d", fail: false }], &path).unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["\"a\"", "\"d\""]);
    }
}
