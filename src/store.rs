use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::GraphError;
use crate::schema::SchemaDescription;

pub const DEFAULT_OUTPUT_DIR: &str = "graph-out";

/// Output layout of one run:
///
/// ```text
/// {root}/{adapter key}/nodes.jsonl.gz
/// {root}/{adapter key}/edges.jsonl.gz
/// {root}/{adapter key}/schema.json
/// ```
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

/// Node and edge stream destinations of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub nodes: Utf8PathBuf,
    pub edges: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `graph-out` under the current directory.
    pub fn in_current_dir() -> Result<Self, GraphError> {
        let cwd = std::env::current_dir().map_err(|err| GraphError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd.join(DEFAULT_OUTPUT_DIR))
            .map_err(|_| GraphError::Filesystem("invalid output path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn adapter_dir(&self, key: &str) -> Utf8PathBuf {
        self.root.join(sanitize_key(key))
    }

    pub fn outputs(&self, key: &str) -> OutputPaths {
        let dir = self.adapter_dir(key);
        OutputPaths {
            nodes: dir.join("nodes.jsonl.gz"),
            edges: dir.join("edges.jsonl.gz"),
        }
    }

    pub fn schema_path(&self, key: &str) -> Utf8PathBuf {
        self.adapter_dir(key).join("schema.json")
    }

    /// Removes stream files left by an earlier run; the writer only appends.
    pub fn clear_outputs(outputs: &OutputPaths) -> Result<(), GraphError> {
        for path in [&outputs.nodes, &outputs.edges] {
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(GraphError::Filesystem(format!("remove {path}: {err}"))),
            }
        }
        Ok(())
    }

    pub fn write_schema(path: &Utf8Path, schema: &SchemaDescription) -> Result<(), GraphError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(schema)
            .map_err(|err| GraphError::Serialization(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| GraphError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

// adapter keys embed names and timestamps; keep them usable as a directory name
fn sanitize_key(key: &str) -> String {
    let cleaned = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.is_empty() {
        "adapter".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = OutputStore::new("/tmp/out");
        let outputs = store.outputs("chipseq:H3K4me3 run");
        assert_eq!(
            outputs.nodes.as_str(),
            "/tmp/out/chipseq_H3K4me3_run/nodes.jsonl.gz"
        );
        assert_eq!(
            outputs.edges.as_str(),
            "/tmp/out/chipseq_H3K4me3_run/edges.jsonl.gz"
        );
        assert_eq!(
            store.schema_path("genome").as_str(),
            "/tmp/out/genome/schema.json"
        );
    }

    #[test]
    fn schema_is_written_atomically() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = OutputStore::new(root);
        let path = store.schema_path("genome");
        let info = crate::schema::DatapackInfo::new("Genome", "genome", "tiles");
        OutputStore::write_schema(&path, &SchemaDescription::new(&info)).unwrap();
        assert!(path.as_std_path().exists());
        assert!(!path.with_extension("json.tmp").as_std_path().exists());
    }
}
