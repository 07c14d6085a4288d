//! Shared lifecycle of every source adapter.
//!
//! An adapter is driven `pull_data -> iterate_nodes -> iterate_edges`.
//! Implementors only parse their source (`load`) and describe how to turn the
//! parsed data into lazy record batches; state tracking, skip accounting and
//! writing batches to the output streams live here.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::GraphError;
use crate::record::{GraphEdge, GraphNode};
use crate::schema::SchemaDescription;
use crate::store::OutputPaths;
use crate::writer::StreamWriter;

/// Lazy, finite sequence of record batches. Consumed once.
pub type Batches<'a, T> = Box<dyn Iterator<Item = Result<Vec<T>, GraphError>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Created,
    DataPulled,
    NodesEmitted,
    EdgesEmitted,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Created => "created",
            AdapterState::DataPulled => "data_pulled",
            AdapterState::NodesEmitted => "nodes_emitted",
            AdapterState::EdgesEmitted => "edges_emitted",
        };
        write!(f, "{name}")
    }
}

/// Result of one emission pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted<T> {
    Written { records: u64, batches: u64 },
    Collected(Vec<T>),
}

impl<T> Emitted<T> {
    pub fn count(&self) -> u64 {
        match self {
            Emitted::Written { records, .. } => *records,
            Emitted::Collected(records) => records.len() as u64,
        }
    }

    /// Collected records; empty when the batches went to disk.
    pub fn into_records(self) -> Vec<T> {
        match self {
            Emitted::Written { .. } => Vec::new(),
            Emitted::Collected(records) => records,
        }
    }
}

/// Counts records dropped while parsing a source.
#[derive(Debug, Default)]
pub struct SkipCounter {
    by_reason: BTreeMap<&'static str, u64>,
}

impl SkipCounter {
    pub fn record(&mut self, adapter: &str, error: &GraphError) {
        let reason = match error {
            GraphError::MissingIdentifierField { .. } => "missing_identifier",
            GraphError::MalformedRecord { .. } => "malformed_record",
            GraphError::DuplicateIdentifier(_) => "duplicate_identifier",
            _ => "other",
        };
        warn!(adapter, reason, "skipping record: {error}");
        *self.by_reason.entry(reason).or_default() += 1;
    }

    pub fn total(&self) -> u64 {
        self.by_reason.values().sum()
    }

    pub fn reset(&mut self) {
        self.by_reason.clear();
    }

    pub fn snapshot(&self) -> SkipReport {
        SkipReport {
            total: self.total(),
            by_reason: self
                .by_reason
                .iter()
                .map(|(reason, count)| (reason.to_string(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    pub total: u64,
    pub by_reason: BTreeMap<String, u64>,
}

/// State, destinations and skip counts shared by all adapters.
#[derive(Debug)]
pub struct Lifecycle {
    state: AdapterState,
    writer: StreamWriter,
    outputs: OutputPaths,
    skips: SkipCounter,
}

impl Lifecycle {
    pub fn new(outputs: OutputPaths) -> Self {
        Self {
            state: AdapterState::Created,
            writer: StreamWriter::default(),
            outputs,
            skips: SkipCounter::default(),
        }
    }

    pub fn with_writer(mut self, writer: StreamWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn outputs(&self) -> &OutputPaths {
        &self.outputs
    }

    pub fn skips(&self) -> &SkipCounter {
        &self.skips
    }

    pub fn skips_mut(&mut self) -> &mut SkipCounter {
        &mut self.skips
    }

    fn advance(&mut self, state: AdapterState) {
        self.state = self.state.max(state);
    }

    fn rewind(&mut self) {
        self.state = AdapterState::Created;
    }
}

pub trait Adapter {
    /// Stable adapter key, also used as the output directory name.
    fn name(&self) -> &str;

    fn lifecycle(&self) -> &Lifecycle;

    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Parses the source. Record-level problems are reported through
    /// `lifecycle_mut().skips_mut()` and the record is left out.
    fn load(&mut self) -> Result<(), GraphError>;

    /// Usable source records after the last `load`.
    fn record_count(&self) -> usize;

    fn node_batches(&self) -> Result<Batches<'_, GraphNode>, GraphError>;

    fn edge_batches(&self) -> Result<Batches<'_, GraphEdge>, GraphError>;

    fn describe_schema(&self) -> SchemaDescription;

    fn state(&self) -> AdapterState {
        self.lifecycle().state()
    }

    fn outputs(&self) -> &OutputPaths {
        self.lifecycle().outputs()
    }

    fn skip_report(&self) -> SkipReport {
        self.lifecycle().skips().snapshot()
    }

    /// Acquires and parses the source. Calling it again redoes the work; a
    /// failed pull leaves the adapter back in `Created`.
    fn pull_data(&mut self) -> Result<(), GraphError> {
        self.lifecycle_mut().rewind();
        self.lifecycle_mut().skips_mut().reset();
        self.load()?;
        let skipped = self.lifecycle().skips().total();
        if self.record_count() == 0 && skipped > 0 {
            return Err(GraphError::EmptyResult {
                adapter: self.name().to_string(),
                skipped,
            });
        }
        info!(
            adapter = self.name(),
            records = self.record_count(),
            skipped,
            "source loaded"
        );
        self.lifecycle_mut().advance(AdapterState::DataPulled);
        Ok(())
    }

    fn iterate_nodes(&mut self, write_to_disk: bool) -> Result<Emitted<GraphNode>, GraphError> {
        ensure_pulled(self.name(), self.state())?;
        let emitted = {
            let destination = write_to_disk.then(|| &self.lifecycle().outputs().nodes);
            drain(self.node_batches()?, &self.lifecycle().writer, destination)?
        };
        info!(adapter = self.name(), nodes = emitted.count(), "nodes emitted");
        self.lifecycle_mut().advance(AdapterState::NodesEmitted);
        Ok(emitted)
    }

    fn iterate_edges(&mut self, write_to_disk: bool) -> Result<Emitted<GraphEdge>, GraphError> {
        ensure_pulled(self.name(), self.state())?;
        let emitted = {
            let destination = write_to_disk.then(|| &self.lifecycle().outputs().edges);
            drain(self.edge_batches()?, &self.lifecycle().writer, destination)?
        };
        info!(adapter = self.name(), edges = emitted.count(), "edges emitted");
        self.lifecycle_mut().advance(AdapterState::EdgesEmitted);
        Ok(emitted)
    }
}

fn ensure_pulled(adapter: &str, state: AdapterState) -> Result<(), GraphError> {
    if state < AdapterState::DataPulled {
        return Err(GraphError::PrecursorNotReady {
            adapter: adapter.to_string(),
            state: state.to_string(),
        });
    }
    Ok(())
}

fn drain<T: Serialize>(
    batches: Batches<'_, T>,
    writer: &StreamWriter,
    destination: Option<&camino::Utf8PathBuf>,
) -> Result<Emitted<T>, GraphError> {
    match destination {
        Some(path) => {
            let mut records = 0u64;
            let mut count = 0u64;
            for batch in batches {
                let batch = batch?;
                records += writer.append(&batch, path.as_std_path())? as u64;
                count += 1;
            }
            Ok(Emitted::Written {
                records,
                batches: count,
            })
        }
        None => {
            let mut collected = Vec::new();
            for batch in batches {
                collected.extend(batch?);
            }
            Ok(Emitted::Collected(collected))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::schema::DatapackInfo;

    struct Fixed {
        lifecycle: Lifecycle,
        rows: Vec<Result<String, GraphError>>,
        ids: Vec<String>,
        fail_load: bool,
    }

    impl Fixed {
        fn new(root: &Utf8PathBuf, rows: Vec<Result<String, GraphError>>) -> Self {
            Self {
                lifecycle: Lifecycle::new(crate::store::OutputStore::new(root.clone()).outputs("fixed")),
                rows,
                ids: Vec::new(),
                fail_load: false,
            }
        }
    }

    impl Adapter for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn lifecycle_mut(&mut self) -> &mut Lifecycle {
            &mut self.lifecycle
        }

        fn load(&mut self) -> Result<(), GraphError> {
            if self.fail_load {
                return Err(GraphError::Filesystem("source vanished".to_string()));
            }
            self.ids.clear();
            for row in &self.rows {
                match row {
                    Ok(id) => self.ids.push(id.clone()),
                    Err(_) => self.lifecycle.skips_mut().record(
                        "fixed",
                        &GraphError::MissingIdentifierField {
                            kind: "row",
                            field: "id",
                        },
                    ),
                }
            }
            Ok(())
        }

        fn record_count(&self) -> usize {
            self.ids.len()
        }

        fn node_batches(&self) -> Result<Batches<'_, GraphNode>, GraphError> {
            Ok(Box::new(self.ids.chunks(2).map(|chunk| {
                Ok(chunk.iter().map(|id| GraphNode::new(id.as_str(), "Thing")).collect())
            })))
        }

        fn edge_batches(&self) -> Result<Batches<'_, GraphEdge>, GraphError> {
            Ok(Box::new(std::iter::once(Ok::<_, GraphError>(self
                .ids
                .windows(2)
                .map(|pair| GraphEdge::new(pair[0].as_str(), pair[1].as_str(), "next"))
                .collect()))))
        }

        fn describe_schema(&self) -> SchemaDescription {
            SchemaDescription::new(&DatapackInfo::new("Fixed", "fixed", "test"))
        }
    }

    fn root() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[test]
    fn edges_before_pull_fail_without_output() {
        let (_temp, root) = root();
        let mut adapter = Fixed::new(&root, vec![Ok("a".into()), Ok("b".into())]);
        assert_matches!(
            adapter.iterate_edges(true),
            Err(GraphError::PrecursorNotReady { .. })
        );
        assert_matches!(adapter.iterate_nodes(false), Err(GraphError::PrecursorNotReady { .. }));
        assert!(!adapter.outputs().edges.as_std_path().exists());
        assert_eq!(adapter.state(), AdapterState::Created);
    }

    #[test]
    fn lifecycle_advances_and_writes_batches() {
        let (_temp, root) = root();
        let mut adapter =
            Fixed::new(&root, vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);
        adapter.pull_data().unwrap();
        assert_eq!(adapter.state(), AdapterState::DataPulled);

        let nodes = adapter.iterate_nodes(true).unwrap();
        assert_eq!(
            nodes,
            Emitted::Written {
                records: 3,
                batches: 2
            }
        );
        assert_eq!(adapter.state(), AdapterState::NodesEmitted);

        let edges = adapter.iterate_edges(false).unwrap();
        assert_eq!(edges.count(), 2);
        assert_eq!(adapter.state(), AdapterState::EdgesEmitted);
        assert_eq!(
            crate::writer::read_lines(adapter.outputs().nodes.as_std_path())
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn failed_repull_returns_to_created() {
        let (_temp, root) = root();
        let mut adapter = Fixed::new(&root, vec![Ok("a".into()), Ok("b".into())]);
        adapter.pull_data().unwrap();
        adapter.iterate_nodes(false).unwrap();
        assert_eq!(adapter.state(), AdapterState::NodesEmitted);

        adapter.fail_load = true;
        assert_matches!(adapter.pull_data(), Err(GraphError::Filesystem(_)));
        assert_eq!(adapter.state(), AdapterState::Created);
        assert_matches!(
            adapter.iterate_edges(false),
            Err(GraphError::PrecursorNotReady { .. })
        );
    }

    #[test]
    fn skips_are_counted_and_reset_on_pull() {
        let (_temp, root) = root();
        let mut adapter = Fixed::new(
            &root,
            vec![Ok("a".into()), Err(GraphError::InvalidBatchSize)],
        );
        adapter.pull_data().unwrap();
        adapter.pull_data().unwrap();
        let report = adapter.skip_report();
        assert_eq!(report.total, 1);
        assert_eq!(report.by_reason["missing_identifier"], 1);
    }

    #[test]
    fn all_records_skipped_is_an_empty_result() {
        let (_temp, root) = root();
        let mut adapter = Fixed::new(&root, vec![Err(GraphError::InvalidBatchSize)]);
        assert_matches!(
            adapter.pull_data(),
            Err(GraphError::EmptyResult { skipped: 1, .. })
        );
        assert_eq!(adapter.state(), AdapterState::Created);
    }
}
