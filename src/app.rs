use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::adapter::{Adapter, AdapterState, Emitted, SkipReport};
use crate::adapters::{
    ChipSeqAdapter, ChipSeqOptions, GenomeAdapter, GenomeOptions, SingleCellAdapter,
    SingleCellOptions, chipseq, genome, single_cell,
};
use crate::annotation::AnnotationClient;
use crate::config::ResolvedConfig;
use crate::error::GraphError;
use crate::record::{GraphEdge, GraphNode, GraphRecord};
use crate::service::{self, AttachRequest, CreateObjectRequest, GraphService, RelatedObject};
use crate::store::OutputStore;
use crate::writer::read_records;

/// Objects per create request when pushing to the graph service.
pub const PUSH_BATCH: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub adapter: String,
    pub state: AdapterState,
    pub nodes_written: u64,
    pub edges_written: u64,
    pub node_batches: u64,
    pub edge_batches: u64,
    pub skipped: SkipReport,
    pub node_path: String,
    pub edge_path: String,
    pub schema_path: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub output_dir: String,
    pub runs: Vec<RunReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub adapter: String,
    pub objects_created: u64,
    pub edges_attached: u64,
    /// Node labels the service has no concept for; their nodes are not sent.
    pub unknown_concepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedResult {
    pub object: String,
    pub relationship: String,
    pub count: usize,
    pub related: Vec<RelatedObject>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn timed(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(elapsed),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct App {
    store: OutputStore,
}

impl App {
    pub fn new(store: OutputStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn genome_adapter<C: AnnotationClient>(&self, client: C, options: GenomeOptions) -> GenomeAdapter<C> {
        let outputs = self.store.outputs(&genome::datapack_info(&options.species).key);
        GenomeAdapter::new(client, options, outputs)
    }

    pub fn chipseq_adapter(&self, options: ChipSeqOptions) -> ChipSeqAdapter {
        let outputs = self.store.outputs(&chipseq::datapack_info(&options.name).key);
        ChipSeqAdapter::new(options, outputs)
    }

    pub fn single_cell_adapter(&self, options: SingleCellOptions) -> SingleCellAdapter {
        let outputs = self.store.outputs(&single_cell::datapack_info(options.modality).key);
        SingleCellAdapter::new(options, outputs)
    }

    /// Drives one adapter through pull, nodes and edges, streaming both to
    /// disk, then writes its schema description. A failure leaves whatever
    /// was already written in place.
    pub fn run(&self, adapter: &mut dyn Adapter, sink: &dyn ProgressSink) -> Result<RunReport, GraphError> {
        let started = Instant::now();
        let name = adapter.name().to_string();
        OutputStore::clear_outputs(adapter.outputs())?;

        sink.event(ProgressEvent::new(format!("phase=Pull; adapter={name}")));
        adapter.pull_data()?;

        sink.event(ProgressEvent::timed(
            format!("phase=Nodes; adapter={name}"),
            started.elapsed(),
        ));
        let (nodes_written, node_batches) = written(&adapter.iterate_nodes(true)?);

        sink.event(ProgressEvent::timed(
            format!("phase=Edges; adapter={name}"),
            started.elapsed(),
        ));
        let (edges_written, edge_batches) = written(&adapter.iterate_edges(true)?);

        let schema_path = self.store.schema_path(&name);
        OutputStore::write_schema(&schema_path, &adapter.describe_schema())?;

        let skipped = adapter.skip_report();
        info!(
            adapter = %name,
            nodes = nodes_written,
            edges = edges_written,
            skipped = skipped.total,
            "adapter finished"
        );
        sink.event(ProgressEvent::timed(
            format!("phase=Done; adapter={name}; nodes={nodes_written}; edges={edges_written}"),
            started.elapsed(),
        ));

        Ok(RunReport {
            adapter: name,
            state: adapter.state(),
            nodes_written,
            edges_written,
            node_batches,
            edge_batches,
            skipped,
            node_path: adapter.outputs().nodes.to_string(),
            edge_path: adapter.outputs().edges.to_string(),
            schema_path: schema_path.to_string(),
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    /// Runs every adapter of a config file in order: genomes, ChIP-seq,
    /// single-cell. Stops at the first fatal error.
    pub fn run_config<C: AnnotationClient + Clone>(
        &self,
        config: &ResolvedConfig,
        client: C,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, GraphError> {
        let mut runs = Vec::with_capacity(config.adapter_count());
        for options in &config.genomes {
            let mut adapter = self.genome_adapter(client.clone(), options.clone());
            runs.push(self.run(&mut adapter, sink)?);
        }
        for options in &config.chipseq {
            let mut adapter = self.chipseq_adapter(options.clone());
            runs.push(self.run(&mut adapter, sink)?);
        }
        for options in &config.single_cell {
            let mut adapter = self.single_cell_adapter(options.clone());
            runs.push(self.run(&mut adapter, sink)?);
        }
        Ok(RunSummary {
            output_dir: self.store.root().to_string(),
            runs,
        })
    }

    /// Uploads the streams of a finished adapter run: objects grouped by
    /// their primary label, then one attach call per edge.
    pub fn push<S: GraphService + ?Sized>(
        &self,
        service: &S,
        key: &str,
        sink: &dyn ProgressSink,
    ) -> Result<PushReport, GraphError> {
        let outputs = self.store.outputs(key);
        let mut by_label: BTreeMap<String, Vec<GraphNode>> = BTreeMap::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        if !outputs.nodes.as_std_path().exists() {
            return Err(GraphError::Filesystem(format!("no node stream at {}", outputs.nodes)));
        }
        for record in read_records(outputs.nodes.as_std_path())? {
            if let GraphRecord::Node(node) = record {
                let label = node.labels.first().cloned().unwrap_or_default();
                by_label.entry(label).or_default().push(node);
            }
        }
        // an adapter run may legitimately produce no edges
        if outputs.edges.as_std_path().exists() {
            for record in read_records(outputs.edges.as_std_path())? {
                if let GraphRecord::Edge(edge) = record {
                    edges.push(edge);
                }
            }
        }

        let mut report = PushReport {
            adapter: key.to_string(),
            ..PushReport::default()
        };
        for (label, nodes) in &by_label {
            let Some(concept_uri) = service.concept_uri(label)? else {
                warn!(adapter = key, label = %label, nodes = nodes.len(), "no concept for label");
                report.unknown_concepts.push(label.clone());
                continue;
            };
            sink.event(ProgressEvent::new(format!(
                "phase=Push; label={label}; objects={}",
                nodes.len()
            )));
            for chunk in nodes.chunks(PUSH_BATCH) {
                service.create_objects(&CreateObjectRequest::new(concept_uri.as_str(), chunk))?;
                report.objects_created += chunk.len() as u64;
            }
        }

        sink.event(ProgressEvent::new(format!("phase=Attach; edges={}", edges.len())));
        for edge in &edges {
            service.attach(&AttachRequest::from(edge))?;
            report.edges_attached += 1;
        }
        info!(
            adapter = key,
            objects = report.objects_created,
            edges = report.edges_attached,
            "push finished"
        );
        Ok(report)
    }

    /// All objects related to `object_id` through `relationship`, fetched
    /// with up to `max_workers` concurrent page requests.
    pub fn related<S: GraphService + ?Sized>(
        &self,
        service: &S,
        object_id: &str,
        relationship: &str,
        limit: usize,
        max_workers: usize,
    ) -> Result<RelatedResult, GraphError> {
        let object = service.get_object(object_id)?.ok_or_else(|| GraphError::UpstreamStatus {
            status: 404,
            message: format!("object {object_id} not found"),
        })?;
        let descriptor = service::descriptors(&object)?
            .into_iter()
            .find(|descriptor| descriptor.label == relationship)
            .ok_or_else(|| GraphError::InvalidObject {
                kind: "relationship",
                reason: format!("{object_id} has no `{relationship}` relationship"),
            })?;
        let related = service::scrape(service, &descriptor, limit, max_workers)?;
        Ok(RelatedResult {
            object: object_id.to_string(),
            relationship: relationship.to_string(),
            count: related.len(),
            related,
        })
    }
}

fn written<T>(emitted: &Emitted<T>) -> (u64, u64) {
    match emitted {
        Emitted::Written { records, batches } => (*records, *batches),
        Emitted::Collected(records) => (records.len() as u64, 0),
    }
}

/// Sink for callers that do not report progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}
