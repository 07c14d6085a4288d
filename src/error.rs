use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("missing identifier field `{field}` for {kind}")]
    MissingIdentifierField { kind: &'static str, field: &'static str },

    #[error("malformed record in {source_name} at line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line: u64,
        reason: String,
    },

    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("{axis} labels have length {labels} but the matrix has {matrix}")]
    #[diagnostic(help("row labels must match the cell count and column labels the feature count"))]
    LabelCardinalityMismatch {
        axis: &'static str,
        labels: usize,
        matrix: usize,
    },

    #[error("chunk rows {start}..{end} exceed matrix row count {rows}")]
    ChunkBoundsError { start: usize, end: usize, rows: usize },

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("{adapter}: edges requested in state {state}; call pull_data first")]
    PrecursorNotReady { adapter: String, state: String },

    #[error("{adapter}: source produced no usable records ({skipped} skipped)")]
    EmptyResult { adapter: String, skipped: u64 },

    #[error("graph service returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("graph service request failed: {0}")]
    UpstreamHttp(String),

    #[error("annotation lookup failed: {0}")]
    AnnotationLookup(String),

    #[error("invalid taxon id: {0}")]
    InvalidTaxon(String),

    #[error("invalid species name: {0}")]
    InvalidSpecies(String),

    #[error("invalid modality: {0}")]
    InvalidModality(String),

    #[error("invalid adapter kind: {0}")]
    InvalidAdapterKind(String),

    #[error("invalid {kind} object: {reason}")]
    InvalidObject { kind: &'static str, reason: String },

    #[error("page limit must be at least 1, got {0}")]
    InvalidLimit(usize),

    #[error("{source_name} has no column `{column}`")]
    MissingColumn { source_name: String, column: String },

    #[error("matrix format error: {0}")]
    MatrixFormat(String),

    #[error("missing config file biograph.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GraphError {
    /// Record-level errors are dropped and counted instead of aborting a run.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            GraphError::MissingIdentifierField { .. }
                | GraphError::MalformedRecord { .. }
                | GraphError::DuplicateIdentifier(_)
        )
    }
}
