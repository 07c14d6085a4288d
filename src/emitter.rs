//! Bounded-memory conversion of a cells x features sparse matrix into edges.
//!
//! Rows are processed in fixed-size chunks. Each chunk is densified on its
//! own (`batch_size x features` values), scanned cell by cell, and turned into
//! one batch of edges that the caller flushes before the next chunk is built.
//! Peak memory therefore depends on the batch size and the feature count,
//! never on the total number of cells.

use std::path::Path;

use tracing::debug;

use crate::error::GraphError;
use crate::matrix::SparseMatrix;
use crate::record::GraphEdge;
use crate::writer::StreamWriter;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct BatchedEdgeEmitter {
    batch_size: usize,
    label: String,
    value_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    pub chunks: usize,
    pub edges: u64,
    pub skipped_rows: u64,
}

impl BatchedEdgeEmitter {
    pub fn new(label: impl Into<String>, value_key: impl Into<String>) -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            label: label.into(),
            value_key: value_key.into(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, GraphError> {
        if batch_size == 0 {
            return Err(GraphError::InvalidBatchSize);
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn chunk_count(&self, rows: usize) -> usize {
        rows.div_ceil(self.batch_size)
    }

    /// Lazily yields one edge batch per row chunk. Label vectors are checked
    /// against the matrix shape before any chunk is built. A `None` row label
    /// marks a cell that was dropped upstream; its row produces no edges.
    pub fn chunks<'a>(
        &'a self,
        matrix: &'a SparseMatrix,
        row_labels: &'a [Option<String>],
        col_labels: &'a [String],
    ) -> Result<EdgeChunks<'a>, GraphError> {
        if row_labels.len() != matrix.rows() {
            return Err(GraphError::LabelCardinalityMismatch {
                axis: "row",
                labels: row_labels.len(),
                matrix: matrix.rows(),
            });
        }
        if col_labels.len() != matrix.cols() {
            return Err(GraphError::LabelCardinalityMismatch {
                axis: "column",
                labels: col_labels.len(),
                matrix: matrix.cols(),
            });
        }
        Ok(EdgeChunks {
            emitter: self,
            matrix,
            row_labels,
            col_labels,
            next_chunk: 0,
            chunk_count: self.chunk_count(matrix.rows()),
            skipped_rows: 0,
            failed: false,
        })
    }

    /// Streams every chunk to `destination`, dropping each batch after it is
    /// written.
    pub fn write_all(
        &self,
        matrix: &SparseMatrix,
        row_labels: &[Option<String>],
        col_labels: &[String],
        writer: &StreamWriter,
        destination: &Path,
    ) -> Result<EmitSummary, GraphError> {
        let mut chunks = self.chunks(matrix, row_labels, col_labels)?;
        let mut summary = EmitSummary::default();
        for batch in chunks.by_ref() {
            let batch = batch?;
            summary.edges += writer.append(&batch, destination)? as u64;
            summary.chunks += 1;
        }
        summary.skipped_rows = chunks.skipped_rows();
        Ok(summary)
    }

    fn edges_for_chunk(
        &self,
        matrix: &SparseMatrix,
        row_labels: &[Option<String>],
        col_labels: &[String],
        start: usize,
        end: usize,
        skipped_rows: &mut u64,
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let block = matrix.dense_rows(start, end)?;
        let mut edges = Vec::new();
        for offset in 0..block.rows {
            let Some(cell) = &row_labels[start + offset] else {
                *skipped_rows += 1;
                continue;
            };
            for (feature, value) in col_labels.iter().zip(block.row(offset)) {
                // exact zero means "not present"; negatives and NaN pass through
                if *value == 0.0 {
                    continue;
                }
                edges.push(
                    GraphEdge::new(cell.as_str(), feature.as_str(), self.label.as_str())
                        .with_property(self.value_key.as_str(), *value),
                );
            }
        }
        Ok(edges)
    }
}

#[derive(Debug)]
pub struct EdgeChunks<'a> {
    emitter: &'a BatchedEdgeEmitter,
    matrix: &'a SparseMatrix,
    row_labels: &'a [Option<String>],
    col_labels: &'a [String],
    next_chunk: usize,
    chunk_count: usize,
    skipped_rows: u64,
    failed: bool,
}

impl EdgeChunks<'_> {
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows
    }

    /// Row range of chunk `index`; the last chunk is truncated to the row count.
    pub fn chunk_range(&self, index: usize) -> (usize, usize) {
        let start = index * self.emitter.batch_size;
        let end = (start + self.emitter.batch_size).min(self.matrix.rows());
        (start, end)
    }
}

impl Iterator for EdgeChunks<'_> {
    type Item = Result<Vec<GraphEdge>, GraphError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_chunk >= self.chunk_count {
            return None;
        }
        let (start, end) = self.chunk_range(self.next_chunk);
        self.next_chunk += 1;
        debug!(start, end, chunk = self.next_chunk, of = self.chunk_count, "emitting matrix chunk");
        let result = self.emitter.edges_for_chunk(
            self.matrix,
            self.row_labels,
            self.col_labels,
            start,
            end,
            &mut self.skipped_rows,
        );
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
