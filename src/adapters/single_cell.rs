//! Single-cell RNA-seq and ATAC-seq experiments in 10x layout: a Matrix
//! Market count matrix (features x cells), a features table and a cell
//! metadata table whose rows follow the matrix columns.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;

use crate::adapter::{Adapter, Batches, Lifecycle, SkipCounter};
use crate::adapters::{chunked, csv_error, open_input, source_name, tsv_reader};
use crate::domain::{Modality, TaxonId};
use crate::emitter::{BatchedEdgeEmitter, DEFAULT_BATCH_SIZE};
use crate::error::GraphError;
use crate::ident;
use crate::matrix::{SparseMatrix, read_matrix_market};
use crate::record::{GraphEdge, GraphNode, Properties};
use crate::schema::{DatapackInfo, SchemaDescription};
use crate::store::OutputPaths;

static ATAC_FEATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)[:\-](\d+)-(\d+)$").unwrap());

#[derive(Debug, Clone)]
pub struct SingleCellOptions {
    pub modality: Modality,
    pub matrix: PathBuf,
    pub features: PathBuf,
    pub cells: PathBuf,
    pub barcode_column: String,
    pub library_column: String,
    pub sample_column: Option<String>,
    pub cell_type_column: Option<String>,
    /// Extra cell-table columns copied onto experiment nodes.
    pub experiment_columns: Vec<String>,
    /// Extra cell-table columns copied onto sample nodes.
    pub sample_columns: Vec<String>,
    /// Needed for ATAC, whose peaks are placed on genomic intervals.
    pub taxon: Option<TaxonId>,
    pub batch_size: usize,
}

impl SingleCellOptions {
    pub fn new(modality: Modality, matrix: PathBuf, features: PathBuf, cells: PathBuf) -> Self {
        Self {
            modality,
            matrix,
            features,
            cells,
            barcode_column: "barcode".to_string(),
            library_column: "library_uuid".to_string(),
            sample_column: None,
            cell_type_column: None,
            experiment_columns: Vec::new(),
            sample_columns: Vec::new(),
            taxon: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    id: String,
    experiment: String,
    cell_type: Option<String>,
}

/// Experiment or sample node, taken from the first cell row that names it.
#[derive(Debug, Clone, PartialEq)]
struct Group {
    id: String,
    properties: Properties,
    parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct AtacPeak {
    id: String,
    chr: String,
    start: u64,
    end: u64,
}

#[derive(Debug, Default)]
struct CellTable {
    cells: Vec<Cell>,
    /// One entry per matrix row; `None` for rows dropped while parsing.
    row_labels: Vec<Option<String>>,
    experiments: Vec<Group>,
    samples: Vec<Group>,
}

#[derive(Debug)]
struct Loaded {
    table: CellTable,
    feature_ids: Vec<String>,
    peaks: Vec<AtacPeak>,
    taxon: Option<TaxonId>,
    matrix: SparseMatrix,
    emitter: BatchedEdgeEmitter,
}

pub struct SingleCellAdapter {
    options: SingleCellOptions,
    info: DatapackInfo,
    lifecycle: Lifecycle,
    loaded: Option<Loaded>,
}

impl SingleCellAdapter {
    pub fn new(options: SingleCellOptions, outputs: OutputPaths) -> Self {
        let info = datapack_info(options.modality);
        Self {
            options,
            info,
            lifecycle: Lifecycle::new(outputs),
            loaded: None,
        }
    }

    pub fn with_info(mut self, info: DatapackInfo) -> Self {
        self.info = info;
        self
    }

    pub fn matrix_shape(&self) -> Option<(usize, usize)> {
        self.loaded.as_ref().map(|loaded| loaded.matrix.shape())
    }

    fn loaded(&self) -> Result<&Loaded, GraphError> {
        self.loaded.as_ref().ok_or_else(|| GraphError::PrecursorNotReady {
            adapter: self.info.key.clone(),
            state: self.lifecycle.state().to_string(),
        })
    }
}

impl Adapter for SingleCellAdapter {
    fn name(&self) -> &str {
        &self.info.key
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn load(&mut self) -> Result<(), GraphError> {
        let modality = self.options.modality;
        let emitter = BatchedEdgeEmitter::new(modality.feature_edge_label(), modality.value_property())
            .with_batch_size(self.options.batch_size)?;
        let taxon = match (modality, self.options.taxon) {
            (Modality::Atac, None) => {
                return Err(GraphError::InvalidTaxon(
                    "ATAC peaks need a taxon to be placed on genomic intervals".to_string(),
                ));
            }
            (_, taxon) => taxon,
        };

        let (feature_ids, peaks) = read_features(&self.options.features, modality, taxon)?;
        let table = read_cells(&self.options, &self.info.key, self.lifecycle.skips_mut())?;
        let matrix = read_matrix_market(open_input(&self.options.matrix)?, true)?;
        if matrix.rows() != table.row_labels.len() {
            return Err(GraphError::LabelCardinalityMismatch {
                axis: "row",
                labels: table.row_labels.len(),
                matrix: matrix.rows(),
            });
        }
        if matrix.cols() != feature_ids.len() {
            return Err(GraphError::LabelCardinalityMismatch {
                axis: "column",
                labels: feature_ids.len(),
                matrix: matrix.cols(),
            });
        }
        info!(
            modality = %modality,
            cells = table.cells.len(),
            features = feature_ids.len(),
            nnz = matrix.nnz(),
            experiments = table.experiments.len(),
            "single-cell data loaded"
        );

        self.loaded = Some(Loaded {
            table,
            feature_ids,
            peaks,
            taxon,
            matrix,
            emitter,
        });
        Ok(())
    }

    fn record_count(&self) -> usize {
        self.loaded.as_ref().map_or(0, |loaded| loaded.table.cells.len())
    }

    fn node_batches(&self) -> Result<Batches<'_, GraphNode>, GraphError> {
        let loaded = self.loaded()?;
        let modality = self.options.modality;
        let mut parts: Vec<Batches<'_, GraphNode>> = Vec::new();

        parts.push(chunked(&loaded.table.cells, |cell| {
            Ok(Some(
                GraphNode::new(cell.id.as_str(), "CellBarcode").with_property("displayName", cell.id.as_str()),
            ))
        }));
        let experiments = loaded
            .table
            .experiments
            .iter()
            .map(|group| {
                GraphNode::new(group.id.as_str(), "Experiment")
                    .with_label("SingleCellExperiment")
                    .with_label(modality.experiment_label())
                    .with_properties(group.properties.clone())
            })
            .collect::<Vec<_>>();
        parts.push(Box::new(std::iter::once(Ok::<_, GraphError>(experiments))));
        if !loaded.table.samples.is_empty() {
            let samples = loaded
                .table
                .samples
                .iter()
                .map(|group| {
                    GraphNode::new(group.id.as_str(), "Sample").with_properties(group.properties.clone())
                })
                .collect::<Vec<_>>();
            parts.push(Box::new(std::iter::once(Ok::<_, GraphError>(samples))));
        }
        if let Some(taxon) = loaded.taxon.filter(|_| modality == Modality::Atac) {
            parts.push(chunked(&loaded.peaks, move |peak| {
                Ok(Some(
                    GraphNode::new(peak.id.as_str(), "Peak")
                        .with_property("displayName", peak.id.as_str())
                        .with_property("chr", peak.chr.as_str())
                        .with_property("start", peak.start + 1)
                        .with_property("end", peak.end)
                        .with_property("taxon", taxon.value()),
                ))
            }));
        }
        Ok(Box::new(parts.into_iter().flatten()))
    }

    fn edge_batches(&self) -> Result<Batches<'_, GraphEdge>, GraphError> {
        let loaded = self.loaded()?;
        let mut parts: Vec<Batches<'_, GraphEdge>> = Vec::new();

        parts.push(chunked(&loaded.table.cells, |cell| {
            Ok(Some(GraphEdge::new(
                cell.experiment.as_str(),
                cell.id.as_str(),
                "contains cell",
            )))
        }));
        let has_experiment = loaded
            .table
            .experiments
            .iter()
            .filter_map(|group| {
                group
                    .parent
                    .as_ref()
                    .map(|sample| GraphEdge::new(sample.as_str(), group.id.as_str(), "has experiment"))
            })
            .collect::<Vec<_>>();
        parts.push(Box::new(std::iter::once(Ok::<_, GraphError>(has_experiment))));
        if self.options.cell_type_column.is_some() {
            parts.push(chunked(&loaded.table.cells, |cell| {
                Ok(cell
                    .cell_type
                    .as_ref()
                    .map(|cell_type| GraphEdge::new(cell.id.as_str(), cell_type.as_str(), "has cell type")))
            }));
        }
        let matrix_edges = loaded
            .emitter
            .chunks(&loaded.matrix, &loaded.table.row_labels, &loaded.feature_ids)?;
        parts.push(Box::new(matrix_edges));
        if let Some(taxon) = loaded.taxon.filter(|_| self.options.modality == Modality::Atac) {
            parts.push(Box::new(loaded.peaks.chunks(super::RECORD_BATCH).map(move |chunk| {
                let mut batch = Vec::with_capacity(chunk.len() * 2);
                for peak in chunk {
                    batch.extend(peak_tile_edges(taxon, peak)?);
                }
                Ok::<_, GraphError>(batch)
            })));
        }
        Ok(Box::new(parts.into_iter().flatten()))
    }

    fn describe_schema(&self) -> SchemaDescription {
        schema(&self.info, self.options.modality)
    }
}

pub fn datapack_info(modality: Modality) -> DatapackInfo {
    let (name, key) = match modality {
        Modality::Rna => ("SingleCellRNASeq", "scrna"),
        Modality::Atac => ("SingleCellATACSeq", "scatac"),
    };
    let info = DatapackInfo::new("", key, format!("{name} Datapack created through biograph"));
    let display = format!("{name} Datapack - {}", info.date_updated);
    DatapackInfo { name: display, ..info }
}

pub fn schema(info: &DatapackInfo, modality: Modality) -> SchemaDescription {
    let experiment = modality.experiment_label();
    let schema = SchemaDescription::new(info)
        .depends_on("Ensembl")
        .concept("Experiment", "Experiment", "Experiment of the sample tissue")
        .sub_concept(
            "SingleCellExperiment",
            "Experiment",
            "Single Cell Experiment of the sample tissue",
        )
        .concept(
            "Sample",
            "Sample",
            "Sample organism from which tissue was taken to be analyzed",
        )
        .relationship("contains cell", "SingleCellExperiment", "CellBarcode")
        .relationship("has experiment", "Sample", "Experiment")
        .relationship("has cell type", "CellBarcode", "CellType");
    match modality {
        Modality::Rna => schema
            .sub_concept(
                experiment,
                "SingleCellExperiment",
                "Single Cell RNAseq Experiment of the sample tissue",
            )
            .concept(
                "Cell Barcode",
                "CellBarcode",
                "Individual cell from scRNA experiment, identified by barcode",
            )
            .relationship("expresses", "CellBarcode", "Gene"),
        Modality::Atac => schema
            .sub_concept(
                experiment,
                "SingleCellExperiment",
                "Single Cell ATACseq Experiment of the sample tissue",
            )
            .concept(
                "Cell Barcode",
                "CellBarcode",
                "Individual cell from scATAC experiment, identified by barcode",
            )
            .concept("Peak", "Peak", "Accessible chromatin region called across cells")
            .relationship("has peak", "CellBarcode", "Peak")
            .relationship("peak start on", "Peak", "GenomicInterval")
            .relationship("peak end on", "Peak", "GenomicInterval"),
    }
}

fn peak_tile_edges(taxon: TaxonId, peak: &AtacPeak) -> Result<Vec<GraphEdge>, GraphError> {
    let start_tile = ident::tile_id(taxon, &peak.chr, ident::tile_index_for_position(peak.start))?;
    let end_tile = ident::tile_id(taxon, &peak.chr, ident::tile_index_for_end(peak.start, peak.end))?;
    Ok(vec![
        GraphEdge::new(peak.id.as_str(), start_tile, "peak start on"),
        GraphEdge::new(peak.id.as_str(), end_tile, "peak end on"),
    ])
}

/// Feature ids in matrix column order. A feature without a usable id would
/// shift every later column, so it fails the load instead of being skipped.
fn read_features(
    path: &Path,
    modality: Modality,
    taxon: Option<TaxonId>,
) -> Result<(Vec<String>, Vec<AtacPeak>), GraphError> {
    let mut reader = tsv_reader(open_input(path)?, false);
    let mut ids = Vec::new();
    let mut peaks = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|err| csv_error(path, err))?;
        let raw = row.get(0).unwrap_or_default().trim();
        let invalid = |reason: &str| {
            GraphError::MatrixFormat(format!(
                "{} feature {}: {reason}",
                source_name(path),
                index + 1
            ))
        };
        match (modality, taxon) {
            (Modality::Atac, Some(taxon)) => {
                let caps = ATAC_FEATURE
                    .captures(raw)
                    .ok_or_else(|| invalid(&format!("`{raw}` is not a chr:start-end peak")))?;
                let chr = ident::normalize_chromosome(&caps[1]).to_string();
                let (start, end) = match (caps[2].parse::<u64>(), caps[3].parse::<u64>()) {
                    (Ok(start), Ok(end)) if start < end => (start, end),
                    _ => return Err(invalid(&format!("`{raw}` has invalid coordinates"))),
                };
                let id = ident::atac_peak_id(taxon, &chr, start, end)
                    .map_err(|err| invalid(&err.to_string()))?;
                ids.push(id.clone());
                peaks.push(AtacPeak { id, chr, start, end });
            }
            _ => {
                let id = ident::gene_id(raw).map_err(|err| invalid(&err.to_string()))?;
                ids.push(id);
            }
        }
    }
    Ok((ids, peaks))
}

struct Columns {
    barcode: usize,
    library: usize,
    sample: Option<usize>,
    cell_type: Option<usize>,
    experiment_extra: Vec<(String, usize)>,
    sample_extra: Vec<(String, usize)>,
}

fn read_cells(
    options: &SingleCellOptions,
    adapter: &str,
    skips: &mut SkipCounter,
) -> Result<CellTable, GraphError> {
    let path = options.cells.as_path();
    let mut reader = tsv_reader(open_input(path)?, true);
    let headers = reader.headers().map_err(|err| csv_error(path, err))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| GraphError::MissingColumn {
                source_name: source_name(path),
                column: name.to_string(),
            })
    };
    let extra = |names: &[String]| {
        names
            .iter()
            .map(|name| column(name).map(|index| (name.clone(), index)))
            .collect::<Result<Vec<_>, _>>()
    };
    let columns = Columns {
        barcode: column(&options.barcode_column)?,
        library: column(&options.library_column)?,
        sample: options.sample_column.as_deref().map(|name| column(name)).transpose()?,
        cell_type: options.cell_type_column.as_deref().map(|name| column(name)).transpose()?,
        experiment_extra: extra(&options.experiment_columns)?,
        sample_extra: extra(&options.sample_columns)?,
    };

    let mut table = CellTable::default();
    let mut seen_cells = HashSet::new();
    let mut seen_experiments = HashSet::new();
    let mut seen_samples = HashSet::new();

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => return Err(GraphError::Filesystem(err.to_string())),
            Err(err) => {
                // the row still occupies a matrix row
                skips.record(adapter, &csv_error(path, err));
                table.row_labels.push(None);
                continue;
            }
        };
        let field = |index: usize| row.get(index).map(str::trim).unwrap_or_default();
        let parsed = ident::cell_id(field(columns.library), field(columns.barcode))
            .and_then(|id| Ok((id, ident::experiment_id(field(columns.library))?)));
        let (id, experiment) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                skips.record(adapter, &err);
                table.row_labels.push(None);
                continue;
            }
        };
        if !seen_cells.insert(id.clone()) {
            skips.record(adapter, &GraphError::DuplicateIdentifier(id));
            table.row_labels.push(None);
            continue;
        }
        // a blank sample drops the sample link only, the cell stays
        let sample = columns.sample.and_then(|index| match ident::sample_id(field(index)) {
            Ok(sample) => Some(sample),
            Err(err) => {
                skips.record(adapter, &err);
                None
            }
        });

        if seen_experiments.insert(experiment.clone()) {
            let mut properties = group_properties(&columns.experiment_extra, &field);
            properties.insert("displayName".to_string(), Value::String(experiment.clone()));
            table.experiments.push(Group {
                id: experiment.clone(),
                properties,
                parent: sample.clone(),
            });
        }
        if let Some(sample) = &sample {
            if seen_samples.insert(sample.clone()) {
                let mut properties = group_properties(&columns.sample_extra, &field);
                properties.insert("displayName".to_string(), Value::String(sample.clone()));
                table.samples.push(Group {
                    id: sample.clone(),
                    properties,
                    parent: None,
                });
            }
        }
        let cell_type = columns
            .cell_type
            .map(field)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        table.row_labels.push(Some(id.clone()));
        table.cells.push(Cell {
            id,
            experiment,
            cell_type,
        });
    }
    Ok(table)
}

fn group_properties<'r>(columns: &[(String, usize)], field: &impl Fn(usize) -> &'r str) -> Properties {
    columns
        .iter()
        .map(|(name, index)| (name.clone(), Value::String(field(*index).to_string())))
        .collect()
}
