//! ChIP-seq peak calls in ENCODE narrowPeak (BED6+4) format.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::adapter::{Adapter, Batches, Lifecycle, SkipCounter};
use crate::adapters::{chunked, csv_error, open_input, source_name, source_stem, tsv_reader};
use crate::domain::TaxonId;
use crate::error::GraphError;
use crate::ident;
use crate::object::{ObjectKind, ObjectRecord};
use crate::record::{GraphEdge, GraphNode};
use crate::schema::{DatapackInfo, SchemaDescription};
use crate::store::OutputPaths;

pub const DEFAULT_MODIFICATION_TYPE: &str = "PTM";

#[derive(Debug, Clone)]
pub struct ChipSeqOptions {
    pub name: String,
    /// Target protein the antibody binds, as a protein node id.
    pub protein_id: String,
    pub modification_type: String,
    pub sample_id: String,
    pub bed: PathBuf,
    pub taxon: TaxonId,
}

/// One narrowPeak row. Coordinates are BED: 0-based, end exclusive.
#[derive(Debug, Clone, PartialEq)]
struct NarrowPeak {
    id: String,
    name: String,
    chr: String,
    start: u64,
    end: u64,
    score: i64,
    strand: String,
    signal_value: f64,
    p_value: f64,
    q_value: f64,
    peak: i64,
}

#[derive(Debug)]
struct Loaded {
    assay_id: String,
    sample_id: String,
    protein_id: String,
    peaks: Vec<NarrowPeak>,
}

pub struct ChipSeqAdapter {
    options: ChipSeqOptions,
    info: DatapackInfo,
    lifecycle: Lifecycle,
    loaded: Option<Loaded>,
}

impl ChipSeqAdapter {
    pub fn new(options: ChipSeqOptions, outputs: OutputPaths) -> Self {
        let info = datapack_info(&options.name);
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

    fn loaded(&self) -> Result<&Loaded, GraphError> {
        self.loaded.as_ref().ok_or_else(|| GraphError::PrecursorNotReady {
            adapter: self.info.key.clone(),
            state: self.lifecycle.state().to_string(),
        })
    }

    fn peak_edges(&self, assay_id: &str, peak: &NarrowPeak) -> Result<Vec<GraphEdge>, GraphError> {
        let taxon = self.options.taxon;
        let start_tile = ident::tile_id(taxon, &peak.chr, ident::tile_index_for_position(peak.start))?;
        let end_tile = ident::tile_id(taxon, &peak.chr, ident::tile_index_for_end(peak.start, peak.end))?;
        Ok(vec![
            GraphEdge::new(assay_id, peak.id.as_str(), "has narrow peak"),
            GraphEdge::new(peak.id.as_str(), start_tile, "peak start on"),
            GraphEdge::new(peak.id.as_str(), end_tile, "peak end on"),
        ])
    }
}

impl Adapter for ChipSeqAdapter {
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
        let assay_id = ident::chipseq_id(&self.options.name)?;
        let sample_id = ident::sample_id(&self.options.sample_id)?;
        let protein_id = ident::protein_id(&self.options.protein_id)?;
        let peaks = parse_narrow_peaks(&self.options.bed, &self.info.key, self.lifecycle.skips_mut())?;
        info!(
            assay = %assay_id,
            peaks = peaks.len(),
            source = %self.options.bed.display(),
            "narrow peaks parsed"
        );
        self.loaded = Some(Loaded {
            assay_id,
            sample_id,
            protein_id,
            peaks,
        });
        Ok(())
    }

    fn record_count(&self) -> usize {
        self.loaded.as_ref().map_or(0, |loaded| loaded.peaks.len())
    }

    fn node_batches(&self) -> Result<Batches<'_, GraphNode>, GraphError> {
        let loaded = self.loaded()?;
        let taxon = self.options.taxon;
        let assay = ObjectRecord::new(
            ObjectKind::ChipSeq,
            loaded.assay_id.as_str(),
            self.options.name.as_str(),
        )
        .into_node()
        .map(|node| vec![node]);
        let peaks = chunked(&loaded.peaks, move |peak| {
            let mut record = ObjectRecord::new(ObjectKind::NarrowPeak, peak.id.as_str(), peak.name.as_str())
                // stored 1-based inclusive like every other interval
                .location(peak.chr.as_str(), peak.start + 1, peak.end)
                .organism(taxon, None)
                .strand(peak.strand.as_str());
            record.score = Some(peak.score);
            record.signal_value = Some(peak.signal_value);
            record.p_value = Some(peak.p_value);
            record.q_value = Some(peak.q_value);
            record.peak = Some(peak.peak);
            record.into_node().map(Some)
        });
        Ok(Box::new(std::iter::once(assay).chain(peaks)))
    }

    fn edge_batches(&self) -> Result<Batches<'_, GraphEdge>, GraphError> {
        let loaded = self.loaded()?;
        let assay_id = loaded.assay_id.as_str();
        let assay_edges = vec![
            GraphEdge::new(assay_id, loaded.protein_id.as_str(), "assay target on")
                .with_property("modification_type", self.options.modification_type.as_str()),
            GraphEdge::new(loaded.sample_id.as_str(), assay_id, "has chipseq"),
        ];
        let peak_edges = loaded
            .peaks
            .chunks(super::RECORD_BATCH)
            .map(move |chunk| {
                let mut batch = Vec::with_capacity(chunk.len() * 3);
                for peak in chunk {
                    batch.extend(self.peak_edges(assay_id, peak)?);
                }
                Ok::<_, GraphError>(batch)
            });
        Ok(Box::new(std::iter::once(Ok(assay_edges)).chain(peak_edges)))
    }

    fn describe_schema(&self) -> SchemaDescription {
        schema(&self.info)
    }
}

pub fn datapack_info(name: &str) -> DatapackInfo {
    DatapackInfo::new(
        format!("ChIP-seq Datapack - {name}"),
        format!("chipseq_{name}"),
        "ChIP-seq assay with its narrowPeak calls placed on 1 kb genomic intervals",
    )
}

pub fn schema(info: &DatapackInfo) -> SchemaDescription {
    SchemaDescription::new(info)
        .concept("ChIP-seq", "ChIPseq", "A chromatin immunoprecipitation sequencing assay")
        .concept("Narrow Peak", "NarrowPeak", "An enriched region called from a ChIP-seq assay")
        .relationship("has narrow peak", "ChIPseq", "NarrowPeak")
        .relationship("peak start on", "NarrowPeak", "GenomicInterval")
        .relationship("peak end on", "NarrowPeak", "GenomicInterval")
        .relationship("assay target on", "ChIPseq", "Protein")
        .relationship("has chipseq", "Sample", "ChIPseq")
}

fn parse_narrow_peaks(
    path: &Path,
    adapter: &str,
    skips: &mut SkipCounter,
) -> Result<Vec<NarrowPeak>, GraphError> {
    let stem = source_stem(path);
    let mut reader = tsv_reader(open_input(path)?, false);
    let mut seen = HashSet::new();
    let mut peaks = Vec::new();

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => return Err(GraphError::Filesystem(err.to_string())),
            Err(err) => {
                skips.record(adapter, &csv_error(path, err));
                continue;
            }
        };
        if row.get(0).is_some_and(|first| first.starts_with("track") || first.starts_with("browser")) {
            continue;
        }
        let line = row.position().map(|pos| pos.line()).unwrap_or(0);
        let peak = match parse_row(&row, &stem) {
            Ok(peak) => peak,
            Err(PeakError::Malformed(reason)) => {
                skips.record(
                    adapter,
                    &GraphError::MalformedRecord {
                        source_name: source_name(path),
                        line,
                        reason,
                    },
                );
                continue;
            }
            Err(PeakError::Graph(err)) => {
                skips.record(adapter, &err);
                continue;
            }
        };
        if !seen.insert(peak.id.clone()) {
            skips.record(adapter, &GraphError::DuplicateIdentifier(peak.id));
            continue;
        }
        peaks.push(peak);
    }
    Ok(peaks)
}

enum PeakError {
    Malformed(String),
    Graph(GraphError),
}

fn parse_row(row: &csv::StringRecord, stem: &str) -> Result<NarrowPeak, PeakError> {
    if row.len() < 10 {
        return Err(PeakError::Malformed(format!(
            "expected 10 columns, found {}",
            row.len()
        )));
    }
    fn field<T: std::str::FromStr>(row: &csv::StringRecord, index: usize, name: &str) -> Result<T, PeakError> {
        row[index]
            .trim()
            .parse()
            .map_err(|_| PeakError::Malformed(format!("invalid {name}: {}", &row[index])))
    }
    let start: u64 = field(row, 1, "chromStart")?;
    let end: u64 = field(row, 2, "chromEnd")?;
    if end <= start {
        return Err(PeakError::Malformed(format!("empty peak {start}-{end}")));
    }
    let chr = ident::normalize_chromosome(&row[0]);
    if chr.is_empty() {
        return Err(PeakError::Graph(GraphError::MissingIdentifierField {
            kind: "narrow peak",
            field: "chromosome",
        }));
    }
    let name = row[3].trim();
    let id = ident::narrow_peak_id(stem, name).map_err(PeakError::Graph)?;
    Ok(NarrowPeak {
        id,
        name: name.to_string(),
        chr: chr.to_string(),
        start,
        end,
        score: field(row, 4, "score")?,
        strand: row[5].trim().to_string(),
        signal_value: field(row, 6, "signalValue")?,
        p_value: field(row, 7, "pValue")?,
        q_value: field(row, 8, "qValue")?,
        peak: field(row, 9, "peak")?,
    })
}
