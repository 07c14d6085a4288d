//! Deterministic identifiers for every entity kind the adapters emit.
//!
//! Ids are built only from source fields, so two adapters that see the same
//! chromosome, cell or gene produce byte-identical ids and their streams can
//! be merged without a lookup table. Each kind has its own shape:
//!
//! | kind            | shape                               |
//! |-----------------|-------------------------------------|
//! | genomic tile    | `{taxon}:{chr}:{start}-{end}`       |
//! | cell            | `{library}:{barcode}`               |
//! | genome          | `genome_{assembly}`                 |
//! | ChIP-seq assay  | `chipseq:{name}`                    |
//! | narrow peak     | `{source}-{peak}`                   |
//! | ATAC peak       | `peak:{taxon}:{chr}:{start}-{end}`  |
//! | gene/transcript | bare external accession             |

use crate::domain::TaxonId;
use crate::error::GraphError;

/// Width of one genomic interval tile in base pairs.
pub const TILE_WIDTH: u64 = 1000;

fn required<'a>(
    value: &'a str,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, GraphError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GraphError::MissingIdentifierField { kind, field });
    }
    Ok(trimmed)
}

pub fn interval_id(taxon: TaxonId, chr: &str, start: u64, end: u64) -> Result<String, GraphError> {
    let chr = required(chr, "genomic interval", "chromosome")?;
    Ok(format!("{taxon}:{chr}:{start}-{end}"))
}

/// Number of tiles covering a chromosome of `length` bp.
pub fn tile_count(length: u64) -> u64 {
    length.div_ceil(TILE_WIDTH)
}

/// 1-based inclusive `(start, end)` of tile `index`, with `end` truncated to
/// the chromosome length. Only the `end` property uses this truncated value.
pub fn tile_bounds(index: u64, length: u64) -> (u64, u64) {
    let start = index * TILE_WIDTH + 1;
    let end = ((index + 1) * TILE_WIDTH).min(length);
    (start, end)
}

/// Id of tile `index`; always on the fixed `(index + 1) * 1000` boundary.
pub fn tile_id(taxon: TaxonId, chr: &str, index: u64) -> Result<String, GraphError> {
    interval_id(taxon, chr, index * TILE_WIDTH + 1, (index + 1) * TILE_WIDTH)
}

/// Tile containing a 0-based position (BED coordinates).
pub fn tile_index_for_position(position: u64) -> u64 {
    position / TILE_WIDTH
}

/// Tile containing the last base of a half-open 0-based range `[start, end)`.
pub fn tile_index_for_end(start: u64, end: u64) -> u64 {
    tile_index_for_position(end.saturating_sub(1).max(start))
}

pub fn gene_id(accession: &str) -> Result<String, GraphError> {
    required(accession, "gene", "gene_id").map(str::to_string)
}

pub fn transcript_id(accession: &str) -> Result<String, GraphError> {
    required(accession, "transcript", "transcript_id").map(str::to_string)
}

pub fn protein_id(accession: &str) -> Result<String, GraphError> {
    required(accession, "protein", "protein_id").map(str::to_string)
}

pub fn cell_id(library: &str, barcode: &str) -> Result<String, GraphError> {
    let library = required(library, "cell", "library")?;
    let barcode = required(barcode, "cell", "barcode")?;
    Ok(format!("{library}:{barcode}"))
}

pub fn sample_id(raw: &str) -> Result<String, GraphError> {
    required(raw, "sample", "sample_id").map(str::to_string)
}

pub fn experiment_id(raw: &str) -> Result<String, GraphError> {
    required(raw, "experiment", "library").map(str::to_string)
}

pub fn genome_id(assembly: &str) -> Result<String, GraphError> {
    let assembly = required(assembly, "genome", "assembly")?;
    Ok(format!("genome_{assembly}"))
}

pub fn chipseq_id(name: &str) -> Result<String, GraphError> {
    let name = required(name, "chipseq", "name")?;
    Ok(format!("chipseq:{name}"))
}

/// `{source}-{peak}`; the narrowPeak placeholder name `.` counts as missing.
pub fn narrow_peak_id(source_stem: &str, peak_name: &str) -> Result<String, GraphError> {
    let stem = required(source_stem, "narrow peak", "source")?;
    let name = required(peak_name, "narrow peak", "name")?;
    if name == "." {
        return Err(GraphError::MissingIdentifierField {
            kind: "narrow peak",
            field: "name",
        });
    }
    Ok(format!("{stem}-{name}"))
}

pub fn atac_peak_id(taxon: TaxonId, chr: &str, start: u64, end: u64) -> Result<String, GraphError> {
    let chr = required(chr, "atac peak", "chromosome")?;
    Ok(format!("peak:{taxon}:{chr}:{start}-{end}"))
}

/// Ensembl-style chromosome name: a leading `chr` is dropped.
pub fn normalize_chromosome(chr: &str) -> &str {
    let trimmed = chr.trim();
    trimmed.strip_prefix("chr").unwrap_or(trimmed)
}
