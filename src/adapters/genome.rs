//! Reference genome: 1 kb interval tiles per top-level region, plus genes,
//! transcripts and proteins from an Ensembl GTF annotation.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::info;

use crate::adapter::{Adapter, Batches, Lifecycle, SkipCounter};
use crate::adapters::{RECORD_BATCH, chunked, csv_error, open_input, source_name, tsv_reader};
use crate::annotation::{AnnotationClient, AssemblyInfo, TopLevelRegion};
use crate::domain::{Species, TaxonId};
use crate::error::GraphError;
use crate::ident;
use crate::object::{ObjectKind, ObjectRecord};
use crate::record::{GraphEdge, GraphNode};
use crate::schema::{DatapackInfo, SchemaDescription};
use crate::store::OutputPaths;

static GTF_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s+"([^"]*)""#).unwrap());

/// Where the assembly layout comes from.
#[derive(Debug, Clone)]
pub enum AssemblySource {
    /// Ensembl REST through the annotation client.
    Lookup,
    /// A saved Ensembl `info/assembly` JSON response.
    File(PathBuf),
    Inline(AssemblyInfo),
}

#[derive(Debug, Clone)]
pub struct GenomeOptions {
    pub species: Species,
    pub taxon: Option<TaxonId>,
    pub assembly: AssemblySource,
    pub gtf: Option<PathBuf>,
    pub primary_assembly_only: bool,
}

impl GenomeOptions {
    pub fn new(species: Species) -> Self {
        Self {
            species,
            taxon: None,
            assembly: AssemblySource::Lookup,
            gtf: None,
            primary_assembly_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Feature {
    id: String,
    name: String,
    chr: String,
    start: u64,
    end: u64,
    strand: String,
    parent: Option<String>,
}

#[derive(Debug, Default)]
struct Annotation {
    genes: Vec<Feature>,
    transcripts: Vec<Feature>,
    proteins: Vec<Feature>,
}

#[derive(Debug)]
struct Loaded {
    taxon: TaxonId,
    assembly_name: String,
    genome_id: String,
    regions: Vec<TopLevelRegion>,
    annotation: Annotation,
}

pub struct GenomeAdapter<C: AnnotationClient> {
    client: C,
    options: GenomeOptions,
    info: DatapackInfo,
    lifecycle: Lifecycle,
    created_at: DateTime<Utc>,
    loaded: Option<Loaded>,
}

impl<C: AnnotationClient> GenomeAdapter<C> {
    pub fn new(client: C, options: GenomeOptions, outputs: OutputPaths) -> Self {
        let info = datapack_info(&options.species);
        Self {
            client,
            options,
            info,
            lifecycle: Lifecycle::new(outputs),
            created_at: Utc::now(),
            loaded: None,
        }
    }

    pub fn with_info(mut self, info: DatapackInfo) -> Self {
        self.info = info;
        self
    }

    pub fn taxon(&self) -> Option<TaxonId> {
        self.loaded.as_ref().map(|loaded| loaded.taxon)
    }

    pub fn assembly_name(&self) -> Option<&str> {
        self.loaded.as_ref().map(|loaded| loaded.assembly_name.as_str())
    }

    fn loaded(&self) -> Result<&Loaded, GraphError> {
        self.loaded.as_ref().ok_or_else(|| GraphError::PrecursorNotReady {
            adapter: self.info.key.clone(),
            state: self.lifecycle.state().to_string(),
        })
    }

    fn resolve_assembly(&self) -> Result<AssemblyInfo, GraphError> {
        match &self.options.assembly {
            AssemblySource::Lookup => self.client.assembly(&self.options.species),
            AssemblySource::File(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    GraphError::Filesystem(format!("read {}: {err}", path.display()))
                })?;
                AssemblyInfo::from_json(&raw)
            }
            AssemblySource::Inline(info) => Ok(info.clone()),
        }
    }

    fn genome_node(&self, loaded: &Loaded) -> Result<GraphNode, GraphError> {
        ObjectRecord::new(ObjectKind::Genome, loaded.genome_id.as_str(), loaded.assembly_name.as_str())
            .organism(loaded.taxon, Some(self.options.species.as_str()))
            .assembly(Some(loaded.assembly_name.as_str()))
            .created(self.created_at)
            .into_node()
    }

    fn tile_nodes(
        &self,
        taxon: TaxonId,
        region: &TopLevelRegion,
        tiles: Range<u64>,
    ) -> Result<Vec<GraphNode>, GraphError> {
        let species = self.options.species.as_str();
        tiles
            .map(|index| {
                let (start, end) = ident::tile_bounds(index, region.length);
                let id = ident::tile_id(taxon, &region.name, index)?;
                ObjectRecord::new(
                    ObjectKind::GenomicInterval,
                    id,
                    format!("{species} {}:{start}-{end}", region.name),
                )
                .location(region.name.as_str(), start, end)
                .organism(taxon, Some(species))
                .into_node()
            })
            .collect()
    }
}

impl<C: AnnotationClient> Adapter for GenomeAdapter<C> {
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
        let taxon = match self.options.taxon {
            Some(taxon) => taxon,
            None => self.client.taxon_id(&self.options.species)?,
        };
        let assembly = self.resolve_assembly()?;
        let genome_id = ident::genome_id(&assembly.assembly_name)?;

        let mut regions = Vec::new();
        for region in assembly.regions(self.options.primary_assembly_only) {
            if region.name.trim().is_empty() {
                self.lifecycle.skips_mut().record(
                    &self.info.key,
                    &GraphError::MissingIdentifierField {
                        kind: "genomic interval",
                        field: "chromosome",
                    },
                );
                continue;
            }
            regions.push(region.clone());
        }
        info!(
            species = %self.options.species,
            taxon = %taxon,
            assembly = %assembly.assembly_name,
            regions = regions.len(),
            "assembly resolved"
        );

        let annotation = match &self.options.gtf {
            Some(path) => parse_gtf(path, &self.info.key, self.lifecycle.skips_mut())?,
            None => Annotation::default(),
        };

        self.loaded = Some(Loaded {
            taxon,
            assembly_name: assembly.assembly_name,
            genome_id,
            regions,
            annotation,
        });
        Ok(())
    }

    fn record_count(&self) -> usize {
        self.loaded.as_ref().map_or(0, |loaded| {
            loaded.regions.len()
                + loaded.annotation.genes.len()
                + loaded.annotation.transcripts.len()
                + loaded.annotation.proteins.len()
        })
    }

    fn node_batches(&self) -> Result<Batches<'_, GraphNode>, GraphError> {
        let loaded = self.loaded()?;
        let taxon = loaded.taxon;
        let assembly = loaded.assembly_name.as_str();

        let genome = std::iter::once(self.genome_node(loaded).map(|node| vec![node]));
        let tiles = loaded.regions.iter().flat_map(move |region| {
            tile_slices(region.length).map(move |tiles| self.tile_nodes(taxon, region, tiles))
        });
        let genes = chunked(&loaded.annotation.genes, move |gene| {
            feature_node(ObjectKind::Gene, gene, taxon, assembly).map(Some)
        });
        let transcripts = chunked(&loaded.annotation.transcripts, move |transcript| {
            feature_node(ObjectKind::Transcript, transcript, taxon, assembly).map(Some)
        });
        let proteins = chunked(&loaded.annotation.proteins, move |protein| {
            ObjectRecord::new(ObjectKind::Protein, protein.id.as_str(), protein.name.as_str())
                .organism(taxon, None)
                .assembly(Some(assembly))
                .into_node()
                .map(Some)
        });

        Ok(Box::new(
            genome.chain(tiles).chain(genes).chain(transcripts).chain(proteins),
        ))
    }

    fn edge_batches(&self) -> Result<Batches<'_, GraphEdge>, GraphError> {
        let loaded = self.loaded()?;
        let taxon = loaded.taxon;
        let genome_id = loaded.genome_id.as_str();

        let tiles = loaded.regions.iter().flat_map(move |region| {
            tile_slices(region.length).map(move |tiles| tile_edges(taxon, genome_id, region, tiles))
        });
        let transcribed = chunked(&loaded.annotation.transcripts, |transcript| {
            Ok(transcript
                .parent
                .as_ref()
                .map(|gene| GraphEdge::new(gene.as_str(), transcript.id.as_str(), "transcribed to")))
        });
        let translated = chunked(&loaded.annotation.proteins, |protein| {
            Ok(protein.parent.as_ref().map(|transcript| {
                GraphEdge::new(transcript.as_str(), protein.id.as_str(), "has translation")
            }))
        });

        Ok(Box::new(tiles.chain(transcribed).chain(translated)))
    }

    fn describe_schema(&self) -> SchemaDescription {
        schema(&self.info)
    }
}

pub fn datapack_info(species: &Species) -> DatapackInfo {
    DatapackInfo::new(
        format!("Genome Datapack - {species}"),
        format!("genome_{}", species.ensembl_name()),
        format!("Reference genome of {species}: 1 kb genomic intervals, genes, transcripts and proteins"),
    )
}

pub fn schema(info: &DatapackInfo) -> SchemaDescription {
    SchemaDescription::new(info)
        .depends_on("Ensembl")
        .concept("Genome", "Genome", "A reference genome assembly of one species")
        .concept(
            "Genomic Interval",
            "GenomicInterval",
            "A 1000 bp tile of a chromosome or other top-level region",
        )
        .concept("Gene", "Gene", "A gene annotated on the reference assembly")
        .concept("Transcript", "Transcript", "A transcript of an annotated gene")
        .concept("Protein", "Protein", "A protein translated from a coding transcript")
        .relationship("next", "GenomicInterval", "GenomicInterval")
        .relationship("contains interval", "Genome", "GenomicInterval")
        .relationship("transcribed to", "Gene", "Transcript")
        .relationship("has translation", "Transcript", "Protein")
}

fn feature_node(
    kind: ObjectKind,
    feature: &Feature,
    taxon: TaxonId,
    assembly: &str,
) -> Result<GraphNode, GraphError> {
    ObjectRecord::new(kind, feature.id.as_str(), feature.name.as_str())
        .location(feature.chr.as_str(), feature.start, feature.end)
        .organism(taxon, None)
        .assembly(Some(assembly))
        .strand(feature.strand.as_str())
        .into_node()
}

/// Tile index ranges of one region, at most [`RECORD_BATCH`] tiles each.
fn tile_slices(length: u64) -> impl Iterator<Item = Range<u64>> {
    let count = ident::tile_count(length);
    let step = RECORD_BATCH as u64;
    (0..count.div_ceil(step)).map(move |slice| slice * step..((slice + 1) * step).min(count))
}

/// `contains interval` edges from the genome to each tile in `tiles`, and a
/// `next` edge from each of them to its right neighbour, if any.
fn tile_edges(
    taxon: TaxonId,
    genome_id: &str,
    region: &TopLevelRegion,
    tiles: Range<u64>,
) -> Result<Vec<GraphEdge>, GraphError> {
    let count = ident::tile_count(region.length);
    let mut edges = Vec::with_capacity((tiles.end - tiles.start) as usize * 2);
    for index in tiles {
        let id = ident::tile_id(taxon, &region.name, index)?;
        if index + 1 < count {
            let next = ident::tile_id(taxon, &region.name, index + 1)?;
            edges.push(GraphEdge::new(id.as_str(), next, "next"));
        }
        edges.push(GraphEdge::new(genome_id, id, "contains interval"));
    }
    Ok(edges)
}

fn parse_gtf(path: &Path, adapter: &str, skips: &mut SkipCounter) -> Result<Annotation, GraphError> {
    let mut reader = tsv_reader(open_input(path)?, false);
    let mut annotation = Annotation::default();
    let mut seen_genes = HashSet::new();
    let mut seen_transcripts = HashSet::new();
    let mut seen_proteins = HashSet::new();

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => {
                return Err(GraphError::Filesystem(err.to_string()));
            }
            Err(err) => {
                skips.record(adapter, &csv_error(path, err));
                continue;
            }
        };
        let line = row.position().map(|pos| pos.line()).unwrap_or(0);
        let malformed = |reason: String| GraphError::MalformedRecord {
            source_name: source_name(path),
            line,
            reason,
        };
        if row.len() < 9 {
            skips.record(adapter, &malformed(format!("expected 9 columns, found {}", row.len())));
            continue;
        }
        let feature_type = &row[2];
        if !matches!(feature_type, "gene" | "transcript" | "CDS") {
            continue;
        }
        let (start, end) = match (row[3].parse::<u64>(), row[4].parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end => (start, end),
            _ => {
                skips.record(adapter, &malformed(format!("invalid coordinates {}-{}", &row[3], &row[4])));
                continue;
            }
        };
        let attributes = GTF_ATTRIBUTE
            .captures_iter(&row[8])
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect::<Vec<_>>();
        let attribute = |key: &str| {
            attributes
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };
        let chr = ident::normalize_chromosome(&row[0]).to_string();
        let strand = row[6].to_string();

        let (slot, id) = match feature_type {
            "gene" => (Slot::Gene, ident::gene_id(attribute("gene_id").unwrap_or_default())),
            "transcript" => (
                Slot::Transcript,
                ident::transcript_id(attribute("transcript_id").unwrap_or_default()),
            ),
            _ => {
                // CDS rows without a protein id (e.g. pseudogenes) carry nothing for us
                let Some(protein) = attribute("protein_id") else {
                    continue;
                };
                (Slot::Protein, ident::protein_id(protein))
            }
        };
        let id = match id {
            Ok(id) => id,
            Err(err) => {
                skips.record(adapter, &err);
                continue;
            }
        };
        let (name, parent, features, seen) = match slot {
            Slot::Gene => (
                display_name(attribute("gene_name"), &id),
                None,
                &mut annotation.genes,
                &mut seen_genes,
            ),
            Slot::Transcript => (
                display_name(attribute("transcript_name"), &id),
                attribute("gene_id"),
                &mut annotation.transcripts,
                &mut seen_transcripts,
            ),
            Slot::Protein => {
                // one CDS row per coding exon; the first one defines the protein
                if seen_proteins.contains(&id) {
                    continue;
                }
                (
                    id.clone(),
                    attribute("transcript_id"),
                    &mut annotation.proteins,
                    &mut seen_proteins,
                )
            }
        };
        if !seen.insert(id.clone()) {
            skips.record(adapter, &GraphError::DuplicateIdentifier(id));
            continue;
        }
        features.push(Feature {
            id,
            name,
            chr,
            start,
            end,
            strand,
            parent: parent.map(str::to_string),
        });
    }

    info!(
        genes = annotation.genes.len(),
        transcripts = annotation.transcripts.len(),
        proteins = annotation.proteins.len(),
        "annotation parsed"
    );
    Ok(annotation)
}

enum Slot {
    Gene,
    Transcript,
    Protein,
}

fn display_name(name: Option<&str>, id: &str) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn gtf_features_and_skips() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("genes.gtf");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "#!genome-build GRCh38\n\
             1\tensembl\tgene\t11\t200\t.\t+\t.\tgene_id \"G1\"; gene_name \"\";\n\
             1\tensembl\ttranscript\t11\t200\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; transcript_name \"A-201\";\n\
             1\tensembl\texon\t11\t50\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";\n\
             1\tensembl\tCDS\t20\t50\t.\t+\t0\tgene_id \"G1\"; transcript_id \"T1\"; protein_id \"P1\";\n\
             1\tensembl\tCDS\t60\t90\t.\t+\t0\tgene_id \"G1\"; transcript_id \"T1\"; protein_id \"P1\";\n\
             1\tensembl\tgene\t300\t400\t.\t-\t.\tgene_id \"G1\";\n\
             1\tensembl\tgene\tx\t400\t.\t-\t.\tgene_id \"G2\";\n\
             chr2\tensembl\tgene\t5\t9\t.\t-\t.\tgene_name \"nameless\";\n"
        )
        .unwrap();
        drop(file);

        let mut skips = SkipCounter::default();
        let annotation = parse_gtf(&path, "genome", &mut skips).unwrap();
        assert_eq!(annotation.genes.len(), 1);
        assert_eq!(annotation.genes[0].name, "G1");
        assert_eq!(annotation.transcripts[0].name, "A-201");
        assert_eq!(annotation.transcripts[0].parent.as_deref(), Some("G1"));
        assert_eq!(annotation.proteins.len(), 1);
        assert_eq!(annotation.proteins[0].parent.as_deref(), Some("T1"));

        let report = skips.snapshot();
        assert_eq!(report.total, 3);
        assert_eq!(report.by_reason["duplicate_identifier"], 1);
        assert_eq!(report.by_reason["malformed_record"], 1);
        assert_eq!(report.by_reason["missing_identifier"], 1);
    }

    #[test]
    fn tile_edges_link_neighbours() {
        let region = TopLevelRegion {
            name: "1".to_string(),
            length: 2500,
            coord_system: "chromosome".to_string(),
        };
        let edges = tile_edges(TaxonId::new(9606), "genome_GRCh38", &region, 0..3).unwrap();
        let next = edges.iter().filter(|e| e.label == "next").collect::<Vec<_>>();
        assert_eq!(next.len(), 2);
        assert_eq!(next[1].from.uuid, "9606:1:1001-2000");
        assert_eq!(next[1].to.uuid, "9606:1:2001-3000");
        assert_eq!(edges.iter().filter(|e| e.label == "contains interval").count(), 3);
    }

    #[test]
    fn long_regions_are_sliced_into_bounded_batches() {
        let tiles = (2 * RECORD_BATCH + 1) as u64;
        let region = TopLevelRegion {
            name: "2".to_string(),
            length: tiles * 1000 - 10,
            coord_system: "chromosome".to_string(),
        };
        let slices = tile_slices(region.length).collect::<Vec<_>>();
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[2], 2 * RECORD_BATCH as u64..tiles);
        assert!(slices.iter().all(|slice| slice.end - slice.start <= RECORD_BATCH as u64));

        let mut next = 0;
        let mut contains = 0;
        for slice in slices {
            let edges = tile_edges(TaxonId::new(9606), "genome_GRCh38", &region, slice.clone()).unwrap();
            assert!(edges.len() <= 2 * RECORD_BATCH);
            if slice.start == 0 {
                let last = edges.iter().rfind(|edge| edge.label == "next").unwrap();
                // crosses into the next slice
                assert_eq!(last.from.uuid, "9606:2:9999001-10000000");
                assert_eq!(last.to.uuid, "9606:2:10000001-10001000");
            }
            next += edges.iter().filter(|edge| edge.label == "next").count();
            contains += edges.iter().filter(|edge| edge.label == "contains interval").count();
        }
        assert_eq!(next, tiles as usize - 1);
        assert_eq!(contains, tiles as usize);
        assert!(tile_slices(0).next().is_none());
    }
}
