use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;

use biograph::adapter::{Adapter, AdapterState};
use biograph::adapters::{AssemblySource, GenomeAdapter, GenomeOptions};
use biograph::annotation::{AnnotationClient, AssemblyInfo, TopLevelRegion};
use biograph::domain::{Species, TaxonId};
use biograph::error::GraphError;
use biograph::record::GraphRecord;
use biograph::store::OutputStore;
use biograph::writer::read_records;

struct DummyAnnotation;

impl AnnotationClient for DummyAnnotation {
    fn taxon_id(&self, _species: &Species) -> Result<TaxonId, GraphError> {
        Ok(TaxonId::new(9606))
    }

    fn assembly(&self, _species: &Species) -> Result<AssemblyInfo, GraphError> {
        Err(GraphError::AnnotationLookup("offline".to_string()))
    }
}

fn assembly() -> AssemblyInfo {
    let region = |name: &str, length: u64, coord_system: &str| TopLevelRegion {
        name: name.to_string(),
        length,
        coord_system: coord_system.to_string(),
    };
    AssemblyInfo {
        assembly_name: "GRCh38".to_string(),
        karyotype: vec!["chr1".to_string(), "chr2".to_string()],
        top_level_region: vec![
            region("chr1", 2500, "chromosome"),
            region("chr2", 1000, "chromosome"),
            region("KI270728.1", 1500, "scaffold"),
        ],
    }
}

fn adapter(root: &Utf8PathBuf, gtf: Option<std::path::PathBuf>) -> GenomeAdapter<DummyAnnotation> {
    let species: Species = "homo sapiens".parse().unwrap();
    let options = GenomeOptions {
        assembly: AssemblySource::Inline(assembly()),
        gtf,
        primary_assembly_only: true,
        ..GenomeOptions::new(species)
    };
    let outputs = OutputStore::new(root.clone()).outputs("genome_homo_sapiens");
    GenomeAdapter::new(DummyAnnotation, options, outputs)
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn tiles_use_fixed_boundaries() {
    let (_temp, root) = temp_root();
    let mut adapter = adapter(&root, None);
    adapter.pull_data().unwrap();
    assert_eq!(adapter.taxon(), Some(TaxonId::new(9606)));

    let nodes = adapter.iterate_nodes(false).unwrap().into_records();
    let tiles = nodes
        .iter()
        .filter(|node| node.has_label("GenomicInterval"))
        .collect::<Vec<_>>();
    let ids = tiles.iter().map(|node| node.id.as_str()).collect::<Vec<_>>();
    assert_eq!(
        ids,
        vec![
            "9606:chr1:1-1000",
            "9606:chr1:1001-2000",
            "9606:chr1:2001-3000",
            "9606:chr2:1-1000",
        ]
    );
    assert_eq!(tiles[2].properties["start"], 2001);
    assert_eq!(tiles[2].properties["end"], 2500);
    assert_eq!(tiles[3].properties["end"], 1000);

    let genome = nodes.iter().find(|node| node.has_label("Genome")).unwrap();
    assert_eq!(genome.id, "genome_GRCh38");
    assert_eq!(genome.properties["species"], "homo sapiens");
}

#[test]
fn next_edges_link_adjacent_tiles_only() {
    let (_temp, root) = temp_root();
    let mut adapter = adapter(&root, None);
    adapter.pull_data().unwrap();
    let edges = adapter.iterate_edges(false).unwrap().into_records();

    let next = edges
        .iter()
        .filter(|edge| edge.label == "next")
        .map(|edge| (edge.from.uuid.as_str(), edge.to.uuid.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        next,
        vec![
            ("9606:chr1:1-1000", "9606:chr1:1001-2000"),
            ("9606:chr1:1001-2000", "9606:chr1:2001-3000"),
        ]
    );
    let contains = edges
        .iter()
        .filter(|edge| edge.label == "contains interval")
        .count();
    assert_eq!(contains, 4);
    assert!(edges.iter().all(|edge| edge.label != "contains interval" || edge.from.uuid == "genome_GRCh38"));
}

#[test]
fn edges_before_pull_fail_and_write_nothing() {
    let (_temp, root) = temp_root();
    let mut adapter = adapter(&root, None);
    let result = adapter.iterate_edges(true);
    assert_matches!(result, Err(GraphError::PrecursorNotReady { .. }));
    assert_eq!(adapter.state(), AdapterState::Created);
    assert!(!adapter.outputs().edges.as_std_path().exists());
}

#[test]
fn gtf_features_are_streamed_to_disk() {
    let (temp, root) = temp_root();
    let gtf = temp.path().join("annotation.gtf");
    fs::write(
        &gtf,
        "#!genome-build GRCh38\n\
         chr1\tensembl\tgene\t11\t1200\t.\t+\t.\tgene_id \"ENSG01\"; gene_name \"ALPHA\";\n\
         chr1\tensembl\ttranscript\t11\t1200\t.\t+\t.\tgene_id \"ENSG01\"; transcript_id \"ENST01\"; transcript_name \"ALPHA-201\";\n\
         chr1\tensembl\tCDS\t50\t300\t.\t+\t0\tgene_id \"ENSG01\"; transcript_id \"ENST01\"; protein_id \"ENSP01\";\n\
         chr2\tensembl\tgene\t1\t90\t.\t-\t.\tgene_id \"ENSG02\"; gene_name \"\";\n",
    )
    .unwrap();

    let mut adapter = adapter(&root, Some(gtf));
    adapter.pull_data().unwrap();
    adapter.iterate_nodes(true).unwrap();
    adapter.iterate_edges(true).unwrap();
    assert_eq!(adapter.state(), AdapterState::EdgesEmitted);

    let nodes = read_records(adapter.outputs().nodes.as_std_path()).unwrap();
    let gene = nodes
        .iter()
        .find_map(|record| match record {
            GraphRecord::Node(node) if node.id == "ENSG02" => Some(node.clone()),
            _ => None,
        })
        .unwrap();
    // empty gene name falls back to the accession
    assert_eq!(gene.properties["displayName"], "ENSG02");
    assert_eq!(gene.properties["chr"], "2");
    assert_eq!(gene.properties["strand"], "-");

    let edges = read_records(adapter.outputs().edges.as_std_path()).unwrap();
    let labelled = |label: &str| {
        edges
            .iter()
            .filter_map(|record| match record {
                GraphRecord::Edge(edge) if edge.label == label => {
                    Some(json!([edge.from.uuid, edge.to.uuid]))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(labelled("transcribed to"), vec![json!(["ENSG01", "ENST01"])]);
    assert_eq!(labelled("has translation"), vec![json!(["ENST01", "ENSP01"])]);
}
