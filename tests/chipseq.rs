use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use biograph::adapter::Adapter;
use biograph::adapters::{ChipSeqAdapter, ChipSeqOptions};
use biograph::app::{App, NoProgress};
use biograph::domain::TaxonId;
use biograph::error::GraphError;
use biograph::record::GraphRecord;
use biograph::store::OutputStore;
use biograph::writer::read_records;

fn options(bed: std::path::PathBuf) -> ChipSeqOptions {
    ChipSeqOptions {
        name: "H3K4me3-liver".to_string(),
        protein_id: "ENSP00000263025".to_string(),
        modification_type: "H3K4me3".to_string(),
        sample_id: "ENCBS001".to_string(),
        bed,
        taxon: TaxonId::new(9606),
    }
}

#[test]
fn peaks_are_placed_on_tiles() {
    let temp = tempfile::tempdir().unwrap();
    let bed = temp.path().join("ENCFF100.bed.gz");
    {
        use std::io::Write;
        let file = fs::File::create(&bed).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(
                b"chr1\t999\t2000\tpeak1\t500\t.\t12.5\t30.2\t28.1\t140\n\
                  chr1\t5\t10\tpeak2\t10\t+\t1.0\t2.0\t1.5\t3\n\
                  chr1\t5\t5\tpeak3\t10\t+\t1.0\t2.0\t1.5\t3\n",
            )
            .unwrap();
        encoder.finish().unwrap();
    }
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let app = App::new(OutputStore::new(root));
    let mut adapter = app.chipseq_adapter(options(bed));
    let report = app.run(&mut adapter, &NoProgress).unwrap();

    assert_eq!(report.adapter, "chipseq_H3K4me3-liver");
    // assay + 2 peaks
    assert_eq!(report.nodes_written, 3);
    // 2 assay edges + 3 per peak
    assert_eq!(report.edges_written, 8);
    assert_eq!(report.skipped.total, 1);
    assert_eq!(report.skipped.by_reason["malformed_record"], 1);

    let nodes = read_records(adapter.outputs().nodes.as_std_path()).unwrap();
    let peak = nodes
        .iter()
        .find_map(|record| match record {
            GraphRecord::Node(node) if node.id == "ENCFF100-peak1" => Some(node.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(peak.labels, vec!["NarrowPeak"]);
    assert_eq!(peak.properties["start"], 1000);
    assert_eq!(peak.properties["end"], 2000);
    assert_eq!(peak.properties["chr"], "1");
    assert_eq!(peak.properties["peak"], 140);

    let edges = read_records(adapter.outputs().edges.as_std_path()).unwrap();
    let target = |label: &str, from: &str| {
        edges.iter().find_map(|record| match record {
            GraphRecord::Edge(edge) if edge.label == label && edge.from.uuid == from => {
                Some(edge.clone())
            }
            _ => None,
        })
    };
    assert_eq!(
        target("peak start on", "ENCFF100-peak1").unwrap().to.uuid,
        "9606:1:1-1000"
    );
    assert_eq!(
        target("peak end on", "ENCFF100-peak1").unwrap().to.uuid,
        "9606:1:1001-2000"
    );
    let assay = target("assay target on", "chipseq:H3K4me3-liver").unwrap();
    assert_eq!(assay.to.uuid, "ENSP00000263025");
    assert_eq!(assay.property("modification_type").unwrap(), "H3K4me3");
    assert_eq!(
        target("has chipseq", "ENCBS001").unwrap().to.uuid,
        "chipseq:H3K4me3-liver"
    );
}

#[test]
fn a_source_with_only_bad_rows_is_an_empty_result() {
    let temp = tempfile::tempdir().unwrap();
    let bed = temp.path().join("broken.bed");
    fs::write(&bed, "chr1\t10\n chr1\tx\t20\tp\t1\t.\t1\t1\t1\t1\n").unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let outputs = OutputStore::new(root).outputs("chipseq_broken");
    let mut adapter = ChipSeqAdapter::new(options(bed), outputs);
    assert_matches!(
        adapter.pull_data(),
        Err(GraphError::EmptyResult { skipped: 2, .. })
    );
}
