use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Value, json};

use biograph::app::{App, NoProgress};
use biograph::error::GraphError;
use biograph::record::{GraphEdge, GraphNode};
use biograph::service::{
    self, AttachRequest, CreateObjectRequest, Direction, GraphService, RelationshipDescriptor,
    RelationshipQuery,
};
use biograph::store::OutputStore;
use biograph::writer::StreamWriter;

/// Serves `total` related cells for object `lib1` and records writes.
struct DummyService {
    total: usize,
    fail_offset: Option<usize>,
    created: Mutex<Vec<String>>,
    attached: Mutex<Vec<String>>,
}

impl DummyService {
    fn new(total: usize) -> Self {
        Self {
            total,
            fail_offset: None,
            created: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
        }
    }

    fn object(&self) -> Value {
        json!({
            "uuid": "lib1",
            "relationshipMetadata": [{
                "relationship": {
                    "label": "contains cell",
                    "domain": [{"dbLabel": "SingleCellExperiment"}],
                    "range": [{"dbLabel": "CellBarcode"}]
                },
                "outbound": true,
                "total": self.total
            }]
        })
    }
}

impl GraphService for DummyService {
    fn concept_uri(&self, db_label: &str) -> Result<Option<String>, GraphError> {
        Ok((db_label != "Sample").then(|| format!("uri:{db_label}")))
    }

    fn get_object(&self, id: &str) -> Result<Option<Value>, GraphError> {
        Ok((id == "lib1").then(|| self.object()))
    }

    fn create_objects(&self, request: &CreateObjectRequest) -> Result<Value, GraphError> {
        let mut created = self.created.lock().unwrap();
        created.extend(request.payload.iter().map(|object| object.uuid.clone()));
        Ok(json!({"created": request.payload.len()}))
    }

    fn attach(&self, request: &AttachRequest) -> Result<Value, GraphError> {
        self.attached
            .lock()
            .unwrap()
            .push(format!("{}->{}", request.from.uuid, request.to.uuid));
        Ok(json!({}))
    }

    fn relationship_page(&self, object_uuid: &str, query: &RelationshipQuery) -> Result<Value, GraphError> {
        assert_eq!(object_uuid, "lib1");
        if self.fail_offset == Some(query.offset) {
            return Err(GraphError::UpstreamStatus {
                status: 500,
                message: "boom".to_string(),
            });
        }
        let end = (query.offset + query.limit).min(self.total);
        let data = (query.offset..end)
            .map(|index| {
                json!({
                    "elementId": format!("e{index}"),
                    "relationship": {"label": query.relationship_label},
                    "properties": {},
                    "startNode": {"uuid": "lib1"},
                    "endNode": {"uuid": format!("lib1:cell{index}")}
                })
            })
            .collect::<Vec<_>>();
        Ok(json!({ "data": data }))
    }
}

fn descriptor(service: &DummyService) -> RelationshipDescriptor {
    service::descriptors(&service.object()).unwrap().remove(0)
}

fn node_ids(related: &[service::RelatedObject]) -> Vec<String> {
    related
        .iter()
        .map(|object| object.node["uuid"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn fetch_all_walks_every_page() {
    let service = DummyService::new(7);
    let descriptor = descriptor(&service);
    assert_eq!(descriptor.direction, Direction::Outbound);
    assert_eq!(descriptor.match_label, "CellBarcode");

    let related = service::fetch_all(&service, &descriptor, 3).unwrap();
    assert_eq!(related.len(), 7);
    assert_eq!(related[6].edge.element_id, "e6");

    let page = service::fetch(&service, &descriptor, 3, 6).unwrap();
    assert_eq!(node_ids(&page), vec!["lib1:cell6"]);
}

#[test]
fn fetch_all_without_count_stops_at_short_page() {
    let service = DummyService::new(5);
    let mut descriptor = descriptor(&service);
    descriptor.count_hint = None;
    let related = service::fetch_all(&service, &descriptor, 2).unwrap();
    assert_eq!(related.len(), 5);
}

#[test]
fn zero_limit_is_rejected() {
    let service = DummyService::new(1);
    let descriptor = descriptor(&service);
    assert_matches!(
        service::fetch(&service, &descriptor, 0, 0),
        Err(GraphError::InvalidLimit(0))
    );
}

#[test]
fn scrape_reassembles_pages_in_order() {
    let service = DummyService::new(23);
    let descriptor = descriptor(&service);
    let related = service::scrape(&service, &descriptor, 4, 3).unwrap();
    let expected = (0..23).map(|index| format!("lib1:cell{index}")).collect::<Vec<_>>();
    assert_eq!(node_ids(&related), expected);
}

#[test]
fn scrape_fails_when_any_page_fails() {
    let mut service = DummyService::new(20);
    service.fail_offset = Some(8);
    let descriptor = descriptor(&service);
    assert_matches!(
        service::scrape(&service, &descriptor, 4, 4),
        Err(GraphError::UpstreamStatus { status: 500, .. })
    );
}

#[test]
fn related_finds_relationship_by_label() {
    let service = DummyService::new(3);
    let app = App::new(OutputStore::new("unused"));
    let result = app.related(&service, "lib1", "contains cell", 2, 2).unwrap();
    assert_eq!(result.count, 3);

    assert_matches!(
        app.related(&service, "lib1", "has sample", 2, 2),
        Err(GraphError::InvalidObject { .. })
    );
    assert_matches!(
        app.related(&service, "missing", "contains cell", 2, 2),
        Err(GraphError::UpstreamStatus { status: 404, .. })
    );
}

#[test]
fn push_uploads_known_concepts_and_every_edge() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = OutputStore::new(root);
    let outputs = store.outputs("scrna");
    let writer = StreamWriter::default();
    writer
        .append(
            &[
                GraphNode::new("lib1:AAAC", "CellBarcode"),
                GraphNode::new("lib1", "Experiment").with_label("SingleCellExperiment"),
                GraphNode::new("s1", "Sample"),
            ],
            outputs.nodes.as_std_path(),
        )
        .unwrap();
    writer
        .append(
            &[
                GraphEdge::new("lib1", "lib1:AAAC", "contains cell"),
                GraphEdge::new("s1", "lib1", "has experiment"),
            ],
            outputs.edges.as_std_path(),
        )
        .unwrap();

    let service = DummyService::new(0);
    let report = App::new(store).push(&service, "scrna", &NoProgress).unwrap();
    assert_eq!(report.objects_created, 2);
    assert_eq!(report.edges_attached, 2);
    assert_eq!(report.unknown_concepts, vec!["Sample"]);
    assert_eq!(
        *service.attached.lock().unwrap(),
        vec!["lib1->lib1:AAAC", "s1->lib1"]
    );
}
