//! Flat, kind-tagged object record.
//!
//! Every object kind shares one shape; which optional fields a kind requires
//! or accepts is decided by [`ObjectKind`] instead of a type hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::TaxonId;
use crate::error::GraphError;
use crate::record::GraphNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Sample,
    Donor,
    Experiment,
    CellType,
    CellBarcode,
    Genome,
    GenomicInterval,
    Gene,
    Transcript,
    Protein,
    ChipSeq,
    NarrowPeak,
}

impl ObjectKind {
    pub fn db_label(&self) -> &'static str {
        match self {
            ObjectKind::Sample => "Sample",
            ObjectKind::Donor => "Donor",
            ObjectKind::Experiment => "Experiment",
            ObjectKind::CellType => "CellType",
            ObjectKind::CellBarcode => "CellBarcode",
            ObjectKind::Genome => "Genome",
            ObjectKind::GenomicInterval => "GenomicInterval",
            ObjectKind::Gene => "Gene",
            ObjectKind::Transcript => "Transcript",
            ObjectKind::Protein => "Protein",
            ObjectKind::ChipSeq => "ChIPseq",
            ObjectKind::NarrowPeak => "NarrowPeak",
        }
    }

    fn requires_taxon(&self) -> bool {
        matches!(
            self,
            ObjectKind::Genome
                | ObjectKind::GenomicInterval
                | ObjectKind::Gene
                | ObjectKind::Transcript
                | ObjectKind::Protein
        )
    }

    fn requires_species(&self) -> bool {
        matches!(self, ObjectKind::Genome | ObjectKind::GenomicInterval)
    }

    fn accepts_location(&self) -> bool {
        matches!(
            self,
            ObjectKind::GenomicInterval
                | ObjectKind::Gene
                | ObjectKind::Transcript
                | ObjectKind::NarrowPeak
        )
    }

    fn accepts_assembly(&self) -> bool {
        matches!(
            self,
            ObjectKind::Genome | ObjectKind::Gene | ObjectKind::Transcript | ObjectKind::Protein
        )
    }

    fn accepts_strand(&self) -> bool {
        matches!(self, ObjectKind::Gene | ObjectKind::Transcript | ObjectKind::NarrowPeak)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    #[serde(skip)]
    pub kind: ObjectKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxon: Option<TaxonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak: Option<i64>,
}

impl ObjectRecord {
    pub fn new(kind: ObjectKind, uuid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            uuid: Some(uuid.into()),
            display_name: display_name.into(),
            description: None,
            date_created: None,
            date_updated: None,
            taxon: None,
            species: None,
            assembly: None,
            chr: None,
            start: None,
            end: None,
            strand: None,
            score: None,
            signal_value: None,
            p_value: None,
            q_value: None,
            peak: None,
        }
    }

    pub fn location(mut self, chr: impl Into<String>, start: u64, end: u64) -> Self {
        self.chr = Some(chr.into());
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn organism(mut self, taxon: TaxonId, species: Option<&str>) -> Self {
        self.taxon = Some(taxon);
        self.species = species.map(str::to_string);
        self
    }

    pub fn assembly(mut self, assembly: Option<&str>) -> Self {
        self.assembly = assembly.map(str::to_string);
        self
    }

    pub fn strand(mut self, strand: impl Into<String>) -> Self {
        self.strand = Some(strand.into());
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.date_created = Some(at);
        self
    }

    /// Checks required fields and rejects fields the kind does not carry.
    pub fn validate(&self) -> Result<(), GraphError> {
        let kind = self.kind.db_label();
        let invalid = |reason: &str| GraphError::InvalidObject {
            kind,
            reason: reason.to_string(),
        };
        if self.display_name.trim().is_empty() {
            return Err(invalid("displayName is required"));
        }
        if self.kind.requires_taxon() && self.taxon.is_none() {
            return Err(invalid("taxon is required"));
        }
        if self.kind.requires_species() && self.species.is_none() {
            return Err(invalid("species is required"));
        }
        let has_location = self.chr.is_some() || self.start.is_some() || self.end.is_some();
        if has_location && !self.kind.accepts_location() {
            return Err(invalid("chr/start/end are not allowed"));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(invalid("start is after end"));
            }
        }
        if self.assembly.is_some() && !self.kind.accepts_assembly() {
            return Err(invalid("assembly is not allowed"));
        }
        if self.strand.is_some() && !self.kind.accepts_strand() {
            return Err(invalid("strand is not allowed"));
        }
        let has_peak_stats = self.score.is_some()
            || self.signal_value.is_some()
            || self.p_value.is_some()
            || self.q_value.is_some()
            || self.peak.is_some();
        if has_peak_stats && self.kind != ObjectKind::NarrowPeak {
            return Err(invalid("peak statistics are only allowed on narrow peaks"));
        }
        Ok(())
    }

    pub fn into_node(self) -> Result<GraphNode, GraphError> {
        self.validate()?;
        let id = self
            .uuid
            .clone()
            .filter(|uuid| !uuid.trim().is_empty())
            .ok_or(GraphError::MissingIdentifierField {
                kind: "object",
                field: "uuid",
            })?;
        let properties = match serde_json::to_value(&self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(GraphError::Serialization(format!(
                    "expected a JSON object, got {other}"
                )));
            }
            Err(err) => return Err(GraphError::Serialization(err.to_string())),
        };
        Ok(GraphNode::new(id, self.kind.db_label()).with_properties(properties))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn gene_node_has_camel_case_properties() {
        let node = ObjectRecord::new(ObjectKind::Gene, "ENSG1", "TP53")
            .location("17", 7661779, 7687538)
            .organism(TaxonId::new(9606), None)
            .assembly(Some("GRCh38"))
            .strand("-")
            .into_node()
            .unwrap();
        assert_eq!(node.id, "ENSG1");
        assert_eq!(node.labels, vec!["Gene"]);
        assert_eq!(node.properties["displayName"], "TP53");
        assert_eq!(node.properties["taxon"], 9606);
        assert_eq!(node.properties["strand"], "-");
        assert!(!node.properties.contains_key("species"));
    }

    #[test]
    fn genome_requires_species() {
        let record = ObjectRecord::new(ObjectKind::Genome, "genome_GRCh38", "GRCh38")
            .organism(TaxonId::new(9606), None);
        assert_matches!(
            record.validate(),
            Err(GraphError::InvalidObject { kind: "Genome", .. })
        );
    }

    #[test]
    fn foreign_fields_are_rejected() {
        let record = ObjectRecord::new(ObjectKind::Sample, "s1", "Sample 1").strand("+");
        assert_matches!(record.validate(), Err(GraphError::InvalidObject { .. }));

        let mut peak = ObjectRecord::new(ObjectKind::Sample, "s1", "Sample 1");
        peak.score = Some(10);
        assert_matches!(peak.validate(), Err(GraphError::InvalidObject { .. }));
    }

    #[test]
    fn missing_uuid_is_an_identifier_error() {
        let mut record = ObjectRecord::new(ObjectKind::Donor, "", "Donor");
        assert_matches!(
            record.clone().into_node(),
            Err(GraphError::MissingIdentifierField { .. })
        );
        record.uuid = None;
        assert_matches!(
            record.into_node(),
            Err(GraphError::MissingIdentifierField { .. })
        );
    }
}
