use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// NCBI taxonomy identifier, e.g. 9606 for homo sapiens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonId(u32);

impl TaxonId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let normalized = normalized
            .strip_prefix("NCBITaxon:")
            .unwrap_or(normalized);
        match normalized.parse::<u32>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(GraphError::InvalidTaxon(value.to_string())),
        }
    }
}

/// Scientific species name, normalized to lower case ("homo sapiens").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Species(String);

impl Species {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ensembl REST paths use underscores instead of spaces.
    pub fn ensembl_name(&self) -> String {
        self.0.replace(' ', "_")
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Species {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .split(|ch: char| ch.is_whitespace() || ch == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let is_valid = normalized.contains(' ')
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphabetic() || ch == ' ' || ch == '-' || ch == '.');
        if !is_valid {
            return Err(GraphError::InvalidSpecies(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Species {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Rna,
    Atac,
}

impl Modality {
    pub fn experiment_label(&self) -> &'static str {
        match self {
            Modality::Rna => "SingleCellRNAseqExperiment",
            Modality::Atac => "SingleCellATACseqExperiment",
        }
    }

    pub fn feature_edge_label(&self) -> &'static str {
        match self {
            Modality::Rna => "expresses",
            Modality::Atac => "has peak",
        }
    }

    pub fn value_property(&self) -> &'static str {
        match self {
            Modality::Rna => "normValue",
            Modality::Atac => "count",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Rna => write!(f, "rna"),
            Modality::Atac => write!(f, "atac"),
        }
    }
}

impl FromStr for Modality {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "rna" | "scrna" => Ok(Modality::Rna),
            "atac" | "scatac" => Ok(Modality::Atac),
            _ => Err(GraphError::InvalidModality(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Genome,
    Chipseq,
    SingleCell,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Genome => write!(f, "genome"),
            AdapterKind::Chipseq => write!(f, "chipseq"),
            AdapterKind::SingleCell => write!(f, "single-cell"),
        }
    }
}

impl FromStr for AdapterKind {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "genome" => Ok(AdapterKind::Genome),
            "chipseq" => Ok(AdapterKind::Chipseq),
            "single-cell" | "scrna" | "scatac" => Ok(AdapterKind::SingleCell),
            _ => Err(GraphError::InvalidAdapterKind(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_taxon_with_prefix() {
        let taxon: TaxonId = "NCBITaxon:10090".parse().unwrap();
        assert_eq!(taxon.value(), 10090);
    }

    #[test]
    fn parse_taxon_invalid() {
        let err = "zero".parse::<TaxonId>().unwrap_err();
        assert_matches!(err, GraphError::InvalidTaxon(_));
        assert_matches!("0".parse::<TaxonId>(), Err(GraphError::InvalidTaxon(_)));
    }

    #[test]
    fn parse_species_normalizes() {
        let species: Species = "Homo_sapiens".parse().unwrap();
        assert_eq!(species.as_str(), "homo sapiens");
        assert_eq!(species.ensembl_name(), "homo_sapiens");
    }

    #[test]
    fn deserialized_species_is_normalized_and_checked() {
        let species: Species = serde_json::from_str("\"Mus_Musculus\"").unwrap();
        assert_eq!(species.as_str(), "mus musculus");
        assert!(serde_json::from_str::<Species>("\"human\"").is_err());
    }

    #[test]
    fn parse_species_requires_binomial() {
        let err = "human".parse::<Species>().unwrap_err();
        assert_matches!(err, GraphError::InvalidSpecies(_));
    }
}
