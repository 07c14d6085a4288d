use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Species, TaxonId};
use crate::error::GraphError;

const ENA_TAXONOMY_URL: &str = "https://www.ebi.ac.uk/ena/taxonomy/rest/scientific-name";
const ENSEMBL_REST_URL: &str = "https://rest.ensembl.org";

/// Assembly description as returned by Ensembl `info/assembly`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyInfo {
    pub assembly_name: String,
    #[serde(default)]
    pub karyotype: Vec<String>,
    pub top_level_region: Vec<TopLevelRegion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelRegion {
    pub name: String,
    pub length: u64,
    pub coord_system: String,
}

impl TopLevelRegion {
    pub fn is_chromosome(&self) -> bool {
        self.coord_system == "chromosome"
    }
}

impl AssemblyInfo {
    /// Regions to tile; with `primary_only` only `chromosome` coordinate systems.
    pub fn regions(&self, primary_only: bool) -> impl Iterator<Item = &TopLevelRegion> {
        self.top_level_region
            .iter()
            .filter(move |region| !primary_only || region.is_chromosome())
    }

    pub fn from_json(raw: &str) -> Result<Self, GraphError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| GraphError::AnnotationLookup(err.to_string()))?;
        parse_assembly(value)
    }
}

pub trait AnnotationClient: Send + Sync {
    fn taxon_id(&self, species: &Species) -> Result<TaxonId, GraphError>;
    fn assembly(&self, species: &Species) -> Result<AssemblyInfo, GraphError>;
}

#[derive(Clone)]
pub struct EnsemblHttpClient {
    client: Client,
    taxonomy_url: String,
    ensembl_url: String,
}

impl EnsemblHttpClient {
    pub fn new() -> Result<Self, GraphError> {
        Self::with_base_urls(ENA_TAXONOMY_URL, ENSEMBL_REST_URL)
    }

    pub fn with_base_urls(taxonomy_url: &str, ensembl_url: &str) -> Result<Self, GraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biograph/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GraphError::AnnotationLookup(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| GraphError::AnnotationLookup(err.to_string()))?;
        Ok(Self {
            client,
            taxonomy_url: taxonomy_url.trim_end_matches('/').to_string(),
            ensembl_url: ensembl_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, GraphError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| GraphError::AnnotationLookup(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GraphError::AnnotationLookup(err.to_string()))?;
        // Ensembl reports unknown species as 400 with a JSON `error` body
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(GraphError::AnnotationLookup(format!(
                "{url} returned status {}: {body}",
                status.as_u16()
            ))),
            Err(err) => Err(GraphError::AnnotationLookup(err.to_string())),
        }
    }
}

impl AnnotationClient for EnsemblHttpClient {
    fn taxon_id(&self, species: &Species) -> Result<TaxonId, GraphError> {
        let url = format!(
            "{}/{}",
            self.taxonomy_url,
            species.as_str().replace(' ', "%20")
        );
        parse_taxon(species, &self.get_json(&url)?)
    }

    fn assembly(&self, species: &Species) -> Result<AssemblyInfo, GraphError> {
        let url = format!(
            "{}/info/assembly/{}",
            self.ensembl_url,
            species.ensembl_name()
        );
        parse_assembly(self.get_json(&url)?)
    }
}

/// ENA answers with a list of matches; anything but exactly one is a miss.
pub fn parse_taxon(species: &Species, value: &Value) -> Result<TaxonId, GraphError> {
    let matches = value.as_array().map(Vec::as_slice).unwrap_or_default();
    let [entry] = matches else {
        return Err(GraphError::AnnotationLookup(format!(
            "taxon not found for species {species} ({} matches)",
            matches.len()
        )));
    };
    let raw = match entry.get("taxId") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => {
            return Err(GraphError::AnnotationLookup(format!(
                "taxon entry for {species} has no taxId"
            )));
        }
    };
    raw.parse()
}

fn parse_assembly(value: Value) -> Result<AssemblyInfo, GraphError> {
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(GraphError::AnnotationLookup(error.to_string()));
    }
    serde_json::from_value(value).map_err(|err| GraphError::AnnotationLookup(err.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn human() -> Species {
        "homo sapiens".parse().unwrap()
    }

    #[test]
    fn taxon_requires_exactly_one_match() {
        let found = json!([{"taxId": "9606", "scientificName": "Homo sapiens"}]);
        assert_eq!(parse_taxon(&human(), &found).unwrap(), TaxonId::new(9606));

        assert_matches!(
            parse_taxon(&human(), &json!([])),
            Err(GraphError::AnnotationLookup(_))
        );
        assert_matches!(
            parse_taxon(&human(), &json!([{"taxId": "1"}, {"taxId": "2"}])),
            Err(GraphError::AnnotationLookup(_))
        );
    }

    #[test]
    fn assembly_error_body_is_reported() {
        let raw = r#"{"error": "Can not find internal name for species 'foo_bar'"}"#;
        assert_matches!(
            AssemblyInfo::from_json(raw),
            Err(GraphError::AnnotationLookup(message)) if message.contains("foo_bar")
        );
    }

    #[test]
    fn primary_regions_filter_coord_system() {
        let raw = r#"{
            "assembly_name": "GRCh38",
            "karyotype": ["1", "X"],
            "top_level_region": [
                {"name": "1", "length": 2500, "coord_system": "chromosome"},
                {"name": "KI270728.1", "length": 1872759, "coord_system": "scaffold"}
            ]
        }"#;
        let info = AssemblyInfo::from_json(raw).unwrap();
        assert_eq!(info.regions(false).count(), 2);
        let primary = info.regions(true).map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(primary, vec!["1"]);
    }
}
