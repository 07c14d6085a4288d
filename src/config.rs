use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::adapters::chipseq::DEFAULT_MODIFICATION_TYPE;
use crate::adapters::{AssemblySource, ChipSeqOptions, GenomeOptions, SingleCellOptions};
use crate::domain::{Modality, Species, TaxonId};
use crate::emitter::DEFAULT_BATCH_SIZE;
use crate::error::GraphError;
use crate::service::ServiceConfig;
use crate::store::DEFAULT_OUTPUT_DIR;

pub const CONFIG_FILE: &str = "biograph.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub genomes: Vec<GenomeEntry>,
    #[serde(default)]
    pub chipseq: Vec<ChipSeqEntry>,
    #[serde(default)]
    pub single_cell: Vec<SingleCellEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GenomeEntry {
    Shorthand(String),
    Detailed(GenomeEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GenomeEntryObject {
    pub species: String,
    #[serde(default)]
    pub taxon: Option<String>,
    /// Saved Ensembl assembly response used instead of a REST lookup.
    #[serde(default)]
    pub assembly_file: Option<PathBuf>,
    #[serde(default)]
    pub gtf: Option<PathBuf>,
    #[serde(default)]
    pub primary_assembly_only: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChipSeqEntry {
    pub name: String,
    pub protein_id: String,
    #[serde(default)]
    pub modification_type: Option<String>,
    pub sample_id: String,
    pub bed: PathBuf,
    pub taxon: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SingleCellEntry {
    pub modality: String,
    pub matrix: PathBuf,
    pub features: PathBuf,
    pub cells: PathBuf,
    #[serde(default)]
    pub barcode_column: Option<String>,
    #[serde(default)]
    pub library_column: Option<String>,
    #[serde(default)]
    pub sample_column: Option<String>,
    #[serde(default)]
    pub cell_type_column: Option<String>,
    #[serde(default)]
    pub experiment_columns: Vec<String>,
    #[serde(default)]
    pub sample_columns: Vec<String>,
    #[serde(default)]
    pub taxon: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub output_dir: Utf8PathBuf,
    pub batch_size: usize,
    pub service: Option<ServiceConfig>,
    pub genomes: Vec<GenomeOptions>,
    pub chipseq: Vec<ChipSeqOptions>,
    pub single_cell: Vec<SingleCellOptions>,
}

impl ResolvedConfig {
    pub fn adapter_count(&self) -> usize {
        self.genomes.len() + self.chipseq.len() + self.single_cell.len()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `biograph.json` in the current directory. Relative
    /// input paths are taken relative to the config file.
    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, GraphError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(GraphError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GraphError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GraphError::ConfigParse(err.to_string()))?;

        let base = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::resolve_config(config, base)
    }

    pub fn resolve_config(config: Config, base: &Path) -> Result<ResolvedConfig, GraphError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let batch_size = config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size < 1 {
            return Err(GraphError::InvalidBatchSize);
        }
        let output_dir = Utf8PathBuf::from(config.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR));
        let service = config.service.or_else(ServiceConfig::from_env);
        let input = |path: PathBuf| if path.is_absolute() { path } else { base.join(path) };

        let genomes = config
            .genomes
            .into_iter()
            .map(|entry| match entry {
                GenomeEntry::Shorthand(species) => Ok(GenomeOptions::new(species.parse()?)),
                GenomeEntry::Detailed(obj) => {
                    let species: Species = obj.species.parse()?;
                    Ok(GenomeOptions {
                        taxon: obj.taxon.as_deref().map(str::parse).transpose()?,
                        assembly: obj
                            .assembly_file
                            .map(|path| AssemblySource::File(input(path)))
                            .unwrap_or(AssemblySource::Lookup),
                        gtf: obj.gtf.map(input),
                        primary_assembly_only: obj.primary_assembly_only,
                        ..GenomeOptions::new(species)
                    })
                }
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        let chipseq = config
            .chipseq
            .into_iter()
            .map(|entry| {
                Ok(ChipSeqOptions {
                    name: entry.name,
                    protein_id: entry.protein_id,
                    modification_type: entry
                        .modification_type
                        .unwrap_or_else(|| DEFAULT_MODIFICATION_TYPE.to_string()),
                    sample_id: entry.sample_id,
                    bed: input(entry.bed),
                    taxon: entry.taxon.parse::<TaxonId>()?,
                })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        let single_cell = config
            .single_cell
            .into_iter()
            .map(|entry| {
                let modality: Modality = entry.modality.parse()?;
                let mut options = SingleCellOptions::new(
                    modality,
                    input(entry.matrix),
                    input(entry.features),
                    input(entry.cells),
                );
                if let Some(column) = entry.barcode_column {
                    options.barcode_column = column;
                }
                if let Some(column) = entry.library_column {
                    options.library_column = column;
                }
                options.sample_column = entry.sample_column;
                options.cell_type_column = entry.cell_type_column;
                options.experiment_columns = entry.experiment_columns;
                options.sample_columns = entry.sample_columns;
                options.taxon = entry.taxon.as_deref().map(str::parse).transpose()?;
                options.batch_size = entry.batch_size.unwrap_or(batch_size);
                Ok(options)
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            output_dir,
            batch_size,
            service,
            genomes,
            chipseq,
            single_cell,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Config {
        Config {
            schema_version: None,
            output_dir: None,
            batch_size: None,
            service: None,
            genomes: Vec::new(),
            chipseq: Vec::new(),
            single_cell: Vec::new(),
        }
    }

    #[test]
    fn defaults_apply() {
        let resolved = ConfigLoader::resolve_config(empty(), Path::new(".")).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.output_dir, Utf8PathBuf::from("graph-out"));
        assert_eq!(resolved.batch_size, 1000);
        assert_eq!(resolved.adapter_count(), 0);
    }

    #[test]
    fn genome_shorthand_uses_lookup() {
        let config = Config {
            genomes: vec![GenomeEntry::Shorthand("Homo sapiens".to_string())],
            ..empty()
        };
        let resolved = ConfigLoader::resolve_config(config, Path::new("/data")).unwrap();
        assert_eq!(resolved.genomes[0].species.as_str(), "homo sapiens");
        assert!(matches!(resolved.genomes[0].assembly, AssemblySource::Lookup));
        assert!(resolved.genomes[0].taxon.is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = Config {
            batch_size: Some(0),
            ..empty()
        };
        assert!(matches!(
            ConfigLoader::resolve_config(config, Path::new(".")),
            Err(GraphError::InvalidBatchSize)
        ));
    }
}
