use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{EditionNumber, SpeciesId};
use crate::error::AnnotrackError;
use crate::pipeline::RunOptions;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub species: Vec<u32>,
    #[serde(default)]
    pub min_edition: Option<u32>,
    #[serde(default)]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Option<Utf8PathBuf>,
    pub species: Option<BTreeSet<SpeciesId>>,
    pub min_edition: Option<EditionNumber>,
    pub workers: Option<usize>,
}

impl ResolvedConfig {
    pub fn run_options(&self, force: bool) -> RunOptions {
        RunOptions {
            force,
            species: self.species.clone(),
            min_edition: self.min_edition,
            workers: self.workers,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AnnotrackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("annotrack.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(AnnotrackError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AnnotrackError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AnnotrackError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AnnotrackError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let species = if config.species.is_empty() {
            None
        } else {
            Some(config.species.into_iter().map(SpeciesId).collect())
        };

        Ok(ResolvedConfig {
            schema_version,
            data_dir: config.data_dir.map(Utf8PathBuf::from),
            species,
            min_edition: config.min_edition.map(EditionNumber),
            workers: config.workers,
        })
    }
}
