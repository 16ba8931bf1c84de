//! # Run Settings
//!
//! Directory layout and reading options for a scoring run. Every field has a
//! default matching the layout the pretrained artifacts ship with, so a settings
//! file is optional. When one is given it is a TOML document whose keys mirror
//! the fields below; the command line overrides whatever it sets.

use crate::omics::Orientation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Layout of the artifact tree and the options used to read the omics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory every relative path below is resolved against.
    pub root: PathBuf,
    /// Cohort prefix of the artifact file names, e.g. `TCGA_BRCA`.
    pub cohort: String,
    /// Learner suffix of the artifact file names, e.g. `lightgbm`.
    pub algorithm: String,
    pub variables_dir: PathBuf,
    pub models_dir: PathBuf,
    /// The omics table to score.
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub orientation: Orientation,
    pub separator: char,
    /// Run the memory-footprint reduction pass after loading.
    pub downcast: bool,
    /// Write the class probabilities of classifier models next to the score.
    pub probabilities: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cohort: "TCGA_BRCA".to_string(),
            algorithm: "lightgbm".to_string(),
            variables_dir: PathBuf::from("biological_variables"),
            models_dir: PathBuf::from("saved_model"),
            input: PathBuf::from("input_data/data.csv"),
            output_dir: PathBuf::from("output_data"),
            orientation: Orientation::default(),
            separator: ',',
            downcast: true,
            probabilities: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("The separator '{0}' is not a single-byte ASCII character.")]
    InvalidSeparator(char),
}

impl Settings {
    /// Reads settings from a TOML file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The field separator as the single byte the CSV readers expect.
    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        if self.separator.is_ascii() {
            Ok(self.separator as u8)
        } else {
            Err(ConfigError::InvalidSeparator(self.separator))
        }
    }

    /// Resolves a configured path against `root` unless it is already absolute.
    pub fn under_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
