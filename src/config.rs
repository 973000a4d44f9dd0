use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::DiliError;
use crate::image_array::ImageDtype;

pub const CONFIG_FILE_NAME: &str = "dili-cp.json";
pub const DEFAULT_CHEMBL_BASE_URL: &str = "https://www.ebi.ac.uk/chembl/api/data";
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_REFERENCE_FILE: &str = "dilirank/DILIrank-DILIscore_List.xlsx";
pub const DEFAULT_REFERENCE_SHEET: &str = "DILIrank";
pub const DEFAULT_CONTROL_SAMPLE_SIZE: usize = 8;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub chembl: ChemblSection,
    #[serde(default)]
    pub reference: ReferenceSection,
    #[serde(default)]
    pub imaging: ImagingSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChemblSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReferenceSection {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ImagingSection {
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub sites: Option<Vec<String>>,
    #[serde(default)]
    pub expected_dtype: Option<ImageDtype>,
    #[serde(default)]
    pub expected_shape: Option<Vec<usize>>,
    #[serde(default)]
    pub control_sample_size: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub model_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChemblSettings {
    pub base_url: String,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct ImagingSettings {
    pub index_url: Option<String>,
    pub image_url: Option<String>,
    pub channels: Vec<String>,
    pub sites: Vec<String>,
    pub expected_dtype: Option<ImageDtype>,
    pub expected_shape: Option<Vec<usize>>,
    pub control_sample_size: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub chembl: ChemblSettings,
    pub reference_path: Utf8PathBuf,
    pub reference_sheet: String,
    pub imaging: ImagingSettings,
    pub model_url: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `dili-cp.json` in the
    /// working directory and then the user config directory are tried, and
    /// built-in defaults are used when neither is present.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DiliError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_path(),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| DiliError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DiliError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DiliError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let data_dir = Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string()));

        let page_size = config.chembl.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(DiliError::InvalidConfig(
                "chembl.page_size must be greater than zero".to_string(),
            ));
        }
        let chembl = ChemblSettings {
            base_url: trim_base_url(
                config
                    .chembl
                    .base_url
                    .unwrap_or_else(|| DEFAULT_CHEMBL_BASE_URL.to_string()),
            ),
            page_size,
        };

        let reference_path = config
            .reference
            .path
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DEFAULT_REFERENCE_FILE));
        let reference_sheet = config
            .reference
            .sheet
            .unwrap_or_else(|| DEFAULT_REFERENCE_SHEET.to_string());

        let imaging_section = config.imaging;
        let channels = imaging_section.channels.unwrap_or_else(default_channels);
        if channels.is_empty() {
            return Err(DiliError::InvalidConfig(
                "imaging.channels must not be empty".to_string(),
            ));
        }
        let sites = imaging_section.sites.unwrap_or_else(default_sites);
        if sites.is_empty() {
            return Err(DiliError::InvalidConfig(
                "imaging.sites must not be empty".to_string(),
            ));
        }
        let imaging = ImagingSettings {
            index_url: imaging_section.index_url.map(trim_base_url),
            image_url: imaging_section.image_url.map(trim_base_url),
            channels,
            sites,
            expected_dtype: imaging_section.expected_dtype,
            expected_shape: imaging_section.expected_shape,
            control_sample_size: imaging_section
                .control_sample_size
                .unwrap_or(DEFAULT_CONTROL_SAMPLE_SIZE),
            seed: imaging_section.seed.unwrap_or(42),
        };

        Ok(ResolvedConfig {
            schema_version,
            data_dir,
            chembl,
            reference_path,
            reference_sheet,
            imaging,
            model_url: config.embedding.model_url.map(trim_base_url),
        })
    }
}

pub fn default_channels() -> Vec<String> {
    ["DNA", "AGP", "Mito", "ER", "RNA"]
        .iter()
        .map(|channel| channel.to_string())
        .collect()
}

pub fn default_sites() -> Vec<String> {
    (1..=9).map(|site| site.to_string()).collect()
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("org", "dili", "dili-cellpaint")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_removed() {
        assert_eq!(
            trim_base_url("https://www.ebi.ac.uk/chembl/api/data//".to_string()),
            "https://www.ebi.ac.uk/chembl/api/data"
        );
    }
}
