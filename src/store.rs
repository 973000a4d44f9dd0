use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::{Builder, TempDir};

use crate::domain::InchiKey;
use crate::error::DiliError;

pub const DATABASE_FILE: &str = "dili.db";
pub const COMPOUNDS_CSV: &str = "diliranked_compounds.csv";
pub const META_FILE: &str = "meta.csv";
pub const EMBEDDINGS_FILE: &str = "embeddings.parquet";

/// Filesystem layout under the data directory:
///
/// ```text
/// <data>/chembl/dili.db
/// <data>/chembl/diliranked_compounds.csv
/// <data>/images/compounds/<inchi_key>/
/// <data>/images/controls/<source>_<plate>/
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
}

impl Store {
    pub fn new(data_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn chembl_dir(&self) -> Utf8PathBuf {
        self.data_root.join("chembl")
    }

    pub fn database_path(&self) -> Utf8PathBuf {
        self.chembl_dir().join(DATABASE_FILE)
    }

    pub fn compounds_csv_path(&self) -> Utf8PathBuf {
        self.chembl_dir().join(COMPOUNDS_CSV)
    }

    pub fn images_root(&self) -> Utf8PathBuf {
        self.data_root.join("images")
    }

    pub fn compound_images_root(&self) -> Utf8PathBuf {
        self.images_root().join("compounds")
    }

    pub fn control_images_root(&self) -> Utf8PathBuf {
        self.images_root().join("controls")
    }

    pub fn compound_image_dir(&self, inchi_key: &InchiKey) -> Utf8PathBuf {
        self.compound_images_root().join(inchi_key.as_str())
    }

    pub fn control_image_dir(&self, source: &str, plate: &str) -> Utf8PathBuf {
        self.control_images_root().join(format!("{source}_{plate}"))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), DiliError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))
    }

    /// Temporary directory next to `dest`, to be published with
    /// [`Store::commit_dir`] once fully written.
    pub fn staging_dir(dest: &Utf8Path) -> Result<TempDir, DiliError> {
        let parent = dest
            .parent()
            .ok_or_else(|| DiliError::Filesystem("invalid destination path".to_string()))?;
        Self::ensure_dir(parent)?;
        Builder::new()
            .prefix(".dili-cp-staging")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| DiliError::Filesystem(err.to_string()))
    }

    pub fn commit_dir(staging: TempDir, dest: &Utf8Path) -> Result<(), DiliError> {
        let staged = staging.keep();
        atomic_rename_dir(&staged, dest.as_std_path())
            .map_err(|err| DiliError::Filesystem(format!("publish {dest}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DiliError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| DiliError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| DiliError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_csv<T: Serialize>(path: &Utf8Path, rows: &[T]) -> Result<(), DiliError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let content = writer
            .into_inner()
            .map_err(|err| DiliError::Csv(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("data");
        let key: InchiKey = "GLVAUDGFNGKCSF-UHFFFAOYSA-N".parse().unwrap();

        assert!(store.database_path().ends_with("chembl/dili.db"));
        assert!(
            store
                .compound_image_dir(&key)
                .ends_with("images/compounds/GLVAUDGFNGKCSF-UHFFFAOYSA-N")
        );
        assert!(
            store
                .control_image_dir("source_10", "Dest210809-134534")
                .ends_with("images/controls/source_10_Dest210809-134534")
        );
    }
}
