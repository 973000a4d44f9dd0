use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::acquire::{AcquireReport, AcquireSettings, ImageAcquirer, read_meta, unique_wells};
use crate::chembl::ChemblApi;
use crate::collect::{ActivityCollection, ActivityCollector, CompoundCollection, CompoundCollector};
use crate::database::{ACTIVITIES_TABLE, COMPOUNDS_TABLE, Database, StoredCompound};
use crate::domain::InchiKey;
use crate::embeddings::{EmbeddingGenerator, EmbeddingModel, write_parquet};
use crate::error::DiliError;
use crate::imaging::{ImageSource, LocationIndex};
use crate::reference::read_reference;
use crate::store::{EMBEDDINGS_FILE, Store};

#[derive(Debug, Clone, Serialize)]
pub struct CompoundsResult {
    pub reference_rows: usize,
    pub collection: CompoundCollection,
    pub database: String,
    pub csv: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivitiesResult {
    pub collection: ActivityCollection,
    pub stored_rows: usize,
    pub database: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagesResult {
    pub compounds: Vec<AcquireReport>,
    pub controls: Vec<AcquireReport>,
    pub skipped_keys: Vec<String>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedResult {
    pub outputs: Vec<EmbedOutput>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedOutput {
    pub directory: String,
    pub output: String,
    pub wells: usize,
    pub features: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub step: Option<(usize, usize)>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
        }
    }

    pub fn step(current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: Some((current, total)),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Runs the pipeline stages against one data directory. Every stage reads
/// its input from files or the database written by the previous one.
pub struct App<C: ChemblApi, L: LocationIndex, S: ImageSource> {
    store: Store,
    chembl: C,
    index: L,
    images: S,
}

impl<C: ChemblApi, L: LocationIndex, S: ImageSource> App<C, L, S> {
    pub fn new(store: Store, chembl: C, index: L, images: S) -> Self {
        Self {
            store,
            chembl,
            index,
            images,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reads the reference spreadsheet, collects matching molecules into the
    /// database and exports the merged table as CSV.
    pub fn collect_compounds(
        &self,
        reference_path: &Utf8Path,
        sheet: &str,
        sink: &dyn ProgressSink,
    ) -> Result<CompoundsResult, DiliError> {
        sink.event(ProgressEvent::message(format!(
            "reading reference sheet {sheet} from {reference_path}"
        )));
        let references = read_reference(reference_path.as_std_path(), sheet)?;

        let database_path = self.store.database_path();
        let mut db = Database::open(database_path.as_std_path())?;
        let collection =
            CompoundCollector::new(&self.chembl).collect(&references, &mut db, sink)?;

        let csv_path = self.store.compounds_csv_path();
        let rows = db.compound_rows()?;
        Store::write_csv(&csv_path, &rows)?;
        db.close()?;
        info!(rows = rows.len(), csv = %csv_path, "compounds exported");

        Ok(CompoundsResult {
            reference_rows: references.len(),
            collection,
            database: database_path.to_string(),
            csv: csv_path.to_string(),
            finished_at: timestamp(),
        })
    }

    /// Fetches activities for every ChEMBL id stored by [`App::collect_compounds`].
    pub fn collect_activities(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<ActivitiesResult, DiliError> {
        let database_path = self.store.database_path();
        if !database_path.as_std_path().exists() {
            return Err(DiliError::InputNotFound(database_path.to_string()));
        }
        let mut db = Database::open(database_path.as_std_path())?;
        if !db.table_exists(COMPOUNDS_TABLE)? {
            return Err(DiliError::InputNotFound(format!(
                "{COMPOUNDS_TABLE} table in {database_path}"
            )));
        }
        let ids = db.compound_chembl_ids()?;
        sink.event(ProgressEvent::message(format!(
            "fetching activities for {} compounds",
            ids.len()
        )));
        let collection = ActivityCollector::new(&self.chembl).collect(ids, &mut db, sink)?;
        let stored_rows = if db.table_exists(ACTIVITIES_TABLE)? {
            db.row_count(ACTIVITIES_TABLE)?
        } else {
            0
        };
        db.close()?;

        Ok(ActivitiesResult {
            collection,
            stored_rows,
            database: database_path.to_string(),
            finished_at: timestamp(),
        })
    }

    /// Downloads images for the compounds of the exported CSV (or `compounds`
    /// when given), then the negative controls of every plate they were seen
    /// on.
    pub fn acquire_images(
        &self,
        compounds: Option<&Utf8Path>,
        limit: Option<usize>,
        settings: AcquireSettings,
        sink: &dyn ProgressSink,
    ) -> Result<ImagesResult, DiliError> {
        let csv_path = compounds
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| self.store.compounds_csv_path());
        let (mut keys, skipped_keys) = read_inchi_keys(&csv_path)?;
        if let Some(limit) = limit {
            keys.truncate(limit);
        }

        let acquirer = ImageAcquirer::new(&self.index, &self.images, &self.store, settings);
        let total = keys.len();
        let mut compound_reports = Vec::with_capacity(total);
        let mut control_reports = Vec::new();
        for (idx, key) in keys.iter().enumerate() {
            let (report, locations) = acquirer.download_compound(key)?;
            sink.event(ProgressEvent::step(
                idx + 1,
                total,
                format!("{key}: {} ({} images)", report.action, report.saved),
            ));
            compound_reports.push(report);
            control_reports.extend(acquirer.download_controls(&locations)?);
        }

        Ok(ImagesResult {
            compounds: compound_reports,
            controls: control_reports,
            skipped_keys,
            finished_at: timestamp(),
        })
    }

    /// Downloads negative controls for the plates listed in a `meta.csv`.
    pub fn acquire_controls(
        &self,
        meta: &Utf8Path,
        settings: AcquireSettings,
        sink: &dyn ProgressSink,
    ) -> Result<ImagesResult, DiliError> {
        let locations = unique_wells(read_meta(meta)?.iter().map(|row| row.location()).collect());
        sink.event(ProgressEvent::message(format!(
            "downloading controls for {} wells listed in {meta}",
            locations.len()
        )));
        let acquirer = ImageAcquirer::new(&self.index, &self.images, &self.store, settings);
        let controls = acquirer.download_controls(&locations)?;

        Ok(ImagesResult {
            compounds: Vec::new(),
            controls,
            skipped_keys: Vec::new(),
            finished_at: timestamp(),
        })
    }

    /// Embeds every subdirectory of `dir` that holds `.npy` files, or `dir`
    /// itself when it holds them directly. `output` names the Parquet file
    /// and is only accepted for a single image directory.
    pub fn embed<M: EmbeddingModel>(
        &self,
        dir: &Utf8Path,
        output: Option<&Utf8Path>,
        model: &M,
        sink: &dyn ProgressSink,
    ) -> Result<EmbedResult, DiliError> {
        let targets = image_directories(dir)?;
        if targets.is_empty() {
            return Err(DiliError::InputNotFound(format!("no .npy files under {dir}")));
        }
        if output.is_some() && targets.len() > 1 {
            return Err(DiliError::InvalidConfig(format!(
                "--output needs a single image directory, {dir} has {}",
                targets.len()
            )));
        }

        let generator = EmbeddingGenerator::new(model);
        let total = targets.len();
        let mut outputs = Vec::with_capacity(total);
        for (idx, target) in targets.iter().enumerate() {
            let rows = generator.generate(target)?;
            let path = output
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| target.join(EMBEDDINGS_FILE));
            write_parquet(&rows, model.feature_count(), &path)?;
            sink.event(ProgressEvent::step(
                idx + 1,
                total,
                format!("{target}: {} wells", rows.len()),
            ));
            outputs.push(EmbedOutput {
                directory: target.to_string(),
                output: path.to_string(),
                wells: rows.len(),
                features: model.feature_count(),
            });
        }

        Ok(EmbedResult {
            outputs,
            finished_at: timestamp(),
        })
    }
}

/// Distinct InChI keys of an exported compounds CSV in file order, and the
/// values that failed to parse.
pub fn read_inchi_keys(path: &Utf8Path) -> Result<(Vec<InchiKey>, Vec<String>), DiliError> {
    if !path.as_std_path().exists() {
        return Err(DiliError::InputNotFound(path.to_string()));
    }
    let content =
        fs::read(path.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))?;
    let mut reader = csv::Reader::from_reader(content.as_slice());

    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    let mut skipped = Vec::new();
    for row in reader.deserialize::<StoredCompound>() {
        let Some(raw) = row?.inchi_key else {
            continue;
        };
        match raw.parse::<InchiKey>() {
            Ok(key) => {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            Err(err) => {
                warn!(value = %raw, error = %err, "skipping invalid InChI key");
                skipped.push(raw);
            }
        }
    }
    Ok((keys, skipped))
}

fn image_directories(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DiliError> {
    if !dir.as_std_path().is_dir() {
        return Err(DiliError::InputNotFound(dir.to_string()));
    }
    if contains_npy(dir)? {
        return Ok(vec![dir.to_path_buf()]);
    }
    let mut targets = Vec::new();
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| DiliError::Filesystem(err.to_string()))?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if path.as_std_path().is_dir() && contains_npy(&path)? {
            targets.push(path);
        }
    }
    targets.sort();
    Ok(targets)
}

fn contains_npy(dir: &Utf8Path) -> Result<bool, DiliError> {
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| DiliError::Filesystem(err.to_string()))?;
        if entry.path().extension().is_some_and(|ext| ext == "npy") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
