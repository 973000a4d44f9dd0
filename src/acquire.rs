//! Downloads Cell Painting images for compounds and their negative-control
//! plates.
//!
//! Every target directory is written through a staging directory and only
//! published once complete, so an existing directory means the work is done.
//! A target whose location lookup was interrupted is never published.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::Utf8Path;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ImagingSettings;
use crate::domain::InchiKey;
use crate::error::DiliError;
use crate::image_array::{ArraySpec, validate};
use crate::imaging::{ImageSource, LocationIndex, WellLocation};
use crate::store::{META_FILE, Store};

#[derive(Debug, Clone)]
pub struct AcquireSettings {
    pub channels: Vec<String>,
    pub sites: Vec<String>,
    pub spec: ArraySpec,
    pub control_sample_size: usize,
    pub seed: u64,
}

impl From<&ImagingSettings> for AcquireSettings {
    fn from(settings: &ImagingSettings) -> Self {
        Self {
            channels: settings.channels.clone(),
            sites: settings.sites.clone(),
            spec: ArraySpec {
                dtype: settings.expected_dtype,
                shape: settings.expected_shape.clone(),
            },
            control_sample_size: settings.control_sample_size,
            seed: settings.seed,
        }
    }
}

/// One row of `meta.csv`: a saved file and where it was imaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetaRow {
    pub file: String,
    #[serde(rename = "Metadata_Source")]
    pub source: String,
    #[serde(rename = "Metadata_Batch")]
    pub batch: String,
    #[serde(rename = "Metadata_Plate")]
    pub plate: String,
    #[serde(rename = "Metadata_Well")]
    pub well: String,
    pub site: String,
    pub channel: String,
    pub dtype: String,
    pub shape: String,
}

impl ImageMetaRow {
    pub fn location(&self) -> WellLocation {
        WellLocation {
            source: self.source.clone(),
            batch: self.batch.clone(),
            plate: self.plate.clone(),
            well: self.well.clone(),
            jcp_id: None,
            inchi_key: None,
            control_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquireReport {
    pub target: String,
    pub directory: String,
    pub action: String,
    pub locations: usize,
    pub saved: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl AcquireReport {
    fn skipped(target: &str, directory: &Utf8Path) -> Self {
        Self::unsaved(target, directory, "skipped", 0)
    }

    fn interrupted(target: &str, directory: &Utf8Path, locations: usize) -> Self {
        Self::unsaved(target, directory, "interrupted", locations)
    }

    fn unsaved(target: &str, directory: &Utf8Path, action: &str, locations: usize) -> Self {
        Self {
            target: target.to_string(),
            directory: directory.to_string(),
            action: action.to_string(),
            locations,
            saved: 0,
            rejected: 0,
            failed: 0,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.action == "interrupted"
    }
}

#[derive(Debug, Default)]
struct DownloadTally {
    rows: Vec<ImageMetaRow>,
    rejected: usize,
    failed: usize,
}

pub struct ImageAcquirer<'a, L: LocationIndex, S: ImageSource> {
    index: &'a L,
    source: &'a S,
    store: &'a Store,
    settings: AcquireSettings,
}

impl<'a, L: LocationIndex, S: ImageSource> ImageAcquirer<'a, L, S> {
    pub fn new(index: &'a L, source: &'a S, store: &'a Store, settings: AcquireSettings) -> Self {
        Self {
            index,
            source,
            store,
            settings,
        }
    }

    /// Downloads every well of a compound. Returns the report and the
    /// compound's well locations, read back from `meta.csv` when the
    /// directory already existed. An interrupted lookup yields no locations
    /// and leaves the directory absent for the next run.
    pub fn download_compound(
        &self,
        inchi_key: &InchiKey,
    ) -> Result<(AcquireReport, Vec<WellLocation>), DiliError> {
        let dir = self.store.compound_image_dir(inchi_key);
        if dir.as_std_path().exists() {
            info!(%inchi_key, directory = %dir, "images already downloaded, skipping");
            let locations = read_meta(&dir.join(META_FILE))?
                .iter()
                .map(ImageMetaRow::location)
                .collect::<Vec<_>>();
            return Ok((
                AcquireReport::skipped(inchi_key.as_str(), &dir),
                unique_wells(locations),
            ));
        }

        let outcome = self.index.locations_for_compound(inchi_key)?;
        if outcome.interrupted {
            warn!(
                %inchi_key,
                found = outcome.items.len(),
                "location lookup interrupted, not saving"
            );
            return Ok((
                AcquireReport::interrupted(inchi_key.as_str(), &dir, outcome.items.len()),
                Vec::new(),
            ));
        }
        let locations = unique_wells(outcome.items);
        let report = self.download_into(inchi_key.as_str(), &dir, &locations)?;
        Ok((report, locations))
    }

    /// Samples negative-control wells for every distinct (source, plate) in
    /// `locations` and downloads them. Plates with an existing directory are
    /// skipped.
    pub fn download_controls(
        &self,
        locations: &[WellLocation],
    ) -> Result<Vec<AcquireReport>, DiliError> {
        let plates = locations
            .iter()
            .map(WellLocation::plate_key)
            .collect::<BTreeSet<_>>();

        let mut reports = Vec::new();
        for (source, plate) in plates {
            let target = format!("{source}_{plate}");
            let dir = self.store.control_image_dir(source, plate);
            if dir.as_std_path().exists() {
                info!(%target, directory = %dir, "control images already downloaded, skipping");
                reports.push(AcquireReport::skipped(&target, &dir));
                continue;
            }
            let outcome = self.index.negative_controls(source, plate)?;
            if outcome.interrupted {
                warn!(
                    %target,
                    found = outcome.items.len(),
                    "control lookup interrupted, not saving"
                );
                reports.push(AcquireReport::interrupted(&target, &dir, outcome.items.len()));
                continue;
            }
            let sampled = sample_wells(
                unique_wells(outcome.items),
                self.settings.control_sample_size,
                self.settings.seed,
            );
            reports.push(self.download_into(&target, &dir, &sampled)?);
        }
        Ok(reports)
    }

    fn download_into(
        &self,
        target: &str,
        dir: &Utf8Path,
        locations: &[WellLocation],
    ) -> Result<AcquireReport, DiliError> {
        let staging = Store::staging_dir(dir)?;
        let staging_path = Utf8Path::from_path(staging.path())
            .ok_or_else(|| DiliError::Filesystem("non-utf8 staging path".to_string()))?
            .to_path_buf();

        let tally = self.download_locations(&staging_path, locations)?;
        Store::write_csv(&staging_path.join(META_FILE), &tally.rows)?;
        Store::commit_dir(staging, dir)?;

        info!(
            %target,
            saved = tally.rows.len(),
            rejected = tally.rejected,
            failed = tally.failed,
            "images stored"
        );
        Ok(AcquireReport {
            target: target.to_string(),
            directory: dir.to_string(),
            action: "download".to_string(),
            locations: locations.len(),
            saved: tally.rows.len(),
            rejected: tally.rejected,
            failed: tally.failed,
        })
    }

    fn download_locations(
        &self,
        dir: &Utf8Path,
        locations: &[WellLocation],
    ) -> Result<DownloadTally, DiliError> {
        let mut tally = DownloadTally::default();
        for location in locations {
            for site in &self.settings.sites {
                for channel in &self.settings.channels {
                    let image = match self.source.fetch_image(location, site, channel) {
                        Ok(image) => image,
                        Err(err) => {
                            warn!(
                                plate = %location.plate,
                                well = %location.well,
                                %site,
                                %channel,
                                error = %err,
                                "image download failed, skipping"
                            );
                            tally.failed += 1;
                            continue;
                        }
                    };
                    if let Err(reason) = validate(&image, &self.settings.spec) {
                        warn!(
                            plate = %location.plate,
                            well = %location.well,
                            %site,
                            %channel,
                            %reason,
                            "invalid image, skipping"
                        );
                        tally.rejected += 1;
                        continue;
                    }

                    let file = image_file_name(tally.rows.len(), location, site, channel);
                    image.write(dir.join(&file).as_std_path())?;
                    tally.rows.push(ImageMetaRow {
                        file,
                        source: location.source.clone(),
                        batch: location.batch.clone(),
                        plate: location.plate.clone(),
                        well: location.well.clone(),
                        site: site.clone(),
                        channel: channel.clone(),
                        dtype: image.dtype().to_string(),
                        shape: image
                            .shape()
                            .iter()
                            .map(|dim| dim.to_string())
                            .collect::<Vec<_>>()
                            .join("x"),
                    });
                }
            }
        }
        Ok(tally)
    }
}

/// `<n>_<source>_<plate>_<well>_<site>_<channel>.npy`; the embedding step
/// reads plate, well and site back from the trailing fields.
pub fn image_file_name(index: usize, location: &WellLocation, site: &str, channel: &str) -> String {
    format!(
        "{index:05}_{}_{}_{}_{site}_{channel}.npy",
        location.source, location.plate, location.well
    )
}

pub fn read_meta(path: &Utf8Path) -> Result<Vec<ImageMetaRow>, DiliError> {
    if !path.as_std_path().exists() {
        return Err(DiliError::InputNotFound(path.to_string()));
    }
    let content =
        fs::read(path.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))?;
    let mut reader = csv::Reader::from_reader(content.as_slice());
    let rows = reader
        .deserialize::<ImageMetaRow>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// De-duplicates on (source, batch, plate, well), keeping the first record.
pub fn unique_wells(locations: Vec<WellLocation>) -> Vec<WellLocation> {
    let mut seen = BTreeMap::new();
    for location in locations {
        let key = (
            location.source.clone(),
            location.batch.clone(),
            location.plate.clone(),
            location.well.clone(),
        );
        seen.entry(key).or_insert(location);
    }
    seen.into_values().collect()
}

/// At most `cap` wells, chosen with a seeded RNG and returned sorted.
pub fn sample_wells(wells: Vec<WellLocation>, cap: usize, seed: u64) -> Vec<WellLocation> {
    if wells.len() <= cap {
        return wells;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sampled = wells
        .choose_multiple(&mut rng, cap)
        .cloned()
        .collect::<Vec<_>>();
    sampled.sort();
    sampled
}
