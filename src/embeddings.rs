//! Per-well image embeddings.
//!
//! Saved `.npy` channels are grouped by (well, site), cut into 256x256 tiles
//! and sent through the model one well at a time. The tile embeddings of a
//! well are averaged into a single feature vector.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{ArrayRef, Float32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use camino::{Utf8Path, Utf8PathBuf};
use ndarray::{Array1, Array2, Array4, ArrayView4, Axis, Ix2, s};
use parquet::arrow::ArrowWriter;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DiliError;
use crate::http::default_headers;
use crate::image_array::ImageArray;
use crate::store::Store;

pub const TILE_SIZE: usize = 256;
pub const TILE_COUNT: usize = 4;
pub const DEFAULT_FEATURE_COUNT: usize = 384;

/// Black-box inference: `(n, channels, 256, 256)` in, `(n, features)` out.
pub trait EmbeddingModel {
    fn feature_count(&self) -> usize;

    fn predict(&self, tiles: ArrayView4<'_, f32>) -> Result<Array2<f32>, DiliError>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    shape: &'a [usize],
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct PredictResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Model served over HTTP: POSTs `{shape, data}` with the tiles flattened in
/// row-major order and reads back `{embeddings}`.
#[derive(Clone)]
pub struct HttpEmbeddingModel {
    client: Client,
    url: String,
    feature_count: usize,
}

impl HttpEmbeddingModel {
    pub fn new(url: impl Into<String>, feature_count: usize) -> Result<Self, DiliError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| DiliError::ModelHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            feature_count,
        })
    }
}

impl EmbeddingModel for HttpEmbeddingModel {
    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn predict(&self, tiles: ArrayView4<'_, f32>) -> Result<Array2<f32>, DiliError> {
        let request = PredictRequest {
            shape: tiles.shape(),
            data: tiles.iter().copied().collect(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|err| DiliError::ModelHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(DiliError::ModelStatus {
                status: status.as_u16(),
                message,
            });
        }
        let body: PredictResponse = response.json().map_err(|err| DiliError::Schema {
            source_name: "inference".to_string(),
            message: err.to_string(),
        })?;
        embeddings_to_array(body.embeddings)
    }
}

fn embeddings_to_array(rows: Vec<Vec<f32>>) -> Result<Array2<f32>, DiliError> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let found = vec![rows.len(), width];
    if rows.iter().any(|row| row.len() != width) {
        return Err(DiliError::Schema {
            source_name: "inference".to_string(),
            message: format!("ragged embeddings, first row has {width} values"),
        });
    }
    let flat = rows.into_iter().flatten().collect::<Vec<_>>();
    Array2::from_shape_vec((found[0], found[1]), flat).map_err(|err| DiliError::Schema {
        source_name: "inference".to_string(),
        message: err.to_string(),
    })
}

/// A saved channel file and the fields encoded in its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageFile {
    pub plate: String,
    pub well: String,
    pub site: String,
    pub path: Utf8PathBuf,
}

impl ImageFile {
    /// Reads plate, well and site from the last four `_` fields of the stem.
    pub fn parse(path: &Utf8Path) -> Result<Self, DiliError> {
        let stem = path
            .file_stem()
            .ok_or_else(|| DiliError::Dataset(format!("file name missing: {path}")))?;
        let parts = stem.split('_').collect::<Vec<_>>();
        if parts.len() < 4 {
            return Err(DiliError::Dataset(format!("file name {stem} is invalid")));
        }
        let n = parts.len();
        Ok(Self {
            plate: parts[n - 4].to_string(),
            well: parts[n - 3].to_string(),
            site: parts[n - 2].to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// `.npy` files of one directory keyed by well, then site.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    wells: BTreeMap<String, BTreeMap<String, Vec<Utf8PathBuf>>>,
    channel_count: usize,
}

impl ImageDataset {
    pub fn scan(dir: &Utf8Path) -> Result<Self, DiliError> {
        if !dir.as_std_path().is_dir() {
            return Err(DiliError::InputNotFound(dir.to_string()));
        }
        let entries =
            fs::read_dir(dir.as_std_path()).map_err(|err| DiliError::Filesystem(err.to_string()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| DiliError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if path.extension() == Some("npy") {
                files.push(ImageFile::parse(&path)?);
            }
        }
        Self::from_files(files)
    }

    pub fn from_files(mut files: Vec<ImageFile>) -> Result<Self, DiliError> {
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut wells: BTreeMap<String, BTreeMap<String, Vec<Utf8PathBuf>>> = BTreeMap::new();
        let mut first_group = None;
        for file in files {
            if first_group.is_none() {
                first_group = Some((file.well.clone(), file.site.clone()));
            }
            wells
                .entry(file.well)
                .or_default()
                .entry(file.site)
                .or_default()
                .push(file.path);
        }

        let channel_count = match &first_group {
            Some((well, site)) => wells[well][site].len(),
            None => 0,
        };
        for (well, sites) in &wells {
            for (site, paths) in sites {
                if paths.len() != channel_count {
                    return Err(DiliError::Dataset(format!(
                        "well {well} site {site} has {} channels, expected {channel_count}",
                        paths.len()
                    )));
                }
            }
        }

        Ok(Self {
            wells,
            channel_count,
        })
    }

    pub fn well_count(&self) -> usize {
        self.wells.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn wells(&self) -> impl Iterator<Item = &str> {
        self.wells.keys().map(String::as_str)
    }

    pub fn sites(&self, well: &str) -> Option<&BTreeMap<String, Vec<Utf8PathBuf>>> {
        self.wells.get(well)
    }

    /// Loads a well as `(sites, channels, height, width)`.
    pub fn load_well(&self, well: &str) -> Result<Array4<f32>, DiliError> {
        let sites = self
            .wells
            .get(well)
            .ok_or_else(|| DiliError::Dataset(format!("unknown well {well}")))?;

        let mut planes = Vec::new();
        for paths in sites.values() {
            for path in paths {
                let plane = ImageArray::read(path.as_std_path())?
                    .to_f32()
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| DiliError::Dataset(format!("{path} is not a 2-D image")))?;
                planes.push(plane);
            }
        }
        let Some(first) = planes.first() else {
            return Err(DiliError::Dataset(format!("well {well} has no images")));
        };
        let (height, width) = first.dim();
        if planes.iter().any(|plane| plane.dim() != (height, width)) {
            return Err(DiliError::Dataset(format!(
                "images of well {well} differ in shape"
            )));
        }

        let mut stack = Array4::<f32>::zeros((sites.len(), self.channel_count, height, width));
        for (idx, plane) in planes.into_iter().enumerate() {
            let site = idx / self.channel_count;
            let channel = idx % self.channel_count;
            stack.slice_mut(s![site, channel, .., ..]).assign(&plane);
        }
        Ok(stack)
    }
}

/// Tile origins along one axis. The axis is cropped to the first
/// `TILE_COUNT * TILE_SIZE` pixels and stepped by
/// `max(1, (len - TILE_SIZE) / (TILE_COUNT - 1))`, keeping at most
/// [`TILE_COUNT`] origins.
pub fn tile_positions(len: usize) -> Result<Vec<usize>, DiliError> {
    if len < TILE_SIZE {
        return Err(DiliError::Dataset(format!(
            "image axis of {len} pixels is smaller than a {TILE_SIZE} tile"
        )));
    }
    let span = len.min(TILE_SIZE * TILE_COUNT) - TILE_SIZE;
    let stride = (span / (TILE_COUNT - 1)).max(1);
    Ok((0..=span).step_by(stride).take(TILE_COUNT).collect())
}

/// Cuts `(sites, channels, h, w)` into `(sites * tiles, channels, 256, 256)`.
pub fn tile_stack(stack: &Array4<f32>) -> Result<Array4<f32>, DiliError> {
    let (sites, channels, height, width) = stack.dim();
    let rows = tile_positions(height)?;
    let cols = tile_positions(width)?;
    let per_site = rows.len() * cols.len();

    let mut tiles = Array4::<f32>::zeros((sites * per_site, channels, TILE_SIZE, TILE_SIZE));
    let mut idx = 0;
    for site in 0..sites {
        for &y in &rows {
            for &x in &cols {
                tiles.slice_mut(s![idx, .., .., ..]).assign(&stack.slice(s![
                    site,
                    ..,
                    y..y + TILE_SIZE,
                    x..x + TILE_SIZE
                ]));
                idx += 1;
            }
        }
    }
    Ok(tiles)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRow {
    pub well_id: String,
    pub features: Vec<f32>,
}

pub struct EmbeddingGenerator<'a, M: EmbeddingModel> {
    model: &'a M,
}

impl<'a, M: EmbeddingModel> EmbeddingGenerator<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    pub fn generate(&self, dir: &Utf8Path) -> Result<Vec<EmbeddingRow>, DiliError> {
        let dataset = ImageDataset::scan(dir)?;
        self.generate_dataset(&dataset)
    }

    pub fn generate_dataset(&self, dataset: &ImageDataset) -> Result<Vec<EmbeddingRow>, DiliError> {
        let features = self.model.feature_count();
        let mut rows = Vec::with_capacity(dataset.well_count());
        for well in dataset.wells() {
            let tiles = tile_stack(&dataset.load_well(well)?)?;
            let count = tiles.len_of(Axis(0));
            debug!(%well, tiles = count, "running inference");

            let output = self.model.predict(tiles.view())?;
            if output.dim() != (count, features) {
                return Err(DiliError::ModelOutput {
                    rows: count,
                    features,
                    found: output.shape().to_vec(),
                });
            }
            let mean: Array1<f32> = output
                .mean_axis(Axis(0))
                .ok_or_else(|| DiliError::Dataset(format!("well {well} produced no tiles")))?;
            rows.push(EmbeddingRow {
                well_id: well.to_string(),
                features: mean.to_vec(),
            });
        }
        info!(wells = rows.len(), "embeddings generated");
        Ok(rows)
    }
}

/// Writes `well_id, feature_0 .. feature_{n-1}`; every row must have `n`
/// features.
pub fn write_parquet(
    rows: &[EmbeddingRow],
    feature_count: usize,
    path: &Utf8Path,
) -> Result<(), DiliError> {
    let mut fields = vec![Field::new("well_id", DataType::Utf8, false)];
    fields.extend(
        (0..feature_count)
            .map(|idx| Field::new(format!("feature_{idx}"), DataType::Float32, false)),
    );
    let schema = Arc::new(Schema::new(fields));

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(feature_count + 1);
    columns.push(Arc::new(StringArray::from(
        rows.iter().map(|row| row.well_id.as_str()).collect::<Vec<_>>(),
    )));
    for idx in 0..feature_count {
        let values = rows
            .iter()
            .map(|row| {
                row.features.get(idx).copied().ok_or_else(|| {
                    DiliError::Parquet(format!(
                        "well {} has {} features, expected {feature_count}",
                        row.well_id,
                        row.features.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        columns.push(Arc::new(Float32Array::from(values)));
    }
    let batch = RecordBatch::try_new(schema, columns)
        .map_err(|err| DiliError::Parquet(err.to_string()))?;

    let parent = path
        .parent()
        .ok_or_else(|| DiliError::Filesystem(format!("invalid output path {path}")))?;
    Store::ensure_dir(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent.as_std_path())
        .map_err(|err| DiliError::Filesystem(err.to_string()))?;
    let mut writer = ArrowWriter::try_new(file.as_file_mut(), batch.schema(), None)
        .map_err(|err| DiliError::Parquet(err.to_string()))?;
    writer
        .write(&batch)
        .map_err(|err| DiliError::Parquet(err.to_string()))?;
    writer
        .close()
        .map_err(|err| DiliError::Parquet(err.to_string()))?;
    file.persist(path.as_std_path())
        .map_err(|err| DiliError::Filesystem(err.to_string()))?;
    Ok(())
}
