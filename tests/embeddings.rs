use std::fs::File;
use std::sync::Mutex;

use arrow_array::{Float32Array, StringArray};
use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use ndarray::{Array2, ArrayD, ArrayView4, Axis, IxDyn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use dili_cellpaint::embeddings::{
    EmbeddingGenerator, EmbeddingModel, EmbeddingRow, ImageDataset, TILE_SIZE, tile_stack,
    write_parquet,
};
use dili_cellpaint::error::DiliError;
use dili_cellpaint::image_array::ImageArray;

/// Every feature of a tile is the mean pixel value of that tile.
struct MeanModel {
    features: usize,
    batches: Mutex<Vec<Vec<usize>>>,
}

impl MeanModel {
    fn new(features: usize) -> Self {
        Self {
            features,
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl EmbeddingModel for MeanModel {
    fn feature_count(&self) -> usize {
        self.features
    }

    fn predict(&self, tiles: ArrayView4<'_, f32>) -> Result<Array2<f32>, DiliError> {
        self.batches.lock().unwrap().push(tiles.shape().to_vec());
        let count = tiles.len_of(Axis(0));
        let mut out = Array2::zeros((count, self.features));
        for (idx, tile) in tiles.outer_iter().enumerate() {
            let mean = tile.mean().unwrap();
            out.row_mut(idx).fill(mean);
        }
        Ok(out)
    }
}

/// Returns one row too few.
struct ShortModel;

impl EmbeddingModel for ShortModel {
    fn feature_count(&self) -> usize {
        4
    }

    fn predict(&self, tiles: ArrayView4<'_, f32>) -> Result<Array2<f32>, DiliError> {
        Ok(Array2::zeros((tiles.len_of(Axis(0)) - 1, 4)))
    }
}

fn utf8(tmp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap()
}

fn save(
    dir: &Utf8Path,
    index: usize,
    well: &str,
    site: &str,
    channel: &str,
    value: u16,
    size: usize,
) {
    let name = format!("{index:05}_source_10_P1_{well}_{site}_{channel}.npy");
    ImageArray::U16(ArrayD::from_elem(IxDyn(&[size, size]), value))
        .write(dir.join(name).as_std_path())
        .unwrap();
}

/// Two wells, two sites, three channels; every pixel of a well holds the
/// same value.
fn write_wells(dir: &Utf8Path, size: usize) {
    let mut index = 0;
    for (well, value) in [("A01", 10u16), ("B02", 20u16)] {
        for site in ["1", "2"] {
            for channel in ["DNA", "AGP", "Mito"] {
                save(dir, index, well, site, channel, value, size);
                index += 1;
            }
        }
    }
}

#[test]
fn wells_are_tiled_and_averaged() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    write_wells(&dir, 512);
    let model = MeanModel::new(5);

    let rows = EmbeddingGenerator::new(&model).generate(&dir).unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].well_id, "A01");
    assert_eq!(rows[0].features, vec![10.0; 5]);
    assert_eq!(rows[1].well_id, "B02");
    assert_eq!(rows[1].features, vec![20.0; 5]);
    assert_eq!(
        *model.batches.lock().unwrap(),
        vec![vec![32, 3, TILE_SIZE, TILE_SIZE]; 2]
    );
}

#[test]
fn large_images_use_at_most_four_tiles_per_axis() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    save(&dir, 0, "C03", "1", "DNA", 7, 1080);
    let model = MeanModel::new(2);

    let rows = EmbeddingGenerator::new(&model).generate(&dir).unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        *model.batches.lock().unwrap(),
        vec![vec![16, 1, TILE_SIZE, TILE_SIZE]]
    );
}

#[test]
fn tiles_follow_site_then_row_then_column() {
    let mut stack = ndarray::Array4::<f32>::zeros((2, 1, 1024, 1024));
    stack.slice_mut(ndarray::s![0, 0, 256..512, ..256]).fill(3.0);
    stack.slice_mut(ndarray::s![1, 0, ..256, ..256]).fill(5.0);

    let tiles = tile_stack(&stack).unwrap();

    assert_eq!(tiles.shape(), &[32, 1, 256, 256]);
    assert_eq!(tiles[[0, 0, 0, 0]], 0.0);
    assert_eq!(tiles[[1, 0, 0, 0]], 0.0);
    assert_eq!(tiles[[4, 0, 0, 0]], 3.0);
    assert_eq!(tiles[[16, 0, 0, 0]], 5.0);
    assert_eq!(tiles[[17, 0, 0, 0]], 0.0);
}

#[test]
fn dataset_groups_files_by_well_and_site() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    write_wells(&dir, 256);
    std::fs::write(dir.join("meta.csv").as_std_path(), "file\n").unwrap();

    let dataset = ImageDataset::scan(&dir).unwrap();

    assert_eq!(dataset.well_count(), 2);
    assert_eq!(dataset.channel_count(), 3);
    assert_eq!(dataset.wells().collect::<Vec<_>>(), vec!["A01", "B02"]);
    let sites = dataset.sites("A01").unwrap();
    assert_eq!(sites.keys().collect::<Vec<_>>(), vec!["1", "2"]);
    assert!(sites["1"][0].as_str().ends_with("_DNA.npy"));
    assert_eq!(dataset.load_well("B02").unwrap().shape(), &[2, 3, 256, 256]);
}

#[test]
fn channel_count_must_match_across_groups() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    write_wells(&dir, 256);
    std::fs::remove_file(dir.join("00011_source_10_P1_B02_2_Mito.npy").as_std_path()).unwrap();

    assert_matches!(ImageDataset::scan(&dir), Err(DiliError::Dataset(_)));
}

#[test]
fn images_smaller_than_a_tile_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    save(&dir, 0, "A01", "1", "DNA", 1, 128);
    let model = MeanModel::new(2);

    let result = EmbeddingGenerator::new(&model).generate(&dir);
    assert_matches!(result, Err(DiliError::Dataset(_)));
}

#[test]
fn wrong_model_output_shape_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp);
    write_wells(&dir, 256);

    let result = EmbeddingGenerator::new(&ShortModel).generate(&dir);
    assert_matches!(
        result,
        Err(DiliError::ModelOutput {
            rows: 2,
            features: 4,
            ..
        })
    );
}

#[test]
fn missing_directory_is_input_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8(&tmp).join("absent");
    assert_matches!(ImageDataset::scan(&dir), Err(DiliError::InputNotFound(_)));
}

#[test]
fn parquet_has_well_id_and_numbered_features() {
    let tmp = tempfile::tempdir().unwrap();
    let path = utf8(&tmp).join("out").join("embeddings.parquet");
    let rows = vec![
        EmbeddingRow {
            well_id: "A01".to_string(),
            features: vec![0.5, 1.5, 2.5],
        },
        EmbeddingRow {
            well_id: "B02".to_string(),
            features: vec![3.0, 4.0, 5.0],
        },
    ];

    write_parquet(&rows, 3, &path).unwrap();

    let file = File::open(path.as_std_path()).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];

    let names = batch
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["well_id", "feature_0", "feature_1", "feature_2"]);

    let wells = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(wells.value(0), "A01");
    assert_eq!(wells.value(1), "B02");
    let last = batch
        .column(3)
        .as_any()
        .downcast_ref::<Float32Array>()
        .unwrap();
    assert_eq!(last.values().to_vec(), vec![2.5, 5.0]);
}

#[test]
fn parquet_rejects_short_feature_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let path = utf8(&tmp).join("embeddings.parquet");
    let rows = vec![EmbeddingRow {
        well_id: "A01".to_string(),
        features: vec![1.0],
    }];

    assert_matches!(write_parquet(&rows, 2, &path), Err(DiliError::Parquet(_)));
    assert!(!path.as_std_path().exists());
}
