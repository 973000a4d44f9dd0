//! Downloaded image arrays and their validation.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyExt, write_npy};
use serde::{Deserialize, Serialize};

use crate::error::DiliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDtype {
    U8,
    U16,
    F32,
    F64,
}

impl fmt::Display for ImageDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageDtype::U8 => write!(f, "u8"),
            ImageDtype::U16 => write!(f, "u16"),
            ImageDtype::F32 => write!(f, "f32"),
            ImageDtype::F64 => write!(f, "f64"),
        }
    }
}

/// An n-dimensional array tagged with the element type it was stored with.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageArray {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl ImageArray {
    /// Decodes `.npy` bytes, trying each supported element type in turn.
    pub fn from_npy_bytes(bytes: &[u8]) -> Result<Self, DiliError> {
        if let Ok(array) = ArrayD::<u16>::read_npy(Cursor::new(bytes)) {
            return Ok(ImageArray::U16(array));
        }
        if let Ok(array) = ArrayD::<u8>::read_npy(Cursor::new(bytes)) {
            return Ok(ImageArray::U8(array));
        }
        if let Ok(array) = ArrayD::<f32>::read_npy(Cursor::new(bytes)) {
            return Ok(ImageArray::F32(array));
        }
        ArrayD::<f64>::read_npy(Cursor::new(bytes))
            .map(ImageArray::F64)
            .map_err(|err| DiliError::Npy(err.to_string()))
    }

    pub fn read(path: &Path) -> Result<Self, DiliError> {
        let bytes = std::fs::read(path)
            .map_err(|err| DiliError::Filesystem(format!("read {}: {err}", path.display())))?;
        Self::from_npy_bytes(&bytes)
            .map_err(|err| DiliError::Npy(format!("{}: {err}", path.display())))
    }

    pub fn write(&self, path: &Path) -> Result<(), DiliError> {
        let result = match self {
            ImageArray::U8(array) => write_npy(path, array),
            ImageArray::U16(array) => write_npy(path, array),
            ImageArray::F32(array) => write_npy(path, array),
            ImageArray::F64(array) => write_npy(path, array),
        };
        result.map_err(|err| DiliError::Npy(format!("{}: {err}", path.display())))
    }

    pub fn dtype(&self) -> ImageDtype {
        match self {
            ImageArray::U8(_) => ImageDtype::U8,
            ImageArray::U16(_) => ImageDtype::U16,
            ImageArray::F32(_) => ImageDtype::F32,
            ImageArray::F64(_) => ImageDtype::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            ImageArray::U8(array) => array.shape(),
            ImageArray::U16(array) => array.shape(),
            ImageArray::F32(array) => array.shape(),
            ImageArray::F64(array) => array.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_non_finite(&self) -> bool {
        match self {
            ImageArray::U8(_) | ImageArray::U16(_) => false,
            ImageArray::F32(array) => array.iter().any(|value| !value.is_finite()),
            ImageArray::F64(array) => array.iter().any(|value| !value.is_finite()),
        }
    }

    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            ImageArray::U8(array) => array.mapv(f32::from),
            ImageArray::U16(array) => array.mapv(f32::from),
            ImageArray::F32(array) => array.clone(),
            ImageArray::F64(array) => array.mapv(|value| value as f32),
        }
    }
}

/// What a downloaded array must look like. `None` fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArraySpec {
    pub dtype: Option<ImageDtype>,
    pub shape: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidImage {
    Empty,
    NonFinite,
    WrongDtype {
        expected: ImageDtype,
        found: ImageDtype,
    },
    WrongShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl fmt::Display for InvalidImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidImage::Empty => write!(f, "array is empty"),
            InvalidImage::NonFinite => write!(f, "array contains NaN or infinite values"),
            InvalidImage::WrongDtype { expected, found } => {
                write!(f, "expected dtype {expected}, found {found}")
            }
            InvalidImage::WrongShape { expected, found } => {
                write!(f, "expected shape {expected:?}, found {found:?}")
            }
        }
    }
}

pub fn validate(image: &ImageArray, spec: &ArraySpec) -> Result<(), InvalidImage> {
    if image.is_empty() {
        return Err(InvalidImage::Empty);
    }
    if let Some(expected) = spec.dtype {
        let found = image.dtype();
        if found != expected {
            return Err(InvalidImage::WrongDtype { expected, found });
        }
    }
    if let Some(expected) = &spec.shape {
        if image.shape() != expected.as_slice() {
            return Err(InvalidImage::WrongShape {
                expected: expected.clone(),
                found: image.shape().to_vec(),
            });
        }
    }
    if image.has_non_finite() {
        return Err(InvalidImage::NonFinite);
    }
    Ok(())
}
