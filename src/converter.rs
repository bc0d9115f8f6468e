//! Conversion between linear NCHW data and the default packed image layout.
//!
//! An element at `(n, c, h, w)` lives in texel `((c / 4) * W + w, n * H + h)`, lane `c % 4`.
//! Lanes past the last channel are zero.
use half::f16;
use itertools::iproduct;
use thiserror::Error;

use crate::{
    num::{CoHom, Float, Zero},
    tensor::{ImageShape, Shape},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("data size not match: expected {expected}, got {actual}")]
    Size { expected: usize, actual: usize },
    #[error("image {image} holds {actual} lanes, but {shape} packs into {expected}")]
    Production {
        shape: Shape,
        image: ImageShape,
        expected: usize,
        actual: usize,
    },
    #[error("image shape not match: expected {expected}, got {actual}")]
    ImageShape {
        expected: ImageShape,
        actual: ImageShape,
    },
    #[error("row pitch {pitch} is smaller than a {width}-texel row or not texel aligned")]
    RowPitch { pitch: usize, width: usize },
    #[error("slice pitch {pitch} cannot hold {rows} rows of pitch {row_pitch}")]
    SlicePitch {
        pitch: usize,
        rows: usize,
        row_pitch: usize,
    },
}

/// Location of one logical element inside a packed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelCoord {
    pub x: usize,
    pub y: usize,
    pub lane: usize,
}

impl TexelCoord {
    #[inline]
    pub fn new(shape: Shape, n: usize, c: usize, h: usize, w: usize) -> Self {
        Self {
            x: (c / 4) * shape.w() + w,
            y: n * shape.h() + h,
            lane: c % 4,
        }
    }

    /// Index of this lane in a tightly packed RGBA buffer of the given image.
    #[inline]
    pub fn offset(&self, image: ImageShape) -> usize {
        (self.y * image.width + self.x) * 4 + self.lane
    }
}

fn check_production(shape: Shape, image: ImageShape) -> Result<(), LayoutError> {
    let packed = ImageShape::from(shape);
    let expected = packed.lanes();
    let actual = image.lanes();
    if expected != actual {
        return Err(LayoutError::Production {
            shape,
            image,
            expected,
            actual,
        });
    }
    // equal lane counts can still disagree on the row width
    match packed == image {
        true => Ok(()),
        false => Err(LayoutError::ImageShape {
            expected: packed,
            actual: image,
        }),
    }
}

/// Pack linear NCHW `data` into a tightly packed fp16 RGBA image.
pub fn to_image<T: Float>(data: &[T], shape: Shape) -> Result<Vec<f16>, LayoutError> {
    if data.len() != shape.len() {
        return Err(LayoutError::Size {
            expected: shape.len(),
            actual: data.len(),
        });
    }

    let image = ImageShape::from(shape);
    let mut output = vec![f16::zero(); image.lanes()];

    let coords = iproduct!(0..shape.n(), 0..shape.c(), 0..shape.h(), 0..shape.w());
    for (&value, (n, c, h, w)) in data.iter().zip(coords) {
        let offset = TexelCoord::new(shape, n, c, h, w).offset(image);
        output[offset] = f16::co_hom(value);
    }
    Ok(output)
}

/// Unpack a tightly packed fp16 RGBA image into linear NCHW data, dropping spare lanes.
pub fn from_image<T: Float>(
    data: &[f16],
    image: ImageShape,
    shape: Shape,
) -> Result<Vec<T>, LayoutError> {
    check_production(shape, image)?;
    if data.len() != image.lanes() {
        return Err(LayoutError::Size {
            expected: image.lanes(),
            actual: data.len(),
        });
    }

    let output = iproduct!(0..shape.n(), 0..shape.c(), 0..shape.h(), 0..shape.w())
        .map(|(n, c, h, w)| TexelCoord::new(shape, n, c, h, w).offset(image))
        .map(|offset| T::co_hom(data[offset]))
        .collect();
    Ok(output)
}
