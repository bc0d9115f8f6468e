use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_unshuffle_derive::{Deref, DerefMut};

pub trait IntoBytes {
    fn into_bytes(self) -> Vec<u8>;
}

/// One of the four logical axes of an NCHW tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    N,
    C,
    H,
    W,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::N, Axis::C, Axis::H, Axis::W];

    pub fn index(self) -> usize {
        match self {
            Axis::N => 0,
            Axis::C => 1,
            Axis::H => 2,
            Axis::W => 3,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::N => "N",
            Axis::C => "C",
            Axis::H => "H",
            Axis::W => "W",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("expected a rank-4 (NCHW) tensor, got rank {0}")]
    Rank(usize),
    #[error("dimension {0} must be at least 1")]
    Empty(Axis),
    #[error("downscale factor must be at least 1, got {0}")]
    DownscaleFactor(i64),
    #[error("dimension {axis} of size {size} is not divisible by downscale factor {factor}")]
    Indivisible {
        axis: Axis,
        size: usize,
        factor: usize,
    },
    #[error("output shape mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: Shape, actual: Shape },
}

/// Free-rank dimensions as carried by a tensor before anything has checked them.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, Deref, DerefMut, Serialize, Deserialize,
)]
pub struct Dims(Vec<usize>);

impl Dims {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn production(&self) -> usize {
        self.0.iter().product()
    }
}

impl From<Vec<usize>> for Dims {
    fn from(value: Vec<usize>) -> Self {
        Self(value)
    }
}

impl<const N: usize> From<[usize; N]> for Dims {
    fn from(value: [usize; N]) -> Self {
        Self(value.to_vec())
    }
}

impl From<Shape> for Dims {
    fn from(value: Shape) -> Self {
        Self(value.0.to_vec())
    }
}

impl std::fmt::Display for Dims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// The logical shape of a rank-4 tensor, in `(N, C, H, W)` order.
/// Note that the fastest-moving axis is `W`, the last one, matching `torch`.
#[derive(Debug, Default, Clone, Copy, Deref, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape([usize; 4]);

impl Shape {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self([n, c, h, w])
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.0[0]
    }

    #[inline]
    pub fn c(&self) -> usize {
        self.0[1]
    }

    #[inline]
    pub fn h(&self) -> usize {
        self.0[2]
    }

    #[inline]
    pub fn w(&self) -> usize {
        self.0[3]
    }

    #[inline]
    pub fn dim(&self, axis: Axis) -> usize {
        self.0[axis.index()]
    }

    pub fn len(&self) -> usize {
        self.0.into_iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.0.into_iter().any(|x| x == 0)
    }

    /// Fails with the first axis of size 0.
    pub fn check_resolved(&self) -> Result<(), ShapeError> {
        match Axis::ALL.into_iter().find(|&axis| self.dim(axis) == 0) {
            Some(axis) => Err(ShapeError::Empty(axis)),
            None => Ok(()),
        }
    }

    /// Convert `(n, c, h, w)` into a row-major linear index.
    #[inline]
    pub fn shape_index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.c() + c) * self.h() + h) * self.w() + w
    }

    /// Number of 4-lane channel groups, i.e. `ceil(C / 4)`.
    #[inline]
    pub fn channel_groups(&self) -> usize {
        self.c().div_ceil(4)
    }
}

impl TryFrom<&Dims> for Shape {
    type Error = ShapeError;

    fn try_from(value: &Dims) -> Result<Self, Self::Error> {
        match value[..] {
            [n, c, h, w] => Ok(Self::new(n, c, h, w)),
            _ => Err(ShapeError::Rank(value.rank())),
        }
    }
}

impl TryFrom<Dims> for Shape {
    type Error = ShapeError;

    fn try_from(value: Dims) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl From<[usize; 4]> for Shape {
    fn from(value: [usize; 4]) -> Self {
        Self(value)
    }
}

impl IntoBytes for Shape {
    fn into_bytes(self) -> Vec<u8> {
        let data = self.0.map(|x| x as u32);
        bytemuck::pod_collect_to_vec(&data)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self[0], self[1], self[2], self[3])
    }
}

/// Extent of the packed 2D image backing a tensor. Each texel holds 4 channel lanes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
}

impl ImageShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of texels.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scalar lanes, 4 per texel.
    pub fn lanes(&self) -> usize {
        self.len() * 4
    }
}

impl From<Shape> for ImageShape {
    /// Channel groups of 4 are laid side by side along the width; batches are stacked along the height.
    fn from(shape: Shape) -> Self {
        Self {
            width: shape.w() * shape.channel_groups(),
            height: shape.n() * shape.h(),
        }
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
