use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use half::f16;
use web_unshuffle_derive::Deref;

pub use image::{DeviceImage, ImageCopy, IoDirection, IMAGE_FORMAT};
pub use shape::{Axis, Dims, ImageShape, IntoBytes, Shape, ShapeError};

use crate::{
    context::Context,
    converter::{from_image, to_image},
    num::Float,
    BindingError, DeviceError, Error,
};

pub mod cache;
mod image;
mod shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId;

#[derive(Debug, Default)]
struct TensorState {
    dims: Dims,
    image: Option<DeviceImage>,
}

#[derive(Debug)]
pub struct TensorInternal {
    id: uid::Id<TensorId>,
    name: Option<String>,
    state: RwLock<TensorState>,
}

/// A tensor variable: logical dims plus the device image holding its data.
///
/// Clones share the same variable. Parameter bundles hold a [`TensorRef`] instead,
/// which does not keep the variable alive.
#[derive(Debug, Clone, Deref)]
pub struct Tensor(Arc<TensorInternal>);

/// Non-owning reference to a [`Tensor`].
#[derive(Debug, Clone)]
pub struct TensorRef(Weak<TensorInternal>);

impl TensorRef {
    pub fn upgrade(&self) -> Option<Tensor> {
        self.0.upgrade().map(Tensor)
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tensor {}

impl Tensor {
    pub fn new() -> Self {
        Self(Arc::new(TensorInternal {
            id: uid::Id::new(),
            name: None,
            state: Default::default(),
        }))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(Arc::new(TensorInternal {
            id: uid::Id::new(),
            name: Some(name.into()),
            state: Default::default(),
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, TensorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TensorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> uid::Id<TensorId> {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for diagnostics; falls back to the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("tensor#{:?}", self.id),
        }
    }

    pub fn downgrade(&self) -> TensorRef {
        TensorRef(Arc::downgrade(&self.0))
    }

    pub fn dims(&self) -> Dims {
        self.read().dims.clone()
    }

    pub fn shape(&self) -> Result<Shape, ShapeError> {
        Shape::try_from(&self.read().dims)
    }

    /// Fails unless the dims are exactly `expected`.
    pub fn check_shape(&self, expected: Shape) -> Result<(), ShapeError> {
        let actual = self.shape()?;
        match actual == expected {
            true => Ok(()),
            false => Err(ShapeError::Mismatch { expected, actual }),
        }
    }

    /// Change the logical dims. The device image is kept until the next allocation asks for a different extent.
    pub fn resize(&self, dims: impl Into<Dims>) {
        self.write().dims = dims.into();
    }

    pub fn image(&self) -> Option<DeviceImage> {
        self.read().image.clone()
    }

    /// Get a device image of `shape`, reallocating if the current one differs, then upload `data` if given.
    pub fn mutable_image(
        &self,
        context: &Context,
        shape: ImageShape,
        data: Option<&[f16]>,
    ) -> Result<DeviceImage, Error> {
        let image = {
            let mut state = self.write();
            let current = state
                .image
                .as_ref()
                .filter(|image| image.shape() == shape && image.context() == context)
                .cloned();
            match current {
                Some(image) => image,
                None => {
                    let image = DeviceImage::new(context, self.name(), shape)?;
                    state.image = Some(image.clone());
                    image
                }
            }
        };
        if let Some(data) = data {
            image.write(data, ImageCopy::new(shape))?;
        }
        Ok(image)
    }

    /// Convert linear NCHW `data` into the packed layout and upload it.
    pub fn upload<T: Float>(&self, context: &Context, data: &[T]) -> Result<DeviceImage, Error> {
        let shape = self.shape()?;
        let packed = to_image(data, shape)?;
        log::debug!("upload {} {shape} from {:?}", self.label(), T::PRECISION);
        self.mutable_image(context, ImageShape::from(shape), Some(&packed))
    }

    /// Read the device image back and convert it into linear NCHW data.
    pub fn download<T: Float>(&self) -> Result<Vec<T>, Error> {
        let shape = self.shape()?;
        let image = self
            .image()
            .ok_or_else(|| BindingError::ImageUnallocated(self.label()))?;
        let data = image.read(ImageCopy::new(image.shape()))?;
        Ok(from_image(&data, image.shape(), shape)?)
    }

    /// The device image, checked against the current dims and the context it must live on.
    pub fn checked_image(&self, context: &Context) -> Result<DeviceImage, Error> {
        let shape = self.shape()?;
        let image = self
            .image()
            .ok_or_else(|| BindingError::ImageUnallocated(self.label()))?;
        if image.context() != context {
            return Err(DeviceError::ContextMismatch {
                expected: context.id,
                actual: image.context().id,
            }
            .into());
        }
        let expected = ImageShape::from(shape);
        if image.shape() != expected {
            return Err(crate::LayoutError::ImageShape {
                expected,
                actual: image.shape(),
            }
            .into());
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dims, Shape, Tensor};
    use crate::{BindingError, Error, ShapeError};

    #[test]
    fn test_resize() {
        let tensor = Tensor::named("x");
        assert_eq!(tensor.dims(), Dims::default());
        assert_eq!(tensor.shape(), Err(ShapeError::Rank(0)));

        tensor.resize([1, 3, 4, 4]);
        assert_eq!(tensor.shape(), Ok(Shape::new(1, 3, 4, 4)));

        let shared = tensor.clone();
        shared.resize(Shape::new(2, 3, 4, 4));
        assert_eq!(tensor.shape(), Ok(Shape::new(2, 3, 4, 4)));
        assert_eq!(tensor, shared);

        assert_eq!(tensor.check_shape(Shape::new(2, 3, 4, 4)), Ok(()));
        assert_eq!(
            tensor.check_shape(Shape::new(1, 3, 4, 4)),
            Err(ShapeError::Mismatch {
                expected: Shape::new(1, 3, 4, 4),
                actual: Shape::new(2, 3, 4, 4)
            })
        );
    }

    #[test]
    fn test_tensor_ref() {
        let tensor = Tensor::new();
        let weak = tensor.downgrade();
        assert_eq!(weak.upgrade(), Some(tensor.clone()));
        drop(tensor);
        assert_eq!(weak.upgrade(), None);
    }

    #[test]
    fn test_download_unallocated() {
        let tensor = Tensor::named("out");
        tensor.resize([1, 1, 2, 2]);
        assert_eq!(
            tensor.download::<f32>(),
            Err(Error::Binding(BindingError::ImageUnallocated("out".into())))
        );
    }
}
