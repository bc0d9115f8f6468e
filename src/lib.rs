pub mod context;
pub mod converter;
pub mod error;
pub mod kernel;
pub mod num;
pub mod operator;
pub mod reference;
pub mod tensor;

pub use context::{Context, ContextBuilder, DeviceError, InstanceExt, Macros, Submission};
pub use converter::LayoutError;
pub use error::{BindingError, Error};
pub use kernel::{
    Backend, DataLayout, Kernel, KernelContext, KernelKey, KernelParam, KernelRegistry,
    KernelState, PixelUnshuffleImage, Precision,
};
pub use operator::{
    Attribute, OpDesc, OpLite, OpRuntimeInfo, Operator, PixelUnshuffleOp, PixelUnshuffleParam,
    Scope,
};
pub use tensor::{
    DeviceImage, Dims, ImageCopy, ImageShape, IoDirection, Shape, ShapeError, Tensor, TensorRef,
};

pub use wgpu;
