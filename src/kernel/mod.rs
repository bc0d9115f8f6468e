//! Device kernels and the dispatch tuple used to select them.
use serde::{Deserialize, Serialize};

pub use pixel_unshuffle::PixelUnshuffleImage;
pub use registry::{KernelFactory, KernelRegistry};

use crate::{
    context::{Context, Submission},
    operator::PixelUnshuffleParam,
    BindingError, DeviceError, Error,
};

mod pixel_unshuffle;
mod registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    Host,
    WebGpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Fp32,
    Fp16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    /// Linear row-major NCHW buffer.
    Nchw,
    /// 2D RGBA image, channel groups of 4 along the width and batches along the height.
    ImageDefault,
}

/// The dispatch tuple: (operator name, backend, precision, layout).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelKey {
    pub op_type: String,
    pub backend: Backend,
    pub precision: Precision,
    pub layout: DataLayout,
}

impl KernelKey {
    pub fn new(
        op_type: impl Into<String>,
        backend: Backend,
        precision: Precision,
        layout: DataLayout,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            backend,
            precision,
            layout,
        }
    }
}

impl std::fmt::Display for KernelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{:?}/{:?}/{:?}",
            self.op_type, self.backend, self.precision, self.layout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelState {
    Created,
    ParamBound,
    ContextBound,
    Launched,
}

/// Parameters an operator hands to its kernel, one variant per operator.
#[derive(Debug, Clone)]
pub enum KernelParam {
    PixelUnshuffle(PixelUnshuffleParam),
}

impl KernelParam {
    pub fn op_type(&self) -> &'static str {
        match self {
            KernelParam::PixelUnshuffle(_) => "pixel_unshuffle",
        }
    }
}

impl From<PixelUnshuffleParam> for KernelParam {
    fn from(value: PixelUnshuffleParam) -> Self {
        Self::PixelUnshuffle(value)
    }
}

/// Per-kernel slot for the shared device context.
#[derive(Debug, Default, Clone)]
pub struct KernelContext {
    context: Option<Context>,
}

impl KernelContext {
    pub fn new(context: Context) -> Self {
        Self {
            context: Some(context),
        }
    }

    /// Bind `context` unless one is already bound.
    pub fn init_once(&mut self, context: &Context) {
        if self.context.is_none() {
            log::debug!("kernel context initialized with context {:?}", context.id);
            self.context = Some(context.clone());
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// A new slot sharing the same device queue.
    pub fn copy_shared(&self) -> Self {
        self.clone()
    }

    pub fn context(&self) -> Result<&Context, DeviceError> {
        self.context.as_ref().ok_or(DeviceError::Uninitialized)
    }
}

/// A device program that can be configured and launched without knowing its concrete type.
///
/// Binding goes `set_param` then `set_context`; `launch` is only valid afterwards.
pub trait Kernel: std::fmt::Debug + Send {
    fn doc(&self) -> String;

    fn state(&self) -> KernelState;

    /// Bind parameters. Binding again replaces the previous parameters.
    fn set_param(&mut self, param: KernelParam) -> Result<(), BindingError>;

    /// Bind the device context. Requires parameters to be bound first.
    fn set_context(&mut self, context: KernelContext) -> Result<(), BindingError>;

    /// Enqueue the kernel and return immediately.
    fn launch(&mut self) -> Result<Submission, Error>;
}
