use thiserror::Error;

use crate::{converter::LayoutError, kernel::KernelState, tensor::ShapeError, DeviceError};

/// A broken contract between the operator, its scope and the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("unknown operator type {0}")]
    UnknownOperator(String),
    #[error("operator {op_type} has no `{slot}` slot")]
    MissingSlot { op_type: String, slot: String },
    #[error("variable {name} for slot `{slot}` is not in scope")]
    MissingSymbol { slot: String, name: String },
    #[error("attribute {0} is missing")]
    MissingAttribute(String),
    #[error("attribute {name} should be {expected}")]
    AttributeType {
        name: String,
        expected: &'static str,
    },
    #[error("operator is not attached to a scope")]
    Detached,
    #[error("kernel cannot read and write the same tensor `{0}`")]
    InPlace(String),
    #[error("kernel parameters are not bound")]
    ParamUnbound,
    #[error("kernel context is not bound")]
    ContextUnbound,
    #[error("cannot bind the context of a kernel in state {0:?}")]
    OutOfOrder(KernelState),
    #[error("tensor bound to slot `{0}` has been dropped")]
    TensorDropped(&'static str),
    #[error("tensor {0} has no device image")]
    ImageUnallocated(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
