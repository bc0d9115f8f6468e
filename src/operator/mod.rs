//! Operators: shape checking, shape inference and parameter wiring for kernels.
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub use pixel_unshuffle::{
    pixel_shuffle_shape, pixel_unshuffle_shape, PixelUnshuffleOp, PixelUnshuffleParam,
};

use crate::{
    kernel::Kernel,
    tensor::{Shape, Tensor},
    BindingError, Error,
};

mod pixel_unshuffle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Attribute {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

/// Description of one operator instance as produced by a graph loader.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Attribute>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, slot: impl Into<String>, name: impl Into<String>) -> Self {
        self.inputs.entry(slot.into()).or_default().push(name.into());
        self
    }

    pub fn output(mut self, slot: impl Into<String>, name: impl Into<String>) -> Self {
        self.outputs.entry(slot.into()).or_default().push(name.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Attribute>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    fn slot<'a>(
        &self,
        slots: &'a BTreeMap<String, Vec<String>>,
        slot: &str,
    ) -> Result<&'a str, BindingError> {
        slots
            .get(slot)
            .and_then(|names| names.first())
            .map(String::as_str)
            .ok_or_else(|| BindingError::MissingSlot {
                op_type: self.op_type.clone(),
                slot: slot.into(),
            })
    }

    /// The first variable name bound to input `slot`.
    pub fn input_name(&self, slot: &str) -> Result<&str, BindingError> {
        self.slot(&self.inputs, slot)
    }

    /// The first variable name bound to output `slot`.
    pub fn output_name(&self, slot: &str) -> Result<&str, BindingError> {
        self.slot(&self.outputs, slot)
    }

    pub fn int_attr(&self, name: &str) -> Result<i64, BindingError> {
        match self.attrs.get(name) {
            Some(Attribute::Int(value)) => Ok(*value),
            Some(_) => Err(BindingError::AttributeType {
                name: name.into(),
                expected: "an integer",
            }),
            None => Err(BindingError::MissingAttribute(name.into())),
        }
    }
}

/// Symbol table mapping variable names to tensors.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: HashMap<String, Tensor>,
}

impl Scope {
    pub fn new() -> Self {
        Default::default()
    }

    /// Find the variable called `name`, creating an empty one if absent.
    pub fn var(&mut self, name: &str) -> Tensor {
        self.vars
            .entry(name.into())
            .or_insert_with(|| Tensor::named(name))
            .clone()
    }

    pub fn find_var(&self, name: &str) -> Option<Tensor> {
        self.vars.get(name).cloned()
    }

    /// Resolve the variable bound to `slot`.
    pub fn resolve(&self, slot: &str, name: &str) -> Result<Tensor, BindingError> {
        self.find_var(name)
            .ok_or_else(|| BindingError::MissingSymbol {
                slot: slot.into(),
                name: name.into(),
            })
    }
}

/// Shape summary for profilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRuntimeInfo {
    pub input_shape: String,
    pub output_shape: String,
    pub remark: String,
    pub macs: usize,
}

/// The fixed capability set every operator offers.
pub trait OpLite {
    fn debug_string(&self) -> &'static str;

    /// Validate input dims and attributes.
    fn check_shape(&self) -> Result<(), Error>;

    /// Compute the output shape and resize the output tensor to it.
    fn infer_shape(&self) -> Result<Shape, Error>;

    /// Bind to the tensors named in `desc`, looked up in `scope`.
    fn attach(&mut self, desc: &OpDesc, scope: &Scope) -> Result<(), Error>;

    /// Hand the parameters to `kernel`.
    fn attach_kernel(&self, kernel: &mut dyn Kernel) -> Result<(), Error>;
}

/// Every operator this crate knows about.
#[derive(Debug, Clone)]
pub enum Operator {
    PixelUnshuffle(PixelUnshuffleOp),
}

impl Operator {
    pub fn new(op_type: &str) -> Result<Self, BindingError> {
        match op_type {
            PixelUnshuffleOp::TYPE => Ok(Self::PixelUnshuffle(PixelUnshuffleOp::new())),
            _ => Err(BindingError::UnknownOperator(op_type.into())),
        }
    }

    /// Create the operator named by `desc` and attach it to `scope`.
    pub fn create(desc: &OpDesc, scope: &Scope) -> Result<Self, Error> {
        let mut op = Self::new(&desc.op_type)?;
        op.attach(desc, scope)?;
        Ok(op)
    }

    fn inner(&self) -> &dyn OpLite {
        match self {
            Operator::PixelUnshuffle(op) => op,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn OpLite {
        match self {
            Operator::PixelUnshuffle(op) => op,
        }
    }
}

impl OpLite for Operator {
    fn debug_string(&self) -> &'static str {
        self.inner().debug_string()
    }

    fn check_shape(&self) -> Result<(), Error> {
        self.inner().check_shape()
    }

    fn infer_shape(&self) -> Result<Shape, Error> {
        self.inner().infer_shape()
    }

    fn attach(&mut self, desc: &OpDesc, scope: &Scope) -> Result<(), Error> {
        self.inner_mut().attach(desc, scope)
    }

    fn attach_kernel(&self, kernel: &mut dyn Kernel) -> Result<(), Error> {
        self.inner().attach_kernel(kernel)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{Attribute, OpDesc, OpLite, Operator, Scope};
    use crate::{tensor::Shape, BindingError, Error};

    #[test]
    fn test_desc_from_json() -> Result<()> {
        let desc: OpDesc = serde_json::from_str(
            r#"{
                "type": "pixel_unshuffle",
                "inputs": { "X": ["x"] },
                "outputs": { "Out": ["out"] },
                "attrs": { "downscale_factor": 2, "scale": 0.5, "name": "down" }
            }"#,
        )?;
        assert_eq!(
            desc,
            OpDesc::new("pixel_unshuffle")
                .input("X", "x")
                .output("Out", "out")
                .attr("downscale_factor", 2i64)
                .attr("scale", 0.5f32)
                .attr("name", "down")
        );
        assert_eq!(desc.int_attr("downscale_factor")?, 2);
        assert_eq!(desc.attrs["scale"], Attribute::Float(0.5));
        assert_eq!(
            desc.int_attr("scale"),
            Err(BindingError::AttributeType {
                name: "scale".into(),
                expected: "an integer"
            })
        );
        Ok(())
    }

    #[test]
    fn test_scope() {
        let mut scope = Scope::new();
        let x = scope.var("x");
        assert_eq!(scope.var("x"), x);
        assert_eq!(x.name(), Some("x"));
        assert!(scope.find_var("y").is_none());
        assert_eq!(
            scope.resolve("X", "y"),
            Err(BindingError::MissingSymbol {
                slot: "X".into(),
                name: "y".into()
            })
        );
    }

    #[test]
    fn test_create_operator() -> Result<()> {
        let mut scope = Scope::new();
        scope.var("x").resize([1, 2, 4, 4]);
        scope.var("out");

        let desc = OpDesc::new("pixel_unshuffle")
            .input("X", "x")
            .output("Out", "out")
            .attr("downscale_factor", 2i64);
        let op = Operator::create(&desc, &scope)?;
        assert_eq!(op.debug_string(), "pixel_unshuffle");
        op.check_shape()?;
        assert_eq!(op.infer_shape()?, Shape::new(1, 8, 2, 2));

        let desc = OpDesc::new("pixel_shuffle");
        assert_eq!(
            Operator::create(&desc, &scope).unwrap_err(),
            Error::Binding(BindingError::UnknownOperator("pixel_shuffle".into()))
        );
        Ok(())
    }
}
