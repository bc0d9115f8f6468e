use super::{OpDesc, OpLite, OpRuntimeInfo, Scope};
use crate::{
    kernel::{Kernel, KernelParam},
    tensor::{Axis, Shape, ShapeError, Tensor, TensorRef},
    BindingError, Error,
};

/// Output shape of pixel-unshuffle: `(N, C·r², H/r, W/r)`.
pub fn pixel_unshuffle_shape(shape: Shape, factor: usize) -> Result<Shape, ShapeError> {
    shape.check_resolved()?;
    if factor == 0 {
        return Err(ShapeError::DownscaleFactor(0));
    }
    for axis in [Axis::H, Axis::W] {
        let size = shape.dim(axis);
        if size % factor != 0 {
            return Err(ShapeError::Indivisible { axis, size, factor });
        }
    }
    Ok(Shape::new(
        shape.n(),
        shape.c() * factor * factor,
        shape.h() / factor,
        shape.w() / factor,
    ))
}

/// Output shape of the inverse transform: `(N, C/r², H·r, W·r)`.
pub fn pixel_shuffle_shape(shape: Shape, factor: usize) -> Result<Shape, ShapeError> {
    shape.check_resolved()?;
    if factor == 0 {
        return Err(ShapeError::DownscaleFactor(0));
    }
    let blocks = factor * factor;
    if shape.c() % blocks != 0 {
        return Err(ShapeError::Indivisible {
            axis: Axis::C,
            size: shape.c(),
            factor: blocks,
        });
    }
    Ok(Shape::new(
        shape.n(),
        shape.c() / blocks,
        shape.h() * factor,
        shape.w() * factor,
    ))
}

/// Parameter bundle of pixel-unshuffle. Holds the tensors without owning them.
#[derive(Debug, Clone)]
pub struct PixelUnshuffleParam {
    pub x: TensorRef,
    pub output: TensorRef,
    pub downscale_factor: usize,
}

impl PixelUnshuffleParam {
    pub fn new(x: &Tensor, output: &Tensor, downscale_factor: usize) -> Self {
        Self {
            x: x.downgrade(),
            output: output.downgrade(),
            downscale_factor,
        }
    }

    pub fn x(&self) -> Result<Tensor, BindingError> {
        self.x
            .upgrade()
            .ok_or(BindingError::TensorDropped(PixelUnshuffleOp::INPUT))
    }

    pub fn output(&self) -> Result<Tensor, BindingError> {
        self.output
            .upgrade()
            .ok_or(BindingError::TensorDropped(PixelUnshuffleOp::OUTPUT))
    }
}

#[derive(Debug, Default, Clone)]
pub struct PixelUnshuffleOp {
    param: Option<PixelUnshuffleParam>,
}

impl PixelUnshuffleOp {
    pub const TYPE: &'static str = "pixel_unshuffle";
    pub const INPUT: &'static str = "X";
    pub const OUTPUT: &'static str = "Out";
    pub const FACTOR: &'static str = "downscale_factor";

    pub fn new() -> Self {
        Default::default()
    }

    pub fn param(&self) -> Result<&PixelUnshuffleParam, BindingError> {
        self.param.as_ref().ok_or(BindingError::Detached)
    }

    /// Input shape and downscale factor, both validated.
    fn checked(&self) -> Result<(Shape, usize), Error> {
        let param = self.param()?;
        let shape = param.x()?.shape()?;
        let factor = param.downscale_factor;
        pixel_unshuffle_shape(shape, factor)?;
        Ok((shape, factor))
    }

    pub fn runtime_info(&self) -> Result<OpRuntimeInfo, Error> {
        let param = self.param()?;
        Ok(OpRuntimeInfo {
            input_shape: param.x()?.dims().to_string(),
            output_shape: param.output()?.dims().to_string(),
            remark: format!("{}{}", Self::FACTOR, param.downscale_factor),
            macs: 1,
        })
    }
}

impl OpLite for PixelUnshuffleOp {
    fn debug_string(&self) -> &'static str {
        Self::TYPE
    }

    fn check_shape(&self) -> Result<(), Error> {
        self.checked().map(|_| ())
    }

    fn infer_shape(&self) -> Result<Shape, Error> {
        let (shape, factor) = self.checked()?;
        let output_shape = pixel_unshuffle_shape(shape, factor)?;
        self.param()?.output()?.resize(output_shape);
        Ok(output_shape)
    }

    fn attach(&mut self, desc: &OpDesc, scope: &Scope) -> Result<(), Error> {
        let x = scope.resolve(Self::INPUT, desc.input_name(Self::INPUT)?)?;
        let output = scope.resolve(Self::OUTPUT, desc.output_name(Self::OUTPUT)?)?;
        let factor = desc.int_attr(Self::FACTOR)?;
        let factor = match usize::try_from(factor) {
            Ok(factor) if factor > 0 => factor,
            _ => return Err(ShapeError::DownscaleFactor(factor).into()),
        };
        self.param = Some(PixelUnshuffleParam::new(&x, &output, factor));
        Ok(())
    }

    fn attach_kernel(&self, kernel: &mut dyn Kernel) -> Result<(), Error> {
        let param = self.param()?.clone();
        kernel.set_param(KernelParam::PixelUnshuffle(param))?;
        Ok(())
    }
}
