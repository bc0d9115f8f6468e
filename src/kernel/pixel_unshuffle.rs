use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindingResource, CommandEncoderDescriptor,
    ComputePassDescriptor,
};

use super::{
    Backend, DataLayout, Kernel, KernelContext, KernelKey, KernelParam, KernelState, Precision,
};
use crate::{
    context::{Macros, Submission},
    operator::PixelUnshuffleParam,
    tensor::{ImageShape, IntoBytes, IMAGE_FORMAT},
    BindingError, Error,
};

/// Pixel-unshuffle on packed fp16 images.
///
/// Every invocation owns one output texel and gathers its four lanes straight from the input
/// image, so no linear copy of either tensor is ever made.
#[derive(Debug, Default)]
pub struct PixelUnshuffleImage {
    param: Option<PixelUnshuffleParam>,
    context: Option<KernelContext>,
    launched: bool,
}

impl PixelUnshuffleImage {
    pub const NAME: &'static str = "pixel_unshuffle";
    /// Edge of the square workgroup, in texels.
    pub const BLOCK_SIZE: u32 = 8;

    const SHADER: &'static str = include_str!("../shaders/pixel_unshuffle.wgsl");

    pub fn new() -> Self {
        Default::default()
    }

    pub fn key() -> KernelKey {
        KernelKey::new(
            Self::NAME,
            Backend::WebGpu,
            Precision::Fp16,
            DataLayout::ImageDefault,
        )
    }

    #[inline]
    fn block_count(x: usize) -> u32 {
        (x as u32).div_ceil(Self::BLOCK_SIZE)
    }
}

impl Kernel for PixelUnshuffleImage {
    fn doc(&self) -> String {
        format!(
            "{}: gather r×r spatial blocks into channels on {:?} images",
            Self::key(),
            IMAGE_FORMAT
        )
    }

    fn state(&self) -> KernelState {
        match (&self.param, &self.context, self.launched) {
            (Some(_), Some(_), true) => KernelState::Launched,
            (Some(_), Some(_), false) => KernelState::ContextBound,
            (Some(_), None, _) => KernelState::ParamBound,
            (None, _, _) => KernelState::Created,
        }
    }

    fn set_param(&mut self, param: KernelParam) -> Result<(), BindingError> {
        let KernelParam::PixelUnshuffle(param) = param;
        log::debug!(
            "{} bound with downscale factor {}",
            Self::NAME,
            param.downscale_factor
        );
        self.param = Some(param);
        self.launched = false;
        Ok(())
    }

    fn set_context(&mut self, context: KernelContext) -> Result<(), BindingError> {
        match self.state() {
            KernelState::Created => Err(BindingError::OutOfOrder(KernelState::Created)),
            _ => {
                self.context = Some(context);
                Ok(())
            }
        }
    }

    fn launch(&mut self) -> Result<Submission, Error> {
        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("pixel_unshuffle").entered();

        let param = self.param.as_ref().ok_or(BindingError::ParamUnbound)?;
        let context = self
            .context
            .as_ref()
            .ok_or(BindingError::ContextUnbound)?
            .context()?
            .clone();

        let x = param.x()?;
        let output = param.output()?;
        if x == output {
            return Err(BindingError::InPlace(x.label()).into());
        }

        let factor = param.downscale_factor;
        let input_shape = x.shape()?;
        let output_shape = output.shape()?;
        let input = x.checked_image(&context)?;
        let output_image = ImageShape::from(output_shape);
        let output = output.mutable_image(&context, output_image, None)?;

        let pipeline = context.checkout_pipeline(
            Self::NAME,
            Self::SHADER,
            Self::NAME,
            Macros::new().u32("BLOCK_SIZE", Self::BLOCK_SIZE),
        )?;

        let mut params = input_shape.into_bytes();
        params.extend(output_shape.into_bytes());
        params.extend_from_slice(bytemuck::cast_slice(&[factor as u32, 0, 0, 0]));
        let params = context.checkout_uniform(params);

        let input_view = input.view();
        let output_view = output.view();
        let bind_group = context.device.create_bind_group(&BindGroupDescriptor {
            label: Some(Self::NAME),
            layout: &pipeline.layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&input_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&output_view),
                },
            ],
        });

        let dispatch = [
            Self::block_count(output_image.width),
            Self::block_count(output_image.height),
            1,
        ];
        log::debug!(
            "launch {}: {input_shape} -> {output_shape}, image {output_image}, dispatch {dispatch:?}",
            Self::NAME
        );

        let mut encoder = context
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some(Self::NAME),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor::default());
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dispatch[0], dispatch[1], dispatch[2]);
        }

        let submission = context.submit(Some(encoder.finish()));
        self.launched = true;
        Ok(submission)
    }
}
