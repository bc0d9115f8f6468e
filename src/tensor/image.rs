use std::sync::Arc;

use half::f16;
use wgpu::{
    BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Extent3d, ImageCopyBuffer,
    ImageCopyTexture, ImageDataLayout, Maintain, MapMode, Origin3d, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor, COPY_BYTES_PER_ROW_ALIGNMENT,
};

use super::ImageShape;
use crate::{context::Context, converter::LayoutError, num::Scalar, DeviceError, Error};

/// Physical format of every packed image: 4 fp16 lanes per texel.
pub const IMAGE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

const TEXEL_SIZE: usize = 4 * std::mem::size_of::<f16>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    HostToDevice,
    DeviceToHost,
}

impl std::fmt::Display for IoDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoDirection::HostToDevice => write!(f, "HtoD"),
            IoDirection::DeviceToHost => write!(f, "DtoH"),
        }
    }
}

/// Host-side description of an image copy. Pitches are in bytes; 0 means tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageCopy {
    pub width: usize,
    pub height: usize,
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

impl ImageCopy {
    pub fn new(shape: ImageShape) -> Self {
        Self {
            width: shape.width,
            height: shape.height,
            row_pitch: 0,
            slice_pitch: 0,
        }
    }

    pub fn with_pitch(mut self, row_pitch: usize, slice_pitch: usize) -> Self {
        self.row_pitch = row_pitch;
        self.slice_pitch = slice_pitch;
        self
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.width, self.height)
    }

    /// Resolve `(row_pitch, slice_pitch)` in bytes.
    fn pitches(&self) -> Result<(usize, usize), LayoutError> {
        let packed = self.width * TEXEL_SIZE;
        let row_pitch = match self.row_pitch {
            0 => packed,
            pitch if pitch < packed || pitch % TEXEL_SIZE != 0 => {
                return Err(LayoutError::RowPitch {
                    pitch,
                    width: self.width,
                })
            }
            pitch => pitch,
        };
        let slice_pitch = match self.slice_pitch {
            0 => row_pitch * self.height,
            pitch if pitch < row_pitch * self.height => {
                return Err(LayoutError::SlicePitch {
                    pitch,
                    rows: self.height,
                    row_pitch,
                })
            }
            pitch => pitch,
        };
        Ok((row_pitch, slice_pitch))
    }
}

/// A packed image on the device. Clones share the same texture.
#[derive(Debug, Clone)]
pub struct DeviceImage {
    context: Context,
    texture: Arc<Texture>,
    shape: ImageShape,
}

impl DeviceImage {
    pub fn new(context: &Context, label: Option<&str>, shape: ImageShape) -> Result<Self, Error> {
        let limit = context.device.limits().max_texture_dimension_2d as usize;
        if shape.is_empty() || shape.width > limit || shape.height > limit {
            return Err(DeviceError::ImageSize { shape, limit }.into());
        }

        let texture = context.device.create_texture(&TextureDescriptor {
            label,
            size: Self::extent(shape),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: IMAGE_FORMAT,
            usage: TextureUsages::TEXTURE_BINDING
                | TextureUsages::STORAGE_BINDING
                | TextureUsages::COPY_SRC
                | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        log::debug!("allocated image {shape} on context {:?}", context.id);

        Ok(Self {
            context: context.clone(),
            texture: Arc::new(texture),
            shape,
        })
    }

    #[inline]
    fn extent(shape: ImageShape) -> Extent3d {
        Extent3d {
            width: shape.width as u32,
            height: shape.height as u32,
            depth_or_array_layers: 1,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn view(&self) -> TextureView {
        self.texture.create_view(&TextureViewDescriptor::default())
    }

    fn copy_texture(&self) -> ImageCopyTexture<'_> {
        ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        }
    }

    fn check_copy(&self, copy: ImageCopy, direction: IoDirection) -> Result<(usize, usize), Error> {
        if copy.shape() != self.shape {
            return Err(LayoutError::ImageShape {
                expected: self.shape,
                actual: copy.shape(),
            }
            .into());
        }
        let pitches = copy.pitches()?;
        log::debug!(
            "{direction} image copy {}, row pitch {}, slice pitch {}",
            self.shape,
            pitches.0,
            pitches.1
        );
        Ok(pitches)
    }

    /// Host to device copy. The write lands before any work submitted afterwards.
    pub fn write(&self, data: &[f16], copy: ImageCopy) -> Result<(), Error> {
        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("write_image").entered();

        let (row_pitch, _) = self.check_copy(copy, IoDirection::HostToDevice)?;
        let required = row_pitch * (copy.height - 1) + copy.width * TEXEL_SIZE;
        let size = data.len() * f16::size();
        if size < required {
            return Err(LayoutError::Size {
                expected: required / f16::size(),
                actual: data.len(),
            }
            .into());
        }

        self.context.queue.write_texture(
            self.copy_texture(),
            bytemuck::cast_slice(data),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_pitch as u32),
                rows_per_image: Some(copy.height as u32),
            },
            Self::extent(self.shape),
        );
        Ok(())
    }

    /// Device to host copy. Blocks until all prior work on the queue and the copy have finished.
    /// Returns `slice_pitch` bytes of data, rows laid out `row_pitch` bytes apart.
    pub fn read(&self, copy: ImageCopy) -> Result<Vec<f16>, Error> {
        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("read_image").entered();

        let (row_pitch, slice_pitch) = self.check_copy(copy, IoDirection::DeviceToHost)?;
        let packed = copy.width * TEXEL_SIZE;
        let aligned = packed.next_multiple_of(COPY_BYTES_PER_ROW_ALIGNMENT as usize);

        let context = &self.context;
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: None,
            size: (aligned * copy.height) as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = context
            .device
            .create_command_encoder(&CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            self.copy_texture(),
            ImageCopyBuffer {
                buffer: &buffer,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned as u32),
                    rows_per_image: Some(copy.height as u32),
                },
            },
            Self::extent(self.shape),
        );
        let _ = context.submit(Some(encoder.finish()));

        let (sender, receiver) = flume::bounded(1);
        let slice = buffer.slice(..);
        slice.map_async(MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        context.device.poll(Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| DeviceError::MapDropped)?
            .map_err(DeviceError::from)?;

        let mut output = vec![f16::ZERO; slice_pitch / f16::size()];
        {
            let map = slice.get_mapped_range();
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut output);
            for (row, source) in map.chunks_exact(aligned).enumerate() {
                let start = row * row_pitch;
                bytes[start..start + packed].copy_from_slice(&source[..packed]);
            }
        }
        buffer.unmap();
        Ok(output)
    }
}
