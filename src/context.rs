use std::{borrow::Cow, collections::BTreeMap, sync::Arc, time::Duration};

use thiserror::Error;
use web_unshuffle_derive::{Deref, DerefMut};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    Adapter, BindGroupLayout, Buffer, BufferUsages, CommandBuffer, ComputePipeline,
    ComputePipelineDescriptor, Device, DeviceDescriptor, Features, Instance, Limits, Maintain,
    MemoryHints, PowerPreference, Queue, RequestAdapterOptions, ShaderModuleDescriptor,
    SubmissionIndex,
};

use crate::tensor::cache::ResourceCache;

pub trait InstanceExt {
    fn adapter(
        &self,
        power_preference: PowerPreference,
    ) -> impl std::future::Future<Output = Result<Adapter, DeviceError>>;
}

impl InstanceExt for Instance {
    async fn adapter(&self, power_preference: PowerPreference) -> Result<Adapter, DeviceError> {
        self.request_adapter(&RequestAdapterOptions {
            power_preference,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await
        .ok_or(DeviceError::RequestAdapterFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("failed to request adaptor")]
    RequestAdapterFailed,
    #[error("failed to request device")]
    RequestDeviceFailed,
    #[error("device queue is not initialized")]
    Uninitialized,
    #[error("image lives on context {actual:?}, but the kernel runs on context {expected:?}")]
    ContextMismatch {
        expected: uid::Id<ContextId>,
        actual: uid::Id<ContextId>,
    },
    #[error("image {shape} is empty or exceeds the device limit of {limit} texels per side")]
    ImageSize {
        shape: crate::tensor::ImageShape,
        limit: usize,
    },
    #[error("failed to preprocess shader {name}: {message}")]
    Shader { name: String, message: String },
    #[error("failed to map buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("buffer mapping was dropped before completion")]
    MapDropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId;

#[derive(Debug)]
pub struct ContextInternal {
    pub id: uid::Id<ContextId>,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,

    pipeline_cache: ResourceCache<PipelineKey, CachedPipeline>,
    uniform_cache: ResourceCache<Vec<u8>, Buffer>,
}

/// Shared handle to a device and its queue. Clones share the same queue.
#[derive(Debug, Clone, Deref)]
pub struct Context(Arc<ContextInternal>);

impl Drop for Context {
    fn drop(&mut self) {
        if Arc::strong_count(&self.0) <= 1 {
            self.clear_buffers();
            self.queue.submit(None);
            self.device.poll(Maintain::Wait);
            log::info!("context {:?} destroyed", self.id);
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Context {}

pub struct ContextBuilder {
    pub adapter: Adapter,
    pub features: Features,
    pub limits: Limits,
}

impl ContextBuilder {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            features: Features::empty(),
            limits: Default::default(),
        }
    }

    pub async fn build(self) -> Result<Context, DeviceError> {
        let Self {
            adapter,
            features,
            limits,
        } = self;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: None,
                    required_features: features,
                    required_limits: limits,
                    memory_hints: MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|_| DeviceError::RequestDeviceFailed)?;

        let context = Context(Arc::new(ContextInternal {
            id: uid::Id::new(),
            adapter,
            device,
            queue,
            pipeline_cache: ResourceCache::new(Duration::ZERO),
            uniform_cache: Default::default(),
        }));

        let info = context.adapter.get_info();
        log::info!(
            "context {:?} created on {} ({:?})",
            context.id,
            info.name,
            info.backend
        );
        Ok(context)
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn update_limits(mut self, f: impl FnOnce(&mut Limits)) -> Self {
        f(&mut self.limits);
        self
    }

    pub fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn update_features(mut self, f: impl FnOnce(&mut Features)) -> Self {
        f(&mut self.features);
        self
    }
}

/// Preprocessor definitions used to specialize a shader before compilation.
#[derive(Debug, Default, Clone, Deref, DerefMut, PartialEq, Eq, Hash)]
pub struct Macros(BTreeMap<String, String>);

impl Macros {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn u32(mut self, name: impl Into<String>, value: u32) -> Self {
        self.0.insert(name.into(), format!("{value}u"));
        self
    }

    pub fn compile(self) -> Vec<(String, String)> {
        self.0.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    name: String,
    entry_point: String,
    macros: Vec<(String, String)>,
}

impl PipelineKey {
    fn new(name: String, entry_point: String, macros: Macros) -> Self {
        let macros = macros.compile();
        Self {
            name,
            entry_point,
            macros,
        }
    }
}

#[derive(Debug)]
pub struct CachedPipeline {
    pub pipeline: ComputePipeline,
    pub layout: BindGroupLayout,
}

/// Handle of work enqueued on a context. Dropping it does not wait for the work.
#[derive(Debug)]
#[must_use = "work is not complete until `wait` is called or the context is drained"]
pub struct Submission {
    context: Context,
    index: SubmissionIndex,
}

impl Submission {
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Block until this submission, and everything enqueued before it, has finished.
    pub fn wait(self) {
        #[cfg(feature = "trace")]
        let _span = tracing::trace_span!("wait").entered();
        let Self { context, index } = self;
        context.device.poll(Maintain::WaitForSubmissionIndex(index));
    }
}

impl Context {
    /// Enqueue command buffers. Submissions through one context run in order.
    pub fn submit(&self, commands: impl IntoIterator<Item = CommandBuffer>) -> Submission {
        let index = self.queue.submit(commands);
        Submission {
            context: self.clone(),
            index,
        }
    }

    /// Drain the queue: block until all submitted work has completed.
    pub fn finish(&self) {
        self.queue.submit(None);
        self.device.poll(Maintain::Wait);
    }
}

impl ContextInternal {
    pub fn checkout_pipeline(
        &self,
        name: impl AsRef<str>,
        source: impl AsRef<str>,
        entry_point: impl AsRef<str>,
        macros: Macros,
    ) -> Result<Arc<CachedPipeline>, DeviceError> {
        let name = name.as_ref();
        let entry_point = entry_point.as_ref();
        let key = PipelineKey::new(name.into(), entry_point.into(), macros.clone());

        self.pipeline_cache.try_checkout(key, || {
            use gpp::{process_str, Context};
            let mut context = Context::new();
            context.macros = macros.0.into_iter().collect();

            let shader =
                process_str(source.as_ref(), &mut context).map_err(|err| DeviceError::Shader {
                    name: name.into(),
                    message: err.to_string(),
                })?;
            let module = &self.device.create_shader_module(ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(Cow::from(shader)),
            });

            let pipeline = self
                .device
                .create_compute_pipeline(&ComputePipelineDescriptor {
                    label: Some(name),
                    layout: None,
                    module,
                    entry_point,
                    compilation_options: Default::default(),
                    cache: None,
                });
            let layout = pipeline.get_bind_group_layout(0);
            log::debug!("compiled pipeline {name}::{entry_point}");
            Ok(CachedPipeline { pipeline, layout })
        })
    }

    pub(crate) fn checkout_uniform(&self, contents: Vec<u8>) -> Arc<Buffer> {
        let desc = BufferInitDescriptor {
            label: None,
            contents: &contents,
            usage: BufferUsages::UNIFORM,
        };
        self.uniform_cache
            .checkout(contents.clone(), || self.device.create_buffer_init(&desc))
    }

    /// Clear resource caches.
    #[inline]
    pub fn clear_buffers(&self) {
        self.uniform_cache.clear();
    }
}
