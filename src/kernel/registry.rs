use std::sync::Arc;

use rustc_hash::FxHashMap as HashMap;

use super::{Backend, DataLayout, Kernel, KernelKey, PixelUnshuffleImage, Precision};

pub type KernelFactory = Arc<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

/// Maps dispatch tuples to kernel factories.
///
/// Built once at startup and passed around by reference. Factories registered under the same
/// key are kept in registration order; by convention callers take the first candidate.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    factories: HashMap<KernelKey, Vec<KernelFactory>>,
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.factories.iter().map(|(key, v)| (key, v.len())))
            .finish()
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry holding every kernel this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(PixelUnshuffleImage::key(), || {
            Box::new(PixelUnshuffleImage::new())
        });
        registry
    }

    /// Register a factory under `key`. Registering a key again adds another candidate after the existing ones.
    pub fn register<F>(&mut self, key: KernelKey, factory: F)
    where
        F: Fn() -> Box<dyn Kernel> + Send + Sync + 'static,
    {
        let candidates = self.factories.entry(key.clone()).or_default();
        candidates.push(Arc::new(factory));
        log::debug!("registered kernel {key} (candidate {})", candidates.len());
    }

    /// Factories registered under `key`, in registration order.
    pub fn factories(&self, key: &KernelKey) -> &[KernelFactory] {
        self.factories
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Fresh kernels for every candidate matching the dispatch tuple, in registration order.
    pub fn create(
        &self,
        op_type: &str,
        backend: Backend,
        precision: Precision,
        layout: DataLayout,
    ) -> Vec<Box<dyn Kernel>> {
        let key = KernelKey::new(op_type, backend, precision, layout);
        let kernels: Vec<_> = self.factories(&key).iter().map(|factory| factory()).collect();
        if kernels.is_empty() {
            log::warn!("no kernel registered for {key}");
        }
        kernels
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        self.factories.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.factories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::KernelRegistry;
    use crate::kernel::{
        Backend, DataLayout, Kernel, KernelKey, KernelState, PixelUnshuffleImage, Precision,
    };

    fn create_unshuffle(registry: &KernelRegistry) -> Vec<Box<dyn Kernel>> {
        registry.create(
            "pixel_unshuffle",
            Backend::WebGpu,
            Precision::Fp16,
            DataLayout::ImageDefault,
        )
    }

    #[test]
    fn test_builtin() {
        let registry = KernelRegistry::with_builtin();
        assert!(registry.contains(&PixelUnshuffleImage::key()));
        assert_eq!(registry.len(), 1);

        let kernels = create_unshuffle(&registry);
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].state(), KernelState::Created);
        assert!(kernels[0].doc().contains("pixel_unshuffle"));
    }

    #[test]
    fn test_missing_key() {
        let registry = KernelRegistry::with_builtin();
        let kernels = registry.create(
            "pixel_unshuffle",
            Backend::Host,
            Precision::Fp32,
            DataLayout::Nchw,
        );
        assert!(kernels.is_empty());
        assert!(KernelRegistry::new().is_empty());
    }

    #[test]
    fn test_registration_order() {
        #[derive(Debug)]
        struct Tagged(usize);

        impl Kernel for Tagged {
            fn doc(&self) -> String {
                format!("candidate {}", self.0)
            }

            fn state(&self) -> KernelState {
                KernelState::Created
            }

            fn set_param(
                &mut self,
                _: crate::kernel::KernelParam,
            ) -> Result<(), crate::BindingError> {
                Ok(())
            }

            fn set_context(
                &mut self,
                _: crate::kernel::KernelContext,
            ) -> Result<(), crate::BindingError> {
                Ok(())
            }

            fn launch(&mut self) -> Result<crate::context::Submission, crate::Error> {
                Err(crate::BindingError::ParamUnbound.into())
            }
        }

        let key = KernelKey::new(
            "pixel_unshuffle",
            Backend::WebGpu,
            Precision::Fp16,
            DataLayout::ImageDefault,
        );
        let mut registry = KernelRegistry::with_builtin();
        registry.register(key.clone(), || Box::new(Tagged(1)));
        registry.register(key.clone(), || Box::new(Tagged(2)));
        assert_eq!(registry.factories(&key).len(), 3);

        // every call yields the same candidates in the same order
        for _ in 0..2 {
            let docs: Vec<_> = create_unshuffle(&registry)
                .iter()
                .map(|kernel| kernel.doc())
                .collect();
            assert_eq!(docs.len(), 3);
            assert_eq!(docs[0], PixelUnshuffleImage::new().doc());
            assert_eq!(docs[1], "candidate 1");
            assert_eq!(docs[2], "candidate 2");
        }
    }
}
