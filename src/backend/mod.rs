// Image generation backends
//
// The queue only sees opaque generator operations. `SharedBackend` turns a
// backend into such operations: each one takes the backend exclusively,
// loads the model if needed, generates and then releases the GPU.

mod http;

pub use http::HttpBackend;

use crate::config::BackendConfig;
use crate::request::{ActorKey, GenerationParams, GenerationRequest};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// A GPU-resident text-to-image model
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Make the model resident
    async fn load(&mut self) -> Result<()>;

    /// Produce encoded image bytes (PNG)
    async fn generate(&mut self, params: &GenerationParams) -> Result<Vec<u8>>;

    /// Release GPU memory
    async fn unload(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;
}

/// Exclusive handle to one backend, cloned into every generator
#[derive(Clone)]
pub struct SharedBackend {
    inner: Arc<Mutex<Box<dyn GenerationBackend>>>,
    unload_after_generation: bool,
}

impl SharedBackend {
    pub fn new(backend: Box<dyn GenerationBackend>, unload_after_generation: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
            unload_after_generation,
        }
    }

    /// HTTP backend from configuration
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let backend = HttpBackend::from_config(config)?;
        Ok(Self::new(
            Box::new(backend),
            config.unload_after_generation,
        ))
    }

    /// Acquire, lazily load, generate, release.
    ///
    /// An unload failure is logged; the generation result stands. If the
    /// returned future is dropped mid-generation (queue timeout), the unload
    /// still runs on a spawned task before the backend lock is released.
    pub async fn generate(&self, params: &GenerationParams) -> Result<Vec<u8>> {
        let mut release = Release {
            backend: Some(Arc::clone(&self.inner).lock_owned().await),
            unload: self.unload_after_generation,
        };

        let result = match release.backend.as_mut() {
            Some(backend) => {
                if !backend.is_loaded() {
                    debug!(backend = backend.name(), "Loading image model");
                    if let Err(e) = backend.load().await {
                        let context = format!("Failed to load {} model", backend.name());
                        return Err(e.context(context));
                    }
                }
                backend.generate(params).await
            }
            None => Err(anyhow::anyhow!("backend handle already released")),
        };

        release.finish().await;
        result
    }

    /// Generator operation for the queue
    pub fn generator(
        &self,
        params: GenerationParams,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<u8>>> + Send + 'static {
        let backend = self.clone();
        move || async move { backend.generate(&params).await }.boxed()
    }

    /// Clamp parameters and wrap them in a request bound to this backend
    pub fn request(&self, actor: impl Into<ActorKey>, params: GenerationParams) -> GenerationRequest {
        let params = params.clamped();
        GenerationRequest::new(actor, params.clone(), self.generator(params))
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.is_loaded()
    }
}

type BackendGuard = OwnedMutexGuard<Box<dyn GenerationBackend>>;

/// Holds the backend for one generation and releases the GPU afterwards
struct Release {
    backend: Option<BackendGuard>,
    unload: bool,
}

impl Release {
    async fn finish(mut self) {
        if let Some(mut backend) = self.backend.take() {
            if self.unload {
                unload_logged(&mut backend).await;
            }
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        if !self.unload {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(backend = backend.name(), "Generation abandoned; unloading in background");
                handle.spawn(async move { unload_logged(&mut backend).await });
            }
            Err(_) => {
                warn!(backend = backend.name(), "No runtime to unload abandoned image model");
            }
        }
    }
}

async fn unload_logged(backend: &mut BackendGuard) {
    if let Err(e) = backend.unload().await {
        warn!(backend = backend.name(), error = %e, "Failed to unload image model");
    }
}
