//! Model Pool Manager
//!
//! Compiles OpenVINO models on first use and optionally unloads them after
//! an idle timeout.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use openvino::{CompiledModel, Core};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::{InferenceConfig, ModelsConfig};

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// OpenVINO CompiledModel methods are thread-safe in C++, but Rust bindings
    /// require &mut self.
    pub fn create_infer_request(&self) -> anyhow::Result<openvino::InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

struct CachedModel {
    compiled: SafeCompiledModel,
    last_access: Mutex<Instant>,
}

impl CachedModel {
    fn touch(&self) -> SafeCompiledModel {
        *self.last_access.lock() = Instant::now();
        self.compiled.clone()
    }
}

/// Model kinds served by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    ObjectDetector,
    DepthEstimator,
    FaceDetector,
    FaceEmbedder,
    Emotion,
    Age,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::ObjectDetector,
        ModelType::DepthEstimator,
        ModelType::FaceDetector,
        ModelType::FaceEmbedder,
        ModelType::Emotion,
        ModelType::Age,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::ObjectDetector => "object_detector",
            ModelType::DepthEstimator => "depth_estimator",
            ModelType::FaceDetector => "face_detector",
            ModelType::FaceEmbedder => "face_embedder",
            ModelType::Emotion => "emotion",
            ModelType::Age => "age",
        }
    }
}

struct ModelSlot {
    path: PathBuf,
    cached: RwLock<Option<CachedModel>>,
    /// Serialises compiles of this model; `cached` is only write-locked to store the result
    loading: Mutex<()>,
}

/// Lazily compiled models keyed by [`ModelType`]
pub struct ModelPool {
    core: Mutex<Option<SafeCore>>,
    device: String,
    idle_timeout: Option<Duration>,
    slots: HashMap<ModelType, ModelSlot>,
    shutdown: Notify,
}

impl ModelPool {
    /// Create a pool. Nothing is loaded until a model is requested.
    pub fn new(config: &InferenceConfig, models: &ModelsConfig) -> Self {
        let paths = [
            (ModelType::ObjectDetector, &models.object_detector),
            (ModelType::DepthEstimator, &models.depth_estimator),
            (ModelType::FaceDetector, &models.face_detector),
            (ModelType::FaceEmbedder, &models.face_embedder),
            (ModelType::Emotion, &models.emotion),
            (ModelType::Age, &models.age),
        ];

        let slots = paths
            .into_iter()
            .map(|(model_type, path)| {
                (
                    model_type,
                    ModelSlot {
                        path: path.clone(),
                        cached: RwLock::new(None),
                        loading: Mutex::new(()),
                    },
                )
            })
            .collect();

        let idle_timeout = match config.model_idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            core: Mutex::new(None),
            device: config.device.clone(),
            idle_timeout,
            slots,
            shutdown: Notify::new(),
        }
    }

    fn slot(&self, model_type: ModelType) -> &ModelSlot {
        // every variant is inserted in `new`
        &self.slots[&model_type]
    }

    /// Get or load a model
    pub fn get_model(&self, model_type: ModelType) -> anyhow::Result<SafeCompiledModel> {
        let slot = self.slot(model_type);

        if let Some(cached) = slot.cached.read().as_ref() {
            return Ok(cached.touch());
        }

        let _loading = slot.loading.lock();

        // another caller may have finished the compile while we waited
        if let Some(cached) = slot.cached.read().as_ref() {
            return Ok(cached.touch());
        }

        let path = slot.path.to_string_lossy();
        info!("Loading model: {} from {}", model_type.as_str(), path);
        let start = Instant::now();

        let compiled = {
            let mut core_guard = self.core.lock();
            if core_guard.is_none() {
                let core = Core::new().context("Failed to initialize OpenVINO runtime")?;
                *core_guard = Some(SafeCore(core));
            }
            let core = core_guard
                .as_mut()
                .context("OpenVINO runtime unavailable")?;
            let model = core
                .read_model_from_file(&path, "")
                .with_context(|| format!("Failed to read {} model from {}", model_type.as_str(), path))?;
            core.compile_model(&model, self.device.as_str().into())
                .with_context(|| format!("Failed to compile {} model", model_type.as_str()))?
        };
        let safe_compiled = SafeCompiledModel(Arc::new(compiled));

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());

        *slot.cached.write() = Some(CachedModel {
            compiled: safe_compiled.clone(),
            last_access: Mutex::new(Instant::now()),
        });

        Ok(safe_compiled)
    }

    /// Load every model, stopping at the first failure
    pub fn preload(&self) -> anyhow::Result<()> {
        for model_type in ModelType::ALL {
            self.get_model(model_type)?;
        }
        Ok(())
    }

    pub fn is_loaded(&self, model_type: ModelType) -> bool {
        self.slot(model_type).cached.read().is_some()
    }

    /// Loaded state of every model
    pub fn status(&self) -> Vec<(ModelType, bool)> {
        ModelType::ALL
            .into_iter()
            .map(|t| (t, self.is_loaded(t)))
            .collect()
    }

    fn unload_model(&self, model_type: ModelType) {
        let mut write_guard = self.slot(model_type).cached.write();
        if write_guard.is_some() {
            info!("Unloading idle model: {}", model_type.as_str());
            *write_guard = None;
        }
    }

    fn cleanup_idle_models(&self, idle_timeout: Duration) {
        let now = Instant::now();

        for model_type in ModelType::ALL {
            let should_unload = match *self.slot(model_type).cached.read() {
                Some(ref cached) => now.duration_since(*cached.last_access.lock()) > idle_timeout,
                None => false,
            };

            if should_unload {
                self.unload_model(model_type);
            }
        }
    }

    /// Periodically unload idle models until [`ModelPool::shutdown`] is called.
    /// Returns immediately when unloading is disabled.
    pub async fn start_cleanup_task(self: Arc<Self>) {
        let Some(idle_timeout) = self.idle_timeout else {
            debug!("Model idle unloading disabled");
            return;
        };
        let check_interval = Duration::from_secs(60).min(idle_timeout);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {
                    debug!("Running model cleanup check");
                    self.cleanup_idle_models(idle_timeout);
                }
                _ = self.shutdown.notified() => {
                    info!("Model pool cleanup task shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Drop for ModelPool {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn pool(idle: u64) -> ModelPool {
        let mut config = Config::default();
        config.inference.model_idle_timeout = idle;
        ModelPool::new(&config.inference, &config.models)
    }

    #[test]
    fn test_model_type_as_str() {
        assert_eq!(ModelType::ObjectDetector.as_str(), "object_detector");
        assert_eq!(ModelType::DepthEstimator.as_str(), "depth_estimator");
        assert_eq!(ModelType::Age.as_str(), "age");
    }

    #[test]
    fn test_new_pool_has_nothing_loaded() {
        let pool = pool(0);
        let status = pool.status();
        assert_eq!(status.len(), ModelType::ALL.len());
        assert!(status.iter().all(|(_, loaded)| !loaded));
    }

    #[test]
    fn test_status_does_not_wait_for_a_load() {
        let pool = Arc::new(pool(0));
        let slot = pool.slot(ModelType::DepthEstimator);
        let _loading = slot.loading.lock();

        let shared = pool.clone();
        let handle = std::thread::spawn(move || shared.status());
        let start = Instant::now();
        while !handle.is_finished() {
            assert!(start.elapsed() < Duration::from_secs(5), "status blocked behind a load");
            std::thread::sleep(Duration::from_millis(5));
        }
        let status = handle.join().unwrap();
        assert!(status.iter().all(|(_, loaded)| !loaded));
    }

    #[test]
    fn test_failed_load_leaves_slot_empty() {
        let mut config = Config::default();
        config.models.age = PathBuf::from("/nonexistent/age.onnx");
        let pool = ModelPool::new(&config.inference, &config.models);

        assert!(pool.get_model(ModelType::Age).is_err());
        assert!(!pool.is_loaded(ModelType::Age));
        assert!(pool.slot(ModelType::Age).loading.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_task_returns_when_disabled() {
        let pool = Arc::new(pool(0));
        // would loop forever if the timeout were honoured
        pool.start_cleanup_task().await;
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let pool = Arc::new(pool(300));
        let handle = tokio::spawn(pool.clone().start_cleanup_task());
        tokio::task::yield_now().await;
        pool.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
