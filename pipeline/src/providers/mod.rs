//! Pluggable AI analysis backends
//!
//! Five task interfaces, each a single method, with a registry that maps
//! `(task, platform)` to a cached provider instance. Platform resolution
//! order: explicit argument → `{TASK}_PLATFORM` env var → `AI_PLATFORM` env
//! var → `"huggingface"`.

pub mod error;
pub mod huggingface;
pub mod types;

pub use error::ProviderError;
pub use types::{
    CaptionOutcome, FaceOutcome, FaceRecord, ModerationOutcome, SceneOutcome, TaggingOutcome,
};

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::constants::{DEFAULT_PLATFORM, ENV_AI_PLATFORM};

// =============================================================================
// Task interfaces
// =============================================================================

#[async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<ModerationOutcome, ProviderError>;
}

#[async_trait]
pub trait TaggingProvider: Send + Sync {
    async fn tag(
        &self,
        image: &[u8],
        top_n: usize,
        threshold: f64,
    ) -> Result<TaggingOutcome, ProviderError>;
}

#[async_trait]
pub trait SceneProvider: Send + Sync {
    async fn recognize(
        &self,
        image: &[u8],
        labels: Option<&[String]>,
        threshold: f64,
        top_n: usize,
    ) -> Result<SceneOutcome, ProviderError>;
}

#[async_trait]
pub trait CaptioningProvider: Send + Sync {
    async fn caption(&self, image: &[u8]) -> Result<CaptionOutcome, ProviderError>;
}

#[async_trait]
pub trait FaceProvider: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<FaceOutcome, ProviderError>;
}

// =============================================================================
// Registry
// =============================================================================

/// Analysis tasks known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Moderation,
    Tagging,
    Scene,
    Captioning,
    Face,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moderation => "moderation",
            Self::Tagging => "tagging",
            Self::Scene => "scene",
            Self::Captioning => "captioning",
            Self::Face => "face",
        }
    }

    /// Per-task platform override env var, e.g. `MODERATION_PLATFORM`
    fn platform_env(&self) -> String {
        format!("{}_PLATFORM", self.as_str().to_uppercase())
    }
}

/// Resolve the platform for a task: explicit argument, `{TASK}_PLATFORM`,
/// `AI_PLATFORM`, then the default.
pub fn resolve_platform(task: Task, explicit: Option<&str>) -> String {
    if let Some(platform) = explicit {
        return platform.to_lowercase();
    }
    std::env::var(task.platform_env())
        .or_else(|_| std::env::var(ENV_AI_PLATFORM))
        .map(|p| p.to_lowercase())
        .unwrap_or_else(|_| DEFAULT_PLATFORM.to_string())
}

/// Caches one provider instance per (task, platform)
pub struct ProviderRegistry {
    embedding_dim: usize,
    moderation: DashMap<String, Arc<dyn ModerationProvider>>,
    tagging: DashMap<String, Arc<dyn TaggingProvider>>,
    scene: DashMap<String, Arc<dyn SceneProvider>>,
    captioning: DashMap<String, Arc<dyn CaptioningProvider>>,
    face: DashMap<String, Arc<dyn FaceProvider>>,
}

impl ProviderRegistry {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            moderation: DashMap::new(),
            tagging: DashMap::new(),
            scene: DashMap::new(),
            captioning: DashMap::new(),
            face: DashMap::new(),
        }
    }

    pub fn moderation(
        &self,
        platform: Option<&str>,
    ) -> Result<Arc<dyn ModerationProvider>, ProviderError> {
        let platform = resolve_platform(Task::Moderation, platform);
        if let Some(cached) = self.moderation.get(&platform) {
            return Ok(Arc::clone(cached.value()));
        }
        let provider: Arc<dyn ModerationProvider> = match platform.as_str() {
            "huggingface" => Arc::new(huggingface::HfModerationProvider::from_env()),
            other => return Err(unknown_platform(Task::Moderation, other)),
        };
        self.moderation.insert(platform, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn tagging(
        &self,
        platform: Option<&str>,
    ) -> Result<Arc<dyn TaggingProvider>, ProviderError> {
        let platform = resolve_platform(Task::Tagging, platform);
        if let Some(cached) = self.tagging.get(&platform) {
            return Ok(Arc::clone(cached.value()));
        }
        let provider: Arc<dyn TaggingProvider> = match platform.as_str() {
            "huggingface" => Arc::new(huggingface::HfTaggerProvider::from_env()),
            other => return Err(unknown_platform(Task::Tagging, other)),
        };
        self.tagging.insert(platform, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn scene(&self, platform: Option<&str>) -> Result<Arc<dyn SceneProvider>, ProviderError> {
        let platform = resolve_platform(Task::Scene, platform);
        if let Some(cached) = self.scene.get(&platform) {
            return Ok(Arc::clone(cached.value()));
        }
        let provider: Arc<dyn SceneProvider> = match platform.as_str() {
            "huggingface" => Arc::new(huggingface::HfSceneProvider::from_env()),
            other => return Err(unknown_platform(Task::Scene, other)),
        };
        self.scene.insert(platform, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn captioning(
        &self,
        platform: Option<&str>,
    ) -> Result<Arc<dyn CaptioningProvider>, ProviderError> {
        let platform = resolve_platform(Task::Captioning, platform);
        if let Some(cached) = self.captioning.get(&platform) {
            return Ok(Arc::clone(cached.value()));
        }
        let provider: Arc<dyn CaptioningProvider> = match platform.as_str() {
            "huggingface" => Arc::new(huggingface::HfCaptioningProvider::from_env()),
            other => return Err(unknown_platform(Task::Captioning, other)),
        };
        self.captioning.insert(platform, Arc::clone(&provider));
        Ok(provider)
    }

    pub fn face(&self, platform: Option<&str>) -> Result<Arc<dyn FaceProvider>, ProviderError> {
        let platform = resolve_platform(Task::Face, platform);
        if let Some(cached) = self.face.get(&platform) {
            return Ok(Arc::clone(cached.value()));
        }
        let provider: Arc<dyn FaceProvider> = match platform.as_str() {
            "huggingface" => Arc::new(huggingface::HfFaceProvider::from_env(self.embedding_dim)),
            other => return Err(unknown_platform(Task::Face, other)),
        };
        self.face.insert(platform, Arc::clone(&provider));
        Ok(provider)
    }
}

fn unknown_platform(task: Task, platform: &str) -> ProviderError {
    ProviderError::Config(format!(
        "No provider registered for task='{}', platform='{platform}'",
        task.as_str()
    ))
}
