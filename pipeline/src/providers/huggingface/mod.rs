//! HuggingFace provider implementations

pub mod captioning;
pub mod client;
pub mod face;
pub mod moderation;
pub mod scene;
pub mod tagger;

pub use captioning::HfCaptioningProvider;
pub use face::HfFaceProvider;
pub use moderation::HfModerationProvider;
pub use scene::HfSceneProvider;
pub use tagger::HfTaggerProvider;
