//! Provider outcome types, platform-agnostic

use std::collections::HashMap;

pub use crate::schemas::FaceRecord;

/// Content-moderation verdict synthesized from label scores
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    pub is_safe: bool,
    pub confidence: f64,
    pub scores: HashMap<String, f64>,
    pub top_label: String,
}

/// Image tags, highest score first
#[derive(Debug, Clone, PartialEq)]
pub struct TaggingOutcome {
    pub tags: Vec<String>,
    pub scores: HashMap<String, f64>,
}

/// Best-matching scene plus the labels that cleared the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct SceneOutcome {
    pub scene: String,
    pub confidence: f64,
    pub scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionOutcome {
    pub caption: String,
}

/// Detected faces with fixed-dimension embeddings
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub faces_detected: usize,
    pub faces: Vec<FaceRecord>,
}
