// Emotion classification
// Maps a free-text narrative to the single most likely emotion label

pub mod onnx;

pub use onnx::OnnxEmotionClassifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Label order of the seven-class English emotion models
pub const DEFAULT_LABELS: [&str; 7] = [
    "anger", "disgust", "fear", "joy", "neutral", "sadness", "surprise",
];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Failed to load classifier: {0}")]
    Load(String),

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model produced {got} scores for {expected} labels")]
    LabelMismatch { expected: usize, got: usize },

    #[error("Model produced no scores")]
    EmptyOutput,
}

/// A lower-cased emotion label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionLabel(String);

impl EmotionLabel {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// "sadness" -> "Sadness", for display
    pub fn capitalized(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Top-ranked class for one narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: EmotionLabel,
    pub score: f32,
}

/// Text classifier loaded once and shared by every request
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, narrative: &str) -> Result<Classification, ClassifierError>;

    /// Labels this classifier can return, already lower-cased
    fn labels(&self) -> &[EmotionLabel];
}

/// Softmax over raw logits, then pick the highest-scoring label
pub fn top_prediction(
    logits: &[f32],
    labels: &[EmotionLabel],
) -> Result<Classification, ClassifierError> {
    if logits.is_empty() {
        return Err(ClassifierError::EmptyOutput);
    }
    if logits.len() != labels.len() {
        return Err(ClassifierError::LabelMismatch {
            expected: labels.len(),
            got: logits.len(),
        });
    }

    if logits.iter().any(|l| !l.is_finite()) {
        return Err(ClassifierError::Inference(
            "model produced non-finite scores".to_string(),
        ));
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    let (best, best_exp) = exps
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or(ClassifierError::EmptyOutput)?;

    Ok(Classification {
        label: labels[best].clone(),
        score: best_exp / total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_labels() -> Vec<EmotionLabel> {
        DEFAULT_LABELS.iter().map(EmotionLabel::new).collect()
    }

    #[test]
    fn labels_are_lowercased() {
        assert_eq!(EmotionLabel::new(" Sadness ").as_str(), "sadness");
        assert_eq!(EmotionLabel::new("JOY").capitalized(), "Joy");
        assert_eq!(EmotionLabel::new("").capitalized(), "");
    }

    #[test]
    fn picks_highest_logit() {
        let labels = default_labels();
        let logits = [0.1, -1.0, 0.3, 0.2, 0.0, 4.0, -0.5];
        let top = top_prediction(&logits, &labels).unwrap();
        assert_eq!(top.label.as_str(), "sadness");
        assert!(top.score > 0.8 && top.score <= 1.0);
    }

    #[test]
    fn rejects_mismatched_output() {
        let labels = default_labels();
        assert!(matches!(
            top_prediction(&[1.0, 2.0], &labels),
            Err(ClassifierError::LabelMismatch { expected: 7, got: 2 })
        ));
        assert!(matches!(
            top_prediction(&[], &labels),
            Err(ClassifierError::EmptyOutput)
        ));
    }

    #[test]
    fn rejects_non_finite_logits() {
        let labels = default_labels();
        let mut logits = [0.1, -1.0, 0.3, 0.2, 0.0, 4.0, -0.5];
        logits[2] = f32::NAN;
        assert!(matches!(
            top_prediction(&logits, &labels),
            Err(ClassifierError::Inference(_))
        ));
        logits[2] = f32::INFINITY;
        assert!(matches!(
            top_prediction(&logits, &labels),
            Err(ClassifierError::Inference(_))
        ));
    }

    proptest! {
        #[test]
        fn prediction_is_one_known_label(logits in proptest::collection::vec(-20.0f32..20.0, 7)) {
            let labels = default_labels();
            let top = top_prediction(&logits, &labels).unwrap();
            prop_assert!(labels.contains(&top.label));
            prop_assert_eq!(top.label.as_str(), top.label.as_str().to_lowercase());
            prop_assert!(top.score >= 1.0 / 7.0 - 1e-5 && top.score <= 1.0 + 1e-5);
        }
    }
}
