use super::{
    top_prediction, Classification, ClassifierError, EmotionClassifier, EmotionLabel,
    DEFAULT_LABELS,
};
use async_trait::async_trait;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// RoBERTa-style encoders accept at most 512 positions
const MAX_TOKENS: usize = 512;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const CONFIG_FILE: &str = "config.json";

/// Single-label text classifier exported to ONNX
///
/// The model directory holds `model.onnx`, `tokenizer.json` and optionally the
/// exporter's `config.json`, whose `id2label` table names the output classes.
pub struct OnnxEmotionClassifier {
    inner: Arc<Inner>,
    labels: Vec<EmotionLabel>,
}

struct Inner {
    // Session::run needs exclusive access
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

#[derive(Deserialize, Default)]
struct ModelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

impl OnnxEmotionClassifier {
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        info!("Loading emotion classifier from {}", model_dir.display());

        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(load_error)?
            .commit_from_file(model_dir.join(MODEL_FILE))
            .map_err(load_error)?;

        let tokenizer = tokenizers::Tokenizer::from_file(model_dir.join(TOKENIZER_FILE))
            .map_err(|e| ClassifierError::Load(format!("{}: {}", TOKENIZER_FILE, e)))?;

        let labels = load_labels(&model_dir.join(CONFIG_FILE))?;
        info!("Emotion classifier ready ({} labels)", labels.len());

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
            }),
            labels,
        })
    }
}

#[async_trait]
impl EmotionClassifier for OnnxEmotionClassifier {
    async fn classify(&self, narrative: &str) -> Result<Classification, ClassifierError> {
        let inner = Arc::clone(&self.inner);
        let text = narrative.to_string();

        // Inference is CPU bound; keep it off the async workers
        let logits = tokio::task::spawn_blocking(move || inner.logits(&text))
            .await
            .map_err(|e| ClassifierError::Inference(format!("Task error: {}", e)))??;

        let top = top_prediction(&logits, &self.labels)?;
        debug!("Classified narrative as {} ({:.3})", top.label, top.score);
        Ok(top)
    }

    fn labels(&self) -> &[EmotionLabel] {
        &self.labels
    }
}

impl Inner {
    fn logits(&self, text: &str) -> Result<Vec<f32>, ClassifierError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ClassifierError::Tokenize(e.to_string()))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mut mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        truncate_keeping_last(&mut ids, MAX_TOKENS);
        truncate_keeping_last(&mut mask, MAX_TOKENS);

        let seq_len = ids.len();
        let input_ids = Array2::from_shape_vec((1, seq_len), ids)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let attention_mask = Array2::from_shape_vec((1, seq_len), mask)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let input_ids = Tensor::from_array(input_ids)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let attention_mask = Tensor::from_array(attention_mask)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("classifier session poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            })
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let logits = outputs["logits"]
            .try_extract_array::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        Ok(logits.iter().copied().collect())
    }
}

fn load_error(e: impl std::fmt::Display) -> ClassifierError {
    ClassifierError::Load(format!("{}: {}", MODEL_FILE, e))
}

/// Shorten to `max` entries, keeping the final one (the end-of-sequence token)
fn truncate_keeping_last(values: &mut Vec<i64>, max: usize) {
    if values.len() <= max || max == 0 {
        return;
    }
    if let Some(last) = values.last().copied() {
        values.truncate(max - 1);
        values.push(last);
    }
}

/// Read class names from `id2label`, falling back to the default seven
fn load_labels(config_path: &Path) -> Result<Vec<EmotionLabel>, ClassifierError> {
    if !config_path.exists() {
        return Ok(DEFAULT_LABELS.iter().map(EmotionLabel::new).collect());
    }

    let json = std::fs::read_to_string(config_path)
        .map_err(|e| ClassifierError::Load(format!("{}: {}", config_path.display(), e)))?;
    labels_from_config(&json)
}

fn labels_from_config(json: &str) -> Result<Vec<EmotionLabel>, ClassifierError> {
    let config: ModelConfig = serde_json::from_str(json)
        .map_err(|e| ClassifierError::Load(format!("{}: {}", CONFIG_FILE, e)))?;

    if config.id2label.is_empty() {
        return Ok(DEFAULT_LABELS.iter().map(EmotionLabel::new).collect());
    }

    let mut indexed = Vec::with_capacity(config.id2label.len());
    for (id, label) in config.id2label {
        let index: usize = id
            .parse()
            .map_err(|_| ClassifierError::Load(format!("Invalid label id in id2label: {}", id)))?;
        indexed.push((index, EmotionLabel::new(label)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    // ids must be 0..n with no gaps, otherwise logits and labels misalign
    if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
        return Err(ClassifierError::Load(
            "id2label ids are not contiguous from 0".to_string(),
        ));
    }

    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_final_token() {
        let mut ids: Vec<i64> = (0..600).collect();
        truncate_keeping_last(&mut ids, MAX_TOKENS);
        assert_eq!(ids.len(), MAX_TOKENS);
        assert_eq!(ids[MAX_TOKENS - 2], (MAX_TOKENS - 2) as i64);
        assert_eq!(*ids.last().unwrap(), 599);

        let mut short = vec![0, 1, 2];
        truncate_keeping_last(&mut short, MAX_TOKENS);
        assert_eq!(short, vec![0, 1, 2]);
    }

    #[test]
    fn labels_follow_id_order() {
        let json = r#"{
            "architectures": ["RobertaForSequenceClassification"],
            "id2label": {"2": "Fear", "0": "Anger", "1": "Disgust", "3": "Joy"}
        }"#;
        let labels = labels_from_config(json).unwrap();
        let names: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
        assert_eq!(names, vec!["anger", "disgust", "fear", "joy"]);
    }

    #[test]
    fn missing_id2label_uses_defaults() {
        let labels = labels_from_config(r#"{"model_type": "roberta"}"#).unwrap();
        assert_eq!(labels.len(), DEFAULT_LABELS.len());
        assert_eq!(labels[5].as_str(), "sadness");
    }

    #[test]
    fn gaps_in_ids_are_rejected() {
        let json = r#"{"id2label": {"0": "joy", "2": "fear"}}"#;
        assert!(matches!(
            labels_from_config(json),
            Err(ClassifierError::Load(_))
        ));
    }

    #[test]
    fn load_reports_missing_model() {
        let dir = std::env::temp_dir().join("emotion-illustrator-no-model-here");
        assert!(matches!(
            OnnxEmotionClassifier::load(&dir),
            Err(ClassifierError::Load(_))
        ));
    }
}
