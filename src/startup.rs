use crate::classifier::OnnxEmotionClassifier;
use crate::config::AppConfig;
use crate::diffusion::DiffusionWorkerClient;
use crate::pipeline::Illustrator;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Load the classifier, connect the image worker and build the orchestrator
pub async fn build_illustrator(config: &AppConfig) -> Result<Illustrator> {
    let model_dir = config.model_dir().to_path_buf();
    let classifier = tokio::task::spawn_blocking(move || OnnxEmotionClassifier::load(&model_dir))
        .await
        .context("classifier loader panicked")?
        .with_context(|| format!("failed to load the classifier from {}", config.model_dir().display()))?;

    let synthesizer = DiffusionWorkerClient::new(config.worker_url(), config.worker_timeout())?;
    let device = config.device().resolve().await;
    info!("Using image worker at {}", synthesizer.base_url());

    Ok(Illustrator::new(
        Arc::new(classifier),
        Arc::new(synthesizer),
        config.pipeline_settings(device),
    ))
}

/// Shared by every desktop command; the models load in the background at startup
pub struct IllustratorState {
    started: OnceCell<Result<Arc<Illustrator>, String>>,
    pub output_dir: PathBuf,
}

impl IllustratorState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            started: OnceCell::new(),
            output_dir: config.output_dir().to_path_buf(),
        }
    }

    /// Keep the outcome of startup, good or bad. Only the first call counts.
    pub fn record(&self, built: Result<Illustrator>) {
        let outcome = match built {
            Ok(illustrator) => {
                info!("Illustrator ready");
                Ok(Arc::new(illustrator))
            }
            Err(e) => {
                error!("Failed to start the illustrator: {:#}", e);
                Err(format!("Le démarrage a échoué : {:#}", e))
            }
        };
        let _ = self.started.set(outcome);
    }

    pub fn ready(&self) -> Result<Arc<Illustrator>, String> {
        match self.started.get() {
            None => Err("Les modèles sont en cours de chargement, réessayez dans un instant".to_string()),
            Some(outcome) => outcome.clone(),
        }
    }
}
