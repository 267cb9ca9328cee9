use crate::artifacts::ArtifactId;
use crate::config::AppConfig;
use crate::loggerbridge::Logger;
use crate::presenter::{self, Download, PresentedResult};
use crate::startup::{build_illustrator, IllustratorState};
use crate::submission::{FormOptions, Submission};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, Manager, State, WebviewWindow};

/// Runs once at startup; commands fail politely until it finishes
pub async fn init(app: AppHandle, config: AppConfig) {
    let built = build_illustrator(&config).await;
    app.state::<IllustratorState>().record(built);
}

#[tauri::command]
pub fn form_options() -> FormOptions {
    FormOptions::default()
}

/// `None` when the narrative was blank
#[tauri::command]
pub async fn illustrate_emotion(
    submission: Submission,
    window: WebviewWindow,
    state: State<'_, IllustratorState>,
) -> Result<Option<PresentedResult>, String> {
    let illustrator = state.ready()?;
    let logger = Logger {
        window: Arc::new(window),
    };
    Ok(illustrator.illustrate(submission, &logger).await?)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SaveParams {
    pub id: String,
    pub download: Download,
    pub destination: String,
}

#[tauri::command]
pub async fn save_artifact(params: SaveParams, state: State<'_, IllustratorState>) -> Result<String, String> {
    let id = ArtifactId::parse(&params.id).ok_or_else(|| format!("Invalid result id: {}", params.id))?;
    let saved = presenter::save_artifact(
        &state.output_dir,
        id,
        params.download,
        &PathBuf::from(params.destination),
    )
    .await?;
    Ok(saved.display().to_string())
}
