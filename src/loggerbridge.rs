use crate::error::{RequestFailure, Stage};
use crate::pipeline::ProgressSink;
use std::sync::Arc;
use tauri::{Emitter, WebviewWindow};
use tracing::{info, warn};

pub const PROGRESS_EVENT: &str = "pipeline-progress";

#[derive(Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub stage: Stage,
    pub status: &'static str,
    pub message: String,
}

/// Forwards stage transitions to the main window
#[derive(Clone)]
pub struct Logger {
    pub window: Arc<WebviewWindow>,
}

impl Logger {
    fn emit(&self, stage: Stage, status: &'static str, message: String) {
        let payload = ProgressPayload {
            stage,
            status,
            message,
        };
        if let Err(e) = self.window.emit_to("main", PROGRESS_EVENT, payload) {
            warn!("Failed to emit progress event: {}", e);
        }
    }
}

impl ProgressSink for Logger {
    fn stage_started(&self, stage: Stage) {
        info!("{}...", stage);
        self.emit(stage, "started", format!("{}...", stage));
    }

    fn stage_finished(&self, stage: Stage) {
        self.emit(stage, "finished", format!("{} done", stage));
    }

    fn stage_failed(&self, failure: &RequestFailure) {
        warn!("{}", failure);
        self.emit(failure.stage, "failed", failure.to_string());
    }
}
