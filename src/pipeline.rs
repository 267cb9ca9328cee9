//! Request orchestration
//!
//! One submission flows through a fixed plan:
//!
//! 1. classify the narrative
//! 2. allocate the five output paths
//! 3. music generator -> `.mid`
//! 4. MIDI renderer -> `.wav`
//! 5. audio transcoder -> `.mp3`
//! 6. score engraver -> `.png`
//! 7. image model -> `_image.png`
//!
//! Each step declares the files it reads and the file it must leave behind.
//! A step only counts as done when its program succeeded *and* its output
//! exists and parses as the expected format. The first failure stops the
//! plan and removes every file the request produced.

use crate::artifacts::{self, ArtifactKind, ArtifactSet, RetentionPolicy};
use crate::classifier::{Classification, EmotionClassifier, EmotionLabel};
use crate::diffusion::{illustration_prompt, ComputeDevice, ImageRequest, ImageSynthesizer, SynthesisError};
use crate::error::{PipelineError, RequestFailure, Stage};
use crate::presenter::{self, PresentedResult};
use crate::submission::Submission;
use crate::tools::{self, ExternalTool, ToolCommands, ToolInvocation};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything the orchestrator needs besides the two models
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub tools: ToolCommands,
    /// Per external program; `None` waits forever
    pub tool_timeout: Option<Duration>,
    pub device: ComputeDevice,
    pub retention: RetentionPolicy,
}

/// Receives stage transitions while a request runs
pub trait ProgressSink: Send + Sync {
    fn stage_started(&self, stage: Stage);
    fn stage_finished(&self, stage: Stage);
    fn stage_failed(&self, _failure: &RequestFailure) {}
}

/// Writes progress to the log and nowhere else
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn stage_started(&self, stage: Stage) {
        info!("{}...", stage);
    }

    fn stage_finished(&self, stage: Stage) {
        debug!("{} done", stage);
    }

    fn stage_failed(&self, failure: &RequestFailure) {
        warn!("{}", failure);
    }
}

/// A request that went all the way through
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Illustration {
    pub submission: Submission,
    pub classification: Classification,
    pub prompt: String,
    pub artifacts: ArtifactSet,
}

#[derive(Debug)]
pub enum Outcome {
    /// Blank narrative: nothing ran and nothing was written
    Skipped,
    Completed(Illustration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Tool(ToolInvocation),
    Illustrate(ImageRequest),
}

/// One unit of work and the file it must produce
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub stage: Stage,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub kind: ArtifactKind,
    pub action: StepAction,
}

/// Lay out the generation steps for one request
pub fn plan_steps(
    settings: &PipelineSettings,
    submission: &Submission,
    emotion: &EmotionLabel,
    artifacts: &ArtifactSet,
) -> Vec<Step> {
    let tools = &settings.tools;
    let tool_step = |invocation: ToolInvocation, inputs: Vec<&Path>, kind: ArtifactKind| Step {
        stage: Stage::from(invocation.tool),
        inputs: inputs.into_iter().map(Path::to_path_buf).collect(),
        output: artifacts.path(kind).to_path_buf(),
        kind,
        action: StepAction::Tool(invocation),
    };

    vec![
        tool_step(
            ToolInvocation::music_generator(
                &tools.music_generator,
                &artifacts.midi_path,
                emotion.as_str(),
                &submission.intensity_arg(),
            ),
            vec![],
            ArtifactKind::Midi,
        ),
        tool_step(
            ToolInvocation::midi_renderer(&tools.midi_renderer, &artifacts.midi_path, &artifacts.wav_path),
            vec![artifacts.midi_path.as_path()],
            ArtifactKind::Wav,
        ),
        tool_step(
            ToolInvocation::audio_transcoder(&tools.audio_transcoder, &artifacts.wav_path, &artifacts.mp3_path),
            vec![artifacts.wav_path.as_path()],
            ArtifactKind::Mp3,
        ),
        tool_step(
            ToolInvocation::score_engraver(
                &tools.score_engraver,
                &artifacts.midi_path,
                &artifacts.score_image_path,
            ),
            vec![artifacts.midi_path.as_path()],
            ArtifactKind::ScoreImage,
        ),
        Step {
            stage: Stage::Illustration,
            inputs: vec![],
            output: artifacts.illustration_path.clone(),
            kind: ArtifactKind::Illustration,
            action: StepAction::Illustrate(ImageRequest::new(
                illustration_prompt(submission.style, emotion),
                settings.device,
            )),
        },
    ]
}

/// Turns submissions into artifact sets
///
/// Both models are loaded by the caller and shared across requests. Requests
/// are served one at a time, in arrival order.
pub struct Illustrator {
    classifier: Arc<dyn EmotionClassifier>,
    synthesizer: Arc<dyn ImageSynthesizer>,
    settings: PipelineSettings,
    // tokio's Mutex queues waiters fairly
    gate: Mutex<()>,
}

impl Illustrator {
    pub fn new(
        classifier: Arc<dyn EmotionClassifier>,
        synthesizer: Arc<dyn ImageSynthesizer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            classifier,
            synthesizer,
            settings,
            gate: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Generate all five artifacts for a submission
    pub async fn handle(&self, submission: Submission, progress: &dyn ProgressSink) -> Result<Outcome, RequestFailure> {
        if submission.is_blank() {
            debug!("Blank narrative, nothing to do");
            return Ok(Outcome::Skipped);
        }

        let _turn = self.gate.lock().await;
        let illustration = self.generate(submission, progress).await?;
        self.sweep_outputs().await;
        Ok(Outcome::Completed(illustration))
    }

    /// Generate, then load the results for display
    ///
    /// The files are read back before the next request can start, so a
    /// retention sweep never races the presenter.
    pub async fn illustrate(
        &self,
        submission: Submission,
        progress: &dyn ProgressSink,
    ) -> Result<Option<PresentedResult>, RequestFailure> {
        if submission.is_blank() {
            debug!("Blank narrative, nothing to do");
            return Ok(None);
        }

        let _turn = self.gate.lock().await;
        let illustration = self.generate(submission, progress).await?;

        progress.stage_started(Stage::Presentation);
        let presented = match presenter::present(&illustration).await {
            Ok(presented) => presented,
            Err(e) => {
                let failure = RequestFailure::new(Stage::Presentation, e);
                progress.stage_failed(&failure);
                illustration.artifacts.remove_all().await;
                return Err(failure);
            }
        };
        progress.stage_finished(Stage::Presentation);

        self.sweep_outputs().await;
        Ok(Some(presented))
    }

    async fn generate(&self, submission: Submission, progress: &dyn ProgressSink) -> Result<Illustration, RequestFailure> {
        let submission = submission
            .validate()
            .map_err(|e| RequestFailure::new(Stage::Input, e))?;

        progress.stage_started(Stage::Classification);
        let classification = match self.classifier.classify(&submission.narrative).await {
            Ok(classification) => classification,
            Err(e) => {
                let failure = RequestFailure::new(Stage::Classification, e);
                progress.stage_failed(&failure);
                return Err(failure);
            }
        };
        progress.stage_finished(Stage::Classification);
        info!(
            "Detected emotion: {} ({:.2})",
            classification.label, classification.score
        );

        let artifacts = ArtifactSet::allocate(&self.settings.output_dir)
            .await
            .map_err(|e| RequestFailure::new(Stage::Naming, e))?;
        let steps = plan_steps(&self.settings, &submission, &classification.label, &artifacts);

        let span = info_span!("request", id = %artifacts.id);
        if let Err(failure) = self.run_steps(&steps, &artifacts, progress).instrument(span).await {
            progress.stage_failed(&failure);
            artifacts.remove_all().await;
            return Err(failure);
        }

        info!("Artifact set {} complete", artifacts.id);
        Ok(Illustration {
            prompt: illustration_prompt(submission.style, &classification.label),
            submission,
            classification,
            artifacts,
        })
    }

    async fn run_steps(
        &self,
        steps: &[Step],
        artifacts: &ArtifactSet,
        progress: &dyn ProgressSink,
    ) -> Result<(), RequestFailure> {
        for step in steps {
            progress.stage_started(step.stage);
            let started = Instant::now();
            self.run_step(step, artifacts)
                .await
                .map_err(|e| RequestFailure::new(step.stage, e))?;
            debug!("{} took {:.1?}", step.stage, started.elapsed());
            progress.stage_finished(step.stage);
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step, artifacts: &ArtifactSet) -> Result<(), PipelineError> {
        for input in &step.inputs {
            if !tokio::fs::try_exists(input).await? {
                return Err(PipelineError::MissingArtifact(input.clone()));
            }
        }

        match &step.action {
            StepAction::Tool(invocation) => {
                invocation
                    .run(self.settings.tool_timeout)
                    .await
                    .map_err(|e| PipelineError::tool(invocation.tool, e))?;

                if invocation.tool == ExternalTool::ScoreEngraver {
                    tools::adopt_first_page(&step.output).await?;
                    // Only the first page is shown
                    let dropped = artifacts.remove_score_pages().await;
                    if dropped > 0 {
                        debug!("Dropped {} extra score page(s)", dropped);
                    }
                }
            }
            StepAction::Illustrate(request) => {
                debug!("Prompt: {}", request.prompt);
                let images = self.synthesizer.synthesize(request).await?;
                let first = images
                    .into_iter()
                    .next()
                    .ok_or(SynthesisError::NoImages)?;
                tokio::fs::write(&step.output, &first.png).await?;
            }
        }

        verify_output(&step.output, step.kind).await
    }

    async fn sweep_outputs(&self) {
        let dir = self.settings.output_dir.clone();
        let policy = self.settings.retention;
        let swept = tokio::task::spawn_blocking(move || artifacts::sweep(&dir, policy, SystemTime::now())).await;

        match swept {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Retention sweep failed: {}", e),
            Err(e) => warn!("Retention sweep task failed: {}", e),
        }
    }
}

/// The output must exist and parse as its format
async fn verify_output(path: &Path, kind: ArtifactKind) -> Result<(), PipelineError> {
    if !tokio::fs::try_exists(path).await? {
        return Err(PipelineError::MissingArtifact(path.to_path_buf()));
    }

    let owned = path.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || artifact_probe::probe(&owned, kind.format()))
        .await
        .map_err(io::Error::other)?
        .map_err(|e| PipelineError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        })?;

    debug!("{} ok: {}", kind, summary);
    Ok(())
}
