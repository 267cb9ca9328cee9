use crate::artifacts::RetentionPolicy;
use crate::diffusion::{ComputeDevice, DevicePreference};
use crate::pipeline::PipelineSettings;
use crate::tools::{ToolCommand, ToolCommands};
use anyhow::{anyhow, bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "EMOTION_ILLUSTRATOR_CONFIG";
const ENV_OUTPUT_DIR: &str = "EMOTION_ILLUSTRATOR_OUTPUT_DIR";
const ENV_MODEL_DIR: &str = "EMOTION_ILLUSTRATOR_MODEL_DIR";
const ENV_WORKER_URL: &str = "EMOTION_ILLUSTRATOR_WORKER_URL";
const ENV_DEVICE: &str = "EMOTION_ILLUSTRATOR_DEVICE";
const ENV_TOOL_TIMEOUT: &str = "EMOTION_ILLUSTRATOR_TOOL_TIMEOUT_SECS";

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    output_dir: PathBuf,
    model_dir: PathBuf,
    worker_url: Option<String>,
    worker_timeout_secs: u64,
    device: DevicePreference,
    tools: ToolCommands,
    /// 0 disables the limit
    tool_timeout_secs: u64,
    retention: RetentionPolicy,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => Some(path),
            None => Self::default_config_path().ok(),
        };
        if let Some(path) = path.filter(|p| p.exists()) {
            let partial = read_partial(&path)?;
            config.apply_partial(partial)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn worker_url(&self) -> Option<&str> {
        self.worker_url.as_deref()
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn device(&self) -> DevicePreference {
        self.device
    }

    pub fn tools(&self) -> &ToolCommands {
        &self.tools
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }

    pub fn set_device(&mut self, device: DevicePreference) {
        self.device = device;
    }

    pub fn pipeline_settings(&self, device: ComputeDevice) -> PipelineSettings {
        PipelineSettings {
            output_dir: self.output_dir.clone(),
            tools: self.tools.clone(),
            tool_timeout: self.tool_timeout(),
            device,
            retention: self.retention,
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) -> Result<()> {
        if let Some(dir) = partial.output_dir {
            self.output_dir = dir;
        }
        if let Some(dir) = partial.model_dir {
            self.model_dir = dir;
        }
        if let Some(url) = partial.worker_url {
            self.worker_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(secs) = partial.worker_timeout_secs {
            self.worker_timeout_secs = secs;
        }
        if let Some(device) = partial.device {
            self.device = device;
        }
        if let Some(secs) = partial.tool_timeout_secs {
            self.tool_timeout_secs = secs;
        }

        let tools = partial.tools;
        for (slot, command) in [
            (&mut self.tools.music_generator, tools.music_generator),
            (&mut self.tools.midi_renderer, tools.midi_renderer),
            (&mut self.tools.audio_transcoder, tools.audio_transcoder),
            (&mut self.tools.score_engraver, tools.score_engraver),
        ] {
            if let Some(command) = command {
                *slot = command;
            }
        }

        let retention = partial.retention;
        if let Some(max_sets) = retention.max_sets {
            if max_sets == 0 {
                bail!("retention.max_sets must keep at least one set (use -1 to keep everything)");
            }
            self.retention.max_sets = usize::try_from(max_sets).ok();
        }
        if let Some(hours) = retention.max_age_hours {
            self.retention.max_age = (hours > 0).then(|| Duration::from_secs(hours * 3600));
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_OUTPUT_DIR) {
            if !value.trim().is_empty() {
                self.output_dir = PathBuf::from(value);
            }
        }
        if let Some(value) = lookup(ENV_MODEL_DIR) {
            if !value.trim().is_empty() {
                self.model_dir = PathBuf::from(value);
            }
        }
        if let Some(value) = lookup(ENV_WORKER_URL) {
            if value.trim().is_empty() {
                self.worker_url = None;
            } else {
                self.worker_url = Some(value);
            }
        }
        if let Some(value) = lookup(ENV_DEVICE) {
            if !value.trim().is_empty() {
                self.device = value.parse().map_err(|e| anyhow!("{}: {}", ENV_DEVICE, e))?;
            }
        }
        if let Some(value) = lookup(ENV_TOOL_TIMEOUT) {
            if !value.trim().is_empty() {
                self.tool_timeout_secs = value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a whole number of seconds", ENV_TOOL_TIMEOUT))?;
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            model_dir: default_model_dir(),
            worker_url: None,
            worker_timeout_secs: DEFAULT_WORKER_TIMEOUT_SECS,
            device: DevicePreference::Auto,
            tools: ToolCommands::default(),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            retention: RetentionPolicy::default(),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "EmotionIllustrator", "emotion-illustrator")
        .ok_or_else(|| anyhow!("unable to determine config directory"))
}

fn default_model_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("models").join("emotion-classifier"))
        .unwrap_or_else(|_| PathBuf::from("./models/emotion-classifier"))
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    output_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    worker_url: Option<String>,
    worker_timeout_secs: Option<u64>,
    device: Option<DevicePreference>,
    tool_timeout_secs: Option<u64>,
    tools: PartialTools,
    retention: PartialRetention,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialTools {
    music_generator: Option<ToolCommand>,
    midi_renderer: Option<ToolCommand>,
    audio_transcoder: Option<ToolCommand>,
    score_engraver: Option<ToolCommand>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialRetention {
    /// Negative keeps everything
    max_sets: Option<i64>,
    /// 0 disables the age limit
    max_age_hours: Option<u64>,
}
