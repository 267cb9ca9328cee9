// External generators
// Command-line contracts of the four programs the pipeline shells out to

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// How much of a failing tool's stderr to keep in the error
const STDERR_TAIL_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExternalTool {
    MusicGenerator,
    MidiRenderer,
    AudioTranscoder,
    ScoreEngraver,
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalTool::MusicGenerator => "music generator",
            ExternalTool::MidiRenderer => "MIDI renderer",
            ExternalTool::AudioTranscoder => "audio transcoder",
            ExternalTool::ScoreEngraver => "score engraver",
        };
        f.write_str(name)
    }
}

/// A program plus the arguments that precede the contract arguments
///
/// `node generate_music.js` is `{ program: "node", args: ["generate_music.js"] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Programs used for each tool
///
/// The default music generator is a Node script, `generate_music.js`, that is
/// not part of this crate. It drives a MusicVAE model from `@magenta/music` and
/// is looked up relative to the working directory. Any program that writes a
/// MIDI file to its first argument, given `emotion` and `intensity` after it,
/// can take its place through `[tools.music_generator]` in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolCommands {
    pub music_generator: ToolCommand,
    pub midi_renderer: ToolCommand,
    pub audio_transcoder: ToolCommand,
    pub score_engraver: ToolCommand,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            music_generator: ToolCommand::with_args("node", ["generate_music.js"]),
            midi_renderer: ToolCommand::new("timidity"),
            audio_transcoder: ToolCommand::new("ffmpeg"),
            score_engraver: ToolCommand::new("mscore"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Exited with {}{}", describe_exit(.exit_code), stderr_suffix(.stderr))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

impl ToolError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// One fully-formed external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: ExternalTool,
    pub program: String,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    fn build(tool: ExternalTool, command: &ToolCommand, contract: Vec<OsString>) -> Self {
        let mut args: Vec<OsString> = command.args.iter().map(OsString::from).collect();
        args.extend(contract);
        Self {
            tool,
            program: command.program.clone(),
            args,
        }
    }

    /// `(midi_out, emotion, intensity)`
    pub fn music_generator(command: &ToolCommand, midi_out: &Path, emotion: &str, intensity: &str) -> Self {
        Self::build(
            ExternalTool::MusicGenerator,
            command,
            vec![midi_out.into(), emotion.into(), intensity.into()],
        )
    }

    /// `(midi_in, -Ow, -o, wav_out)`
    pub fn midi_renderer(command: &ToolCommand, midi_in: &Path, wav_out: &Path) -> Self {
        Self::build(
            ExternalTool::MidiRenderer,
            command,
            vec![midi_in.into(), "-Ow".into(), "-o".into(), wav_out.into()],
        )
    }

    /// `(-y, -i, wav_in, mp3_out)`, overwriting any existing output
    pub fn audio_transcoder(command: &ToolCommand, wav_in: &Path, mp3_out: &Path) -> Self {
        Self::build(
            ExternalTool::AudioTranscoder,
            command,
            vec!["-y".into(), "-i".into(), wav_in.into(), mp3_out.into()],
        )
    }

    /// `(midi_in, -o, png_out)`
    pub fn score_engraver(command: &ToolCommand, midi_in: &Path, png_out: &Path) -> Self {
        Self::build(
            ExternalTool::ScoreEngraver,
            command,
            vec![midi_in.into(), "-o".into(), png_out.into()],
        )
    }

    /// Command line for logs
    pub fn display_command(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run to completion, failing on a non-zero exit or after `timeout`
    ///
    /// The child is killed if it times out or if this future is dropped.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<(), ToolError> {
        debug!("Running {}: {}", self.tool, self.display_command());

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ToolError::Launch {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("...{}", tail)
}

/// Engravers that export one PNG per page write `name-1.png` instead of
/// `name.png`. Move the first page into place when that happened.
pub async fn adopt_first_page(expected: &Path) -> std::io::Result<bool> {
    if tokio::fs::try_exists(expected).await? {
        return Ok(false);
    }

    let Some(first_page) = first_page_path(expected) else {
        return Ok(false);
    };
    if !tokio::fs::try_exists(&first_page).await? {
        return Ok(false);
    }

    tokio::fs::rename(&first_page, expected).await?;
    debug!("Moved {} to {}", first_page.display(), expected.display());
    Ok(true)
}

fn first_page_path(expected: &Path) -> Option<PathBuf> {
    let stem = expected.file_stem()?.to_str()?;
    let ext = expected.extension()?.to_str()?;
    Some(expected.with_file_name(format!("{}-1.{}", stem, ext)))
}
