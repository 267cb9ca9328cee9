//! Illustration synthesis
//!
//! The diffusion model runs in a separate worker process that owns the GPU.
//! It is loaded once and reached over HTTP; the orchestrator only sees the
//! [`ImageSynthesizer`] trait so tests can swap in a fake.

use crate::classifier::EmotionLabel;
use crate::submission::Style;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Denoising steps per illustration
pub const INFERENCE_STEPS: u32 = 30;

pub const DEFAULT_WORKER_URL: &str = "http://127.0.0.1:7860";

/// `"an {style} painting illustrating the emotion {emotion}"`
pub fn illustration_prompt(style: Style, emotion: &EmotionLabel) -> String {
    format!(
        "an {} painting illustrating the emotion {}",
        style.prompt_term(),
        emotion
    )
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Invalid worker URL: {0}")]
    Url(String),

    #[error("Worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Worker responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Model returned no images")]
    NoImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Float16,
    Float32,
}

impl ComputeDevice {
    /// Half precision on the GPU, full precision on the CPU
    pub fn precision(&self) -> Precision {
        match self {
            ComputeDevice::Cuda => Precision::Float16,
            ComputeDevice::Cpu => Precision::Float32,
        }
    }
}

/// Which device to run the diffusion model on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cuda,
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(format!("unknown device '{}' (expected auto, cuda or cpu)", other)),
        }
    }
}

impl DevicePreference {
    /// Resolve `auto` by asking the NVIDIA driver for a GPU
    pub async fn resolve(self) -> ComputeDevice {
        match self {
            DevicePreference::Cuda => ComputeDevice::Cuda,
            DevicePreference::Cpu => ComputeDevice::Cpu,
            DevicePreference::Auto => {
                let found = Command::new("nvidia-smi")
                    .arg("-L")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map(|status| status.success())
                    .unwrap_or(false);
                let device = if found { ComputeDevice::Cuda } else { ComputeDevice::Cpu };
                info!("Image model device: {:?}", device);
                device
            }
        }
    }
}

/// Everything the model needs for one illustration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub num_inference_steps: u32,
    pub device: ComputeDevice,
    pub precision: Precision,
}

impl ImageRequest {
    pub fn new(prompt: String, device: ComputeDevice) -> Self {
        Self {
            prompt,
            num_inference_steps: INFERENCE_STEPS,
            device,
            precision: device.precision(),
        }
    }
}

/// Encoded PNG produced by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub png: Vec<u8>,
}

/// Image model loaded once and shared by every request
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Generate one or more images; callers use the first
    async fn synthesize(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, SynthesisError>;
}

#[derive(Deserialize)]
struct WorkerResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// HTTP client for the diffusion worker
///
/// `POST {base}/txt2img` with the [`ImageRequest`] as JSON; the worker
/// answers `{"images": ["<base64 png>", ...]}`.
#[derive(Clone)]
pub struct DiffusionWorkerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DiffusionWorkerClient {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self, SynthesisError> {
        let url = base_url.unwrap_or(DEFAULT_WORKER_URL);
        let base_url = Url::parse(url).map_err(|e| SynthesisError::Url(format!("{}: {}", url, e)))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self) -> Result<Url, SynthesisError> {
        self.base_url
            .join("txt2img")
            .map_err(|e| SynthesisError::Url(e.to_string()))
    }
}

#[async_trait]
impl ImageSynthesizer for DiffusionWorkerClient {
    async fn synthesize(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, SynthesisError> {
        let url = self.endpoint()?;
        debug!("POST {} ({} steps, {:?})", url, request.num_inference_steps, request.precision);

        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: WorkerResponse = response.json().await?;
        decode_images(body.images)
    }
}

fn decode_images(encoded: Vec<String>) -> Result<Vec<GeneratedImage>, SynthesisError> {
    if encoded.is_empty() {
        return Err(SynthesisError::NoImages);
    }

    encoded
        .iter()
        .map(|data| -> Result<GeneratedImage, SynthesisError> {
            // Some workers send data URLs
            let raw = data
                .split_once("base64,")
                .map(|(_, payload)| payload)
                .unwrap_or(data.as_str());
            Ok(GeneratedImage {
                png: B64.decode(raw.trim())?,
            })
        })
        .collect()
}
