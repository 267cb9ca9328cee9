use anyhow::{Context, Result};
use hound::WavReader;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WavSummary {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub duration_secs: f64,
}

impl WavSummary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Not a valid WAV file: {}", path.display()))?;

        let spec = reader.spec();
        if spec.sample_rate == 0 {
            anyhow::bail!("WAV file has a zero sample rate: {}", path.display());
        }

        // duration() counts frames, independent of channel count
        let duration_secs = reader.duration() as f64 / spec.sample_rate as f64;

        Ok(WavSummary {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            duration_secs,
        })
    }
}
