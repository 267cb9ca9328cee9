use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PngSummary {
    pub width: u32,
    pub height: u32,
}

impl PngSummary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read PNG file: {}", path.display()))?;

        Self::from_bytes(&data)
            .with_context(|| format!("Not a valid PNG file: {}", path.display()))
    }

    /// Checks the signature and reads the dimensions from the IHDR chunk
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 24 || data[0..8] != PNG_SIGNATURE {
            anyhow::bail!("Missing PNG signature");
        }

        // IHDR is always the first chunk: length(4) type(4) width(4) height(4)
        if &data[12..16] != b"IHDR" {
            anyhow::bail!("First chunk is not IHDR");
        }

        let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

        if width == 0 || height == 0 {
            anyhow::bail!("PNG has zero dimensions ({}x{})", width, height);
        }

        Ok(PngSummary { width, height })
    }
}
