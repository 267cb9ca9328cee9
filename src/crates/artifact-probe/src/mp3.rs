use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

const ID3_HEADER_LEN: usize = 10;

// MPEG-1 and MPEG-2/2.5 sample rate tables, indexed by the 2-bit field
const MPEG1_RATES: [u32; 3] = [44100, 48000, 32000];
const MPEG2_RATES: [u32; 3] = [22050, 24000, 16000];
const MPEG25_RATES: [u32; 3] = [11025, 12000, 8000];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mp3Summary {
    pub has_id3: bool,
    pub sample_rate: u32,
}

impl Mp3Summary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read MP3 file: {}", path.display()))?;

        Self::from_bytes(&data)
            .with_context(|| format!("Not a valid MP3 file: {}", path.display()))
    }

    /// Accepts an optional ID3v2 tag followed by an MPEG audio frame header
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (has_id3, offset) = match id3_tag_len(data) {
            Some(len) => (true, len),
            None => (false, 0),
        };

        let header = data
            .get(offset..offset + 4)
            .ok_or_else(|| anyhow::anyhow!("File ends before the first audio frame"))?;

        // 11-bit frame sync
        if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
            anyhow::bail!("No MPEG frame sync at byte {}", offset);
        }

        let version = (header[1] >> 3) & 0b11;
        let layer = (header[1] >> 1) & 0b11;
        let rate_index = ((header[2] >> 2) & 0b11) as usize;

        if version == 0b01 {
            anyhow::bail!("Reserved MPEG version in frame header");
        }
        if layer == 0b00 {
            anyhow::bail!("Reserved MPEG layer in frame header");
        }
        if rate_index == 3 {
            anyhow::bail!("Reserved sample rate index in frame header");
        }

        let sample_rate = match version {
            0b11 => MPEG1_RATES[rate_index],
            0b10 => MPEG2_RATES[rate_index],
            _ => MPEG25_RATES[rate_index],
        };

        Ok(Mp3Summary {
            has_id3,
            sample_rate,
        })
    }
}

/// Total size of a leading ID3v2 tag, header included
fn id3_tag_len(data: &[u8]) -> Option<usize> {
    if data.len() < ID3_HEADER_LEN || &data[0..3] != b"ID3" {
        return None;
    }

    // Tag size is a 28-bit syncsafe integer
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);

    // Footer flag adds another 10 bytes
    let footer = if data[5] & 0x10 != 0 { ID3_HEADER_LEN } else { 0 };

    Some(ID3_HEADER_LEN + size + footer)
}
