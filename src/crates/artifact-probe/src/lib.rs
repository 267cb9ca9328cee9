//! Format checks for generated media files
//!
//! The generation pipeline hands files between external tools by path only.
//! This library opens such a file and confirms it is what the next step
//! expects (a Standard MIDI File, a RIFF/WAVE file, an MPEG audio stream or a
//! PNG image), returning a short summary of its contents.

pub mod midi;
pub mod mp3;
pub mod png;
pub mod wav;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;

// Re-export main types for convenience
pub use midi::MidiSummary;
pub use mp3::Mp3Summary;
pub use png::PngSummary;
pub use wav::WavSummary;

/// File formats produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Midi,
    Wav,
    Mp3,
    Png,
}

impl Format {
    /// Guess the format from a file name's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mid" | "midi" => Some(Format::Midi),
            "wav" => Some(Format::Wav),
            "mp3" => Some(Format::Mp3),
            "png" => Some(Format::Png),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Midi => "MIDI",
            Format::Wav => "WAV",
            Format::Mp3 => "MP3",
            Format::Png => "PNG",
        };
        f.write_str(name)
    }
}

/// What a probe found inside a file
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum Summary {
    Midi(MidiSummary),
    Wav(WavSummary),
    Mp3(Mp3Summary),
    Png(PngSummary),
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Midi(m) => write!(
                f,
                "MIDI format {} - {} track(s), {:.1} BPM, {} note(s)",
                m.format, m.track_count, m.bpm, m.note_count
            ),
            Summary::Wav(w) => write!(
                f,
                "WAV - {} ch, {} Hz, {}-bit, {:.2}s",
                w.channels, w.sample_rate, w.bits_per_sample, w.duration_secs
            ),
            Summary::Mp3(m) => write!(
                f,
                "MP3 - {} Hz{}",
                m.sample_rate,
                if m.has_id3 { ", ID3 tagged" } else { "" }
            ),
            Summary::Png(p) => write!(f, "PNG - {}x{}", p.width, p.height),
        }
    }
}

/// Open `path` and check that it parses as `format`
pub fn probe(path: &Path, format: Format) -> Result<Summary> {
    Ok(match format {
        Format::Midi => Summary::Midi(MidiSummary::from_file(path)?),
        Format::Wav => Summary::Wav(WavSummary::from_file(path)?),
        Format::Mp3 => Summary::Mp3(Mp3Summary::from_file(path)?),
        Format::Png => Summary::Png(PngSummary::from_file(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/b.mid")), Some(Format::Midi));
        assert_eq!(Format::from_path(Path::new("x_image.PNG")), Some(Format::Png));
        assert_eq!(Format::from_path(Path::new("track.mp3")), Some(Format::Mp3));
        assert_eq!(Format::from_path(Path::new("notes.txt")), None);
        assert_eq!(Format::from_path(Path::new("noext")), None);
    }

    #[test]
    fn probe_reports_missing_file() {
        let err = probe(Path::new("/definitely/not/here.wav"), Format::Wav).unwrap_err();
        assert!(format!("{:#}", err).contains("here.wav"));
    }
}
