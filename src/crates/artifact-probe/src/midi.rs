use anyhow::{Context, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::Serialize;
use std::path::Path;

// Default tempo: 120 BPM = 500000 microseconds per beat
const DEFAULT_TEMPO: u32 = 500_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiSummary {
    /// SMF format: 0 (single track), 1 (parallel) or 2 (sequential)
    pub format: u8,
    pub track_count: usize,
    pub ticks_per_beat: u32,
    pub bpm: f64,
    pub note_count: usize,
}

impl MidiSummary {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read MIDI file: {}", path.display()))?;

        Self::from_bytes(&data)
            .with_context(|| format!("Not a valid MIDI file: {}", path.display()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data).context("Failed to parse MIDI file")?;

        let format = match smf.header.format {
            midly::Format::SingleTrack => 0,
            midly::Format::Parallel => 1,
            midly::Format::Sequential => 2,
        };

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int() as u32,
            Timing::Timecode(fps, subframe) => {
                // Convert timecode to ticks per beat approximation
                (fps.as_f32() * subframe as f32 * 4.0) as u32
            }
        };

        let tempo = extract_tempo(&smf);
        let bpm = 60_000_000.0 / tempo as f64;

        Ok(MidiSummary {
            format,
            track_count: smf.tracks.len(),
            ticks_per_beat,
            bpm,
            note_count: count_notes(&smf),
        })
    }
}

fn extract_tempo(smf: &Smf) -> u32 {
    for track in &smf.tracks {
        for event in track {
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                return tempo.as_int();
            }
        }
    }
    DEFAULT_TEMPO
}

// note_on with velocity 0 is a note_off in disguise
fn count_notes(smf: &Smf) -> usize {
    smf.tracks
        .iter()
        .flatten()
        .filter(|event| {
            matches!(
                event.kind,
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { vel, .. },
                    ..
                } if vel.as_int() > 0
            )
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Header, TrackEvent};

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note(key: u8, vel: u8) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            },
        }
    }

    fn encode(tempo: Option<u32>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(
            midly::Format::SingleTrack,
            Timing::Metrical(u15::new(480)),
        ));
        let mut track = Vec::new();
        if let Some(tempo) = tempo {
            track.push(event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo)))));
        }
        track.push(event(0, note(60, 90)));
        track.push(event(480, note(60, 0)));
        track.push(event(0, note(64, 80)));
        track.push(event(480, note(64, 0)));
        track.push(event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)));
        smf.tracks.push(track);

        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn summarises_tempo_and_notes() {
        // 100 BPM, as the generator writes for intensity 1.0
        let summary = MidiSummary::from_bytes(&encode(Some(600_000))).unwrap();
        assert_eq!(summary.format, 0);
        assert_eq!(summary.track_count, 1);
        assert_eq!(summary.ticks_per_beat, 480);
        assert!((summary.bpm - 100.0).abs() < 1e-9);
        assert_eq!(summary.note_count, 2);
    }

    #[test]
    fn missing_tempo_defaults_to_120() {
        let summary = MidiSummary::from_bytes(&encode(None)).unwrap();
        assert!((summary.bpm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MidiSummary::from_bytes(b"RIFF....WAVEfmt ").is_err());
        assert!(MidiSummary::from_bytes(&[]).is_err());
    }
}
