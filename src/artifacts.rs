//! Per-request output files
//!
//! Every request gets one random id. The five files it produces live side by
//! side in the output directory and are named after that id:
//!
//! | kind         | file name         |
//! |--------------|-------------------|
//! | MIDI         | `{id}.mid`        |
//! | WAV          | `{id}.wav`        |
//! | MP3          | `{id}.mp3`        |
//! | score image  | `{id}.png`        |
//! | illustration | `{id}_image.png`  |
//!
//! Engravers that split a score into pages may also leave `{id}-{n}.png`
//! files behind. Those belong to the same set.

use artifact_probe::Format;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Random identifier shared by the files of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::try_parse(s).ok().map(Self)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Midi,
    Wav,
    Mp3,
    ScoreImage,
    Illustration,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Midi,
        ArtifactKind::Wav,
        ArtifactKind::Mp3,
        ArtifactKind::ScoreImage,
        ArtifactKind::Illustration,
    ];

    /// What follows the id in the file name
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Midi => ".mid",
            ArtifactKind::Wav => ".wav",
            ArtifactKind::Mp3 => ".mp3",
            ArtifactKind::ScoreImage => ".png",
            ArtifactKind::Illustration => "_image.png",
        }
    }

    pub fn format(&self) -> Format {
        match self {
            ArtifactKind::Midi => Format::Midi,
            ArtifactKind::Wav => Format::Wav,
            ArtifactKind::Mp3 => Format::Mp3,
            ArtifactKind::ScoreImage | ArtifactKind::Illustration => Format::Png,
        }
    }

    pub fn file_name(&self, id: ArtifactId) -> String {
        format!("{}{}", id, self.suffix())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Midi => "MIDI file",
            ArtifactKind::Wav => "WAV audio",
            ArtifactKind::Mp3 => "MP3 audio",
            ArtifactKind::ScoreImage => "score image",
            ArtifactKind::Illustration => "illustration",
        };
        f.write_str(name)
    }
}

/// Split an output file name back into its id and kind
pub fn parse_artifact_file_name(name: &str) -> Option<(ArtifactId, ArtifactKind)> {
    // "_image.png" must be tried before ".png"
    const BY_SUFFIX: [ArtifactKind; 5] = [
        ArtifactKind::Illustration,
        ArtifactKind::Midi,
        ArtifactKind::Wav,
        ArtifactKind::Mp3,
        ArtifactKind::ScoreImage,
    ];

    BY_SUFFIX.into_iter().find_map(|kind| {
        let stem = name.strip_suffix(kind.suffix())?;
        ArtifactId::parse(stem).map(|id| (id, kind))
    })
}

/// Id and page number of an engraver page file, `{id}-{n}.png` with n >= 1
pub fn parse_score_page(name: &str) -> Option<(ArtifactId, u32)> {
    let stem = name.strip_suffix(".png")?;
    let (id, page) = stem.rsplit_once('-')?;
    if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let page: u32 = page.parse().ok().filter(|n| *n >= 1)?;
    ArtifactId::parse(id).map(|id| (id, page))
}

/// Id of any file belonging to an artifact set, page files included
pub fn artifact_id_of(name: &str) -> Option<ArtifactId> {
    parse_artifact_file_name(name)
        .map(|(id, _)| id)
        .or_else(|| parse_score_page(name).map(|(id, _)| id))
}

/// The five output paths of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSet {
    pub id: ArtifactId,
    pub midi_path: PathBuf,
    pub wav_path: PathBuf,
    pub mp3_path: PathBuf,
    pub score_image_path: PathBuf,
    pub illustration_path: PathBuf,
}

impl ArtifactSet {
    pub fn for_id(output_dir: &Path, id: ArtifactId) -> Self {
        let path = |kind: ArtifactKind| output_dir.join(kind.file_name(id));
        Self {
            id,
            midi_path: path(ArtifactKind::Midi),
            wav_path: path(ArtifactKind::Wav),
            mp3_path: path(ArtifactKind::Mp3),
            score_image_path: path(ArtifactKind::ScoreImage),
            illustration_path: path(ArtifactKind::Illustration),
        }
    }

    /// Draw a fresh id whose files do not exist yet
    pub async fn allocate(output_dir: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(output_dir).await?;

        'draw: loop {
            let set = Self::for_id(output_dir, ArtifactId::random());
            for (_, path) in set.paths() {
                if tokio::fs::try_exists(path).await? {
                    warn!("Artifact id {} already in use, drawing another", set.id);
                    continue 'draw;
                }
            }
            debug!("Allocated artifact set {}", set.id);
            return Ok(set);
        }
    }

    fn output_dir(&self) -> &Path {
        match self.midi_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Midi => &self.midi_path,
            ArtifactKind::Wav => &self.wav_path,
            ArtifactKind::Mp3 => &self.mp3_path,
            ArtifactKind::ScoreImage => &self.score_image_path,
            ArtifactKind::Illustration => &self.illustration_path,
        }
    }

    pub fn paths(&self) -> [(ArtifactKind, &Path); 5] {
        ArtifactKind::ALL.map(|kind| (kind, self.path(kind)))
    }

    /// Delete whichever of the five files exist, and any score pages
    pub async fn remove_all(&self) {
        for (kind, path) in self.paths() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed {} {}", kind, path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        self.remove_score_pages().await;
    }

    /// Delete every `{id}-{n}.png` page file, returning how many went
    pub async fn remove_score_pages(&self) -> usize {
        let dir = self.output_dir();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Failed to list {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list {}: {}", dir.display(), e);
                    break;
                }
            };
            let is_ours = entry
                .file_name()
                .to_str()
                .and_then(parse_score_page)
                .is_some_and(|(id, _)| id == self.id);
            if !is_ours {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed score page {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

/// How many finished requests to keep on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_sets: Option<usize>,
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_everything() -> Self {
        Self {
            max_sets: None,
            max_age: None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_sets: Some(200),
            max_age: Some(Duration::from_secs(72 * 3600)),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sets_kept: usize,
    pub sets_removed: usize,
    pub files_removed: usize,
}

/// Remove old artifact sets from `output_dir`
///
/// Sets are ranked by their newest file. Files that do not follow the naming
/// scheme are left alone.
pub fn sweep(output_dir: &Path, policy: RetentionPolicy, now: SystemTime) -> io::Result<SweepReport> {
    let mut sets: HashMap<ArtifactId, (SystemTime, Vec<PathBuf>)> = HashMap::new();

    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SweepReport::default()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let Some(id) = entry.file_name().to_str().and_then(artifact_id_of) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(now);

        let set = sets.entry(id).or_insert((modified, Vec::new()));
        set.0 = set.0.max(modified);
        set.1.push(entry.path());
    }

    // Newest first
    let mut ranked: Vec<(ArtifactId, (SystemTime, Vec<PathBuf>))> = sets.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));

    let mut report = SweepReport::default();
    for (rank, (id, (newest, files))) in ranked.into_iter().enumerate() {
        let too_many = policy.max_sets.is_some_and(|max| rank >= max);
        let too_old = policy.max_age.is_some_and(|max_age| {
            now.duration_since(newest).map(|age| age > max_age).unwrap_or(false)
        });

        if !(too_many || too_old) {
            report.sets_kept += 1;
            continue;
        }

        for file in &files {
            match std::fs::remove_file(file) {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", file.display(), e),
            }
        }
        debug!("Evicted artifact set {}", id);
        report.sets_removed += 1;
    }

    if report.sets_removed > 0 {
        info!(
            "Retention sweep removed {} set(s) ({} files), kept {}",
            report.sets_removed, report.files_removed, report.sets_kept
        );
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::File;

    /// Fresh directory under the system temp dir
    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emotion-illustrator-{}-{}", name, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn paths_share_the_id() {
        let dir = PathBuf::from("output");
        let id = ArtifactId::parse("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b").unwrap();
        let set = ArtifactSet::for_id(&dir, id);

        assert_eq!(set.midi_path, dir.join("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b.mid"));
        assert_eq!(set.wav_path, dir.join("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b.wav"));
        assert_eq!(set.mp3_path, dir.join("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b.mp3"));
        assert_eq!(set.score_image_path, dir.join("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b.png"));
        assert_eq!(
            set.illustration_path,
            dir.join("0b7c6a1e-5d3f-4f7e-9a52-3c1d2e4f5a6b_image.png")
        );
    }

    #[test]
    fn file_names_parse_back() {
        let id = ArtifactId::random();
        for kind in ArtifactKind::ALL {
            assert_eq!(parse_artifact_file_name(&kind.file_name(id)), Some((id, kind)));
        }
        assert_eq!(parse_artifact_file_name("notes.txt"), None);
        assert_eq!(parse_artifact_file_name("not-a-uuid.mid"), None);
        assert_eq!(parse_artifact_file_name(&format!("{}-1.png", id)), None);
    }

    #[test]
    fn page_files_belong_to_their_set() {
        let id = ArtifactId::random();
        assert_eq!(parse_score_page(&format!("{}-1.png", id)), Some((id, 1)));
        assert_eq!(parse_score_page(&format!("{}-12.png", id)), Some((id, 12)));
        assert_eq!(parse_score_page(&format!("{}-0.png", id)), None);
        assert_eq!(parse_score_page(&format!("{}.png", id)), None);
        assert_eq!(parse_score_page(&format!("{}_image.png", id)), None);
        assert_eq!(parse_score_page(&format!("{}-2.mid", id)), None);

        assert_eq!(artifact_id_of(&format!("{}-3.png", id)), Some(id));
        assert_eq!(artifact_id_of(&format!("{}.wav", id)), Some(id));
        assert_eq!(artifact_id_of("cover-1.png"), None);
    }

    #[tokio::test]
    async fn allocate_creates_directory_and_distinct_ids() {
        let dir = scratch_dir("allocate").join("nested");
        let a = ArtifactSet::allocate(&dir).await.unwrap();
        let b = ArtifactSet::allocate(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_ne!(a.id, b.id);
        assert!(a.paths().iter().all(|(_, p)| !p.exists()));
    }

    #[tokio::test]
    async fn remove_all_tolerates_missing_files() {
        let dir = scratch_dir("remove");
        let set = ArtifactSet::allocate(&dir).await.unwrap();
        std::fs::write(&set.midi_path, b"x").unwrap();
        std::fs::write(&set.illustration_path, b"x").unwrap();

        set.remove_all().await;
        assert!(set.paths().iter().all(|(_, p)| !p.exists()));
    }

    #[tokio::test]
    async fn remove_all_takes_score_pages_too() {
        let dir = scratch_dir("remove-pages");
        let set = ArtifactSet::allocate(&dir).await.unwrap();
        let other = ArtifactSet::allocate(&dir).await.unwrap();
        std::fs::write(&set.score_image_path, b"x").unwrap();
        std::fs::write(dir.join(format!("{}-1.png", set.id)), b"p1").unwrap();
        std::fs::write(dir.join(format!("{}-2.png", set.id)), b"p2").unwrap();
        std::fs::write(dir.join(format!("{}-1.png", other.id)), b"other").unwrap();

        set.remove_all().await;

        let left: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(left, vec![format!("{}-1.png", other.id)]);
    }

    #[tokio::test]
    async fn sweep_keeps_newest_sets() {
        let dir = scratch_dir("sweep-count");
        let now = SystemTime::now();
        let old = ArtifactSet::allocate(&dir).await.unwrap();
        let new = ArtifactSet::allocate(&dir).await.unwrap();
        for (_, path) in old.paths() {
            touch(path, now - Duration::from_secs(600));
        }
        for (_, path) in new.paths() {
            touch(path, now - Duration::from_secs(5));
        }
        std::fs::write(dir.join("README.txt"), b"keep me").unwrap();

        let policy = RetentionPolicy {
            max_sets: Some(1),
            max_age: None,
        };
        let report = sweep(&dir, policy, now).unwrap();

        assert_eq!(report.sets_removed, 1);
        assert_eq!(report.files_removed, 5);
        assert_eq!(report.sets_kept, 1);
        assert!(old.paths().iter().all(|(_, p)| !p.exists()));
        assert!(new.paths().iter().all(|(_, p)| p.exists()));
        assert!(dir.join("README.txt").exists());
    }

    #[tokio::test]
    async fn sweep_evicts_score_pages_with_their_set() {
        let dir = scratch_dir("sweep-pages");
        let now = SystemTime::now();
        let old = ArtifactSet::allocate(&dir).await.unwrap();
        for (_, path) in old.paths() {
            touch(path, now - Duration::from_secs(600));
        }
        let stray_page = dir.join(format!("{}-2.png", old.id));
        touch(&stray_page, now - Duration::from_secs(600));
        let new = ArtifactSet::allocate(&dir).await.unwrap();
        touch(&new.midi_path, now);

        let policy = RetentionPolicy {
            max_sets: Some(1),
            max_age: None,
        };
        let report = sweep(&dir, policy, now).unwrap();

        assert_eq!(report.sets_removed, 1);
        assert_eq!(report.files_removed, 6);
        assert!(!stray_page.exists());
        assert!(new.midi_path.exists());
    }

    #[tokio::test]
    async fn sweep_drops_expired_sets() {
        let dir = scratch_dir("sweep-age");
        let now = SystemTime::now();
        let stale = ArtifactSet::allocate(&dir).await.unwrap();
        touch(&stale.midi_path, now - Duration::from_secs(7200));
        touch(&stale.wav_path, now - Duration::from_secs(7100));
        let fresh = ArtifactSet::allocate(&dir).await.unwrap();
        touch(&fresh.midi_path, now);

        let policy = RetentionPolicy {
            max_sets: None,
            max_age: Some(Duration::from_secs(3600)),
        };
        let report = sweep(&dir, policy, now).unwrap();

        assert_eq!(report.sets_removed, 1);
        assert!(!stale.midi_path.exists() && !stale.wav_path.exists());
        assert!(fresh.midi_path.exists());
    }

    #[test]
    fn sweep_of_missing_directory_is_empty() {
        let dir = std::env::temp_dir().join(format!("emotion-illustrator-absent-{}", Uuid::new_v4()));
        let report = sweep(&dir, RetentionPolicy::default(), SystemTime::now()).unwrap();
        assert_eq!(report, SweepReport::default());
    }

    proptest! {
        #[test]
        fn every_path_lives_in_the_output_dir(dir in "[a-z]{1,8}(/[a-z]{1,8}){0,2}") {
            let dir = PathBuf::from(dir);
            let set = ArtifactSet::for_id(&dir, ArtifactId::random());
            for (kind, path) in set.paths() {
                prop_assert_eq!(path.parent(), Some(dir.as_path()));
                let name = path.file_name().unwrap().to_str().unwrap();
                prop_assert!(name.starts_with(&set.id.to_string()));
                prop_assert_eq!(parse_artifact_file_name(name), Some((set.id, kind)));
            }
        }
    }
}
