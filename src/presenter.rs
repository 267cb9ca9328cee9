//! Turning a finished artifact set into something a person can look at

use crate::artifacts::{ArtifactId, ArtifactKind, ArtifactSet};
use crate::error::PipelineError;
use crate::pipeline::Illustration;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// The three files offered for download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Download {
    Illustration,
    Audio,
    Score,
}

impl Download {
    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            Download::Illustration => ArtifactKind::Illustration,
            Download::Audio => ArtifactKind::Mp3,
            Download::Score => ArtifactKind::ScoreImage,
        }
    }

    /// Name suggested to the browser or save dialog
    pub fn file_name(&self) -> &'static str {
        match self {
            Download::Illustration => "illustration.png",
            Download::Audio => "musique_emotion.mp3",
            Download::Score => "partition.png",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Download::Illustration | Download::Score => "image/png",
            Download::Audio => "audio/mpeg",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Download::Illustration => "Image émotionnelle",
            Download::Audio => "Musique émotionnelle",
            Download::Score => "Partition générée",
        }
    }
}

/// A file's contents, ready to embed or download
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub download: Download,
    pub label: &'static str,
    pub file_name: &'static str,
    pub mime_type: &'static str,
    #[serde(serialize_with = "as_base64")]
    pub bytes: Vec<u8>,
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&B64.encode(bytes))
}

impl Attachment {
    /// `data:` URL for `<img>` and `<audio>` tags
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, B64.encode(&self.bytes))
    }
}

/// What the result view shows for one request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedResult {
    pub id: ArtifactId,
    pub heading: String,
    pub emotion: String,
    pub confidence: f32,
    pub emotion_message: String,
    pub prompt: String,
    pub illustration: Attachment,
    pub audio: Attachment,
    pub score: Attachment,
}

/// `Émotion détectée : Sadness`
pub fn emotion_message(emotion: &str) -> String {
    format!("Émotion détectée : {}", emotion)
}

/// Read back the illustration, the MP3 and the score
pub async fn present(illustration: &Illustration) -> Result<PresentedResult, PipelineError> {
    let artifacts = &illustration.artifacts;
    let emotion = illustration.classification.label.capitalized();

    Ok(PresentedResult {
        id: artifacts.id,
        heading: illustration.submission.heading().to_string(),
        emotion_message: emotion_message(&emotion),
        emotion,
        confidence: illustration.classification.score,
        prompt: illustration.prompt.clone(),
        illustration: load_attachment(artifacts, Download::Illustration).await?,
        audio: load_attachment(artifacts, Download::Audio).await?,
        score: load_attachment(artifacts, Download::Score).await?,
    })
}

pub async fn load_attachment(artifacts: &ArtifactSet, download: Download) -> Result<Attachment, PipelineError> {
    let bytes = read_artifact(artifacts.path(download.artifact_kind())).await?;
    Ok(Attachment {
        download,
        label: download.label(),
        file_name: download.file_name(),
        mime_type: download.mime_type(),
        bytes,
    })
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>, PipelineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PipelineError::MissingArtifact(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

/// Copy one artifact of a finished request to a user-chosen location
///
/// Fails with a missing-artifact error once retention has removed the set.
pub async fn save_artifact(
    output_dir: &Path,
    id: ArtifactId,
    download: Download,
    destination: &Path,
) -> Result<PathBuf, PipelineError> {
    let artifacts = ArtifactSet::for_id(output_dir, id);
    let source = artifacts.path(download.artifact_kind());
    let bytes = read_artifact(source).await?;

    let destination = if tokio::fs::metadata(destination)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        destination.join(download.file_name())
    } else {
        destination.to_path_buf()
    };

    tokio::fs::write(&destination, bytes).await?;
    info!("Saved {} to {}", download.file_name(), destination.display());
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::tests::scratch_dir;
    use crate::classifier::{Classification, EmotionLabel};
    use crate::pipeline::tests::{mp3_bytes, png_bytes};
    use crate::submission::{Style, Submission};

    async fn finished(dir: &Path, title: Option<&str>) -> Illustration {
        let artifacts = ArtifactSet::allocate(dir).await.unwrap();
        std::fs::write(&artifacts.illustration_path, png_bytes(512, 512)).unwrap();
        std::fs::write(&artifacts.mp3_path, mp3_bytes()).unwrap();
        std::fs::write(&artifacts.score_image_path, png_bytes(800, 1100)).unwrap();

        Illustration {
            submission: Submission::new(title.map(str::to_string), "rain all week", 1.0, Style::Watercolor),
            classification: Classification {
                label: EmotionLabel::new("sadness"),
                score: 0.81,
            },
            prompt: "an aquarelle painting illustrating the emotion sadness".into(),
            artifacts,
        }
    }

    #[tokio::test]
    async fn presents_heading_message_and_media() {
        let dir = scratch_dir("present");
        let illustration = finished(&dir, Some("Mon ressenti du jour")).await;

        let result = present(&illustration).await.unwrap();
        assert_eq!(result.heading, "Mon ressenti du jour");
        assert_eq!(result.emotion, "Sadness");
        assert_eq!(result.emotion_message, "Émotion détectée : Sadness");
        assert_eq!(result.illustration.bytes, png_bytes(512, 512));
        assert_eq!(result.audio.mime_type, "audio/mpeg");
        assert_eq!(result.audio.file_name, "musique_emotion.mp3");
        assert_eq!(result.score.file_name, "partition.png");
        assert!(result.score.data_url().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn blank_title_falls_back() {
        let dir = scratch_dir("present-title");
        let result = present(&finished(&dir, Some("   ")).await).await.unwrap();
        assert_eq!(result.heading, "Résultat généré");
    }

    #[tokio::test]
    async fn vanished_file_is_reported() {
        let dir = scratch_dir("present-missing");
        let illustration = finished(&dir, None).await;
        std::fs::remove_file(&illustration.artifacts.mp3_path).unwrap();

        match present(&illustration).await {
            Err(PipelineError::MissingArtifact(path)) => assert_eq!(path, illustration.artifacts.mp3_path),
            other => panic!("unexpected {:?}", other.map(|r| r.id)),
        }
    }

    #[tokio::test]
    async fn attachment_bytes_serialize_as_base64() {
        let dir = scratch_dir("present-json");
        let result = present(&finished(&dir, None).await).await.unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["emotionMessage"], "Émotion détectée : Sadness");
        assert_eq!(json["audio"]["download"], "audio");
        let encoded = json["illustration"]["bytes"].as_str().unwrap();
        assert_eq!(B64.decode(encoded).unwrap(), png_bytes(512, 512));
    }

    #[tokio::test]
    async fn save_into_directory_uses_download_name() {
        let dir = scratch_dir("save");
        let illustration = finished(&dir.join("output"), None).await;
        let target = dir.join("downloads");
        std::fs::create_dir_all(&target).unwrap();

        let saved = save_artifact(&dir.join("output"), illustration.artifacts.id, Download::Score, &target)
            .await
            .unwrap();
        assert_eq!(saved, target.join("partition.png"));
        assert_eq!(std::fs::read(&saved).unwrap(), png_bytes(800, 1100));

        let explicit = dir.join("my-song.mp3");
        let saved = save_artifact(&dir.join("output"), illustration.artifacts.id, Download::Audio, &explicit)
            .await
            .unwrap();
        assert_eq!(saved, explicit);
    }

    #[tokio::test]
    async fn save_of_evicted_set_fails() {
        let dir = scratch_dir("save-evicted");
        let err = save_artifact(&dir, ArtifactId::random(), Download::Illustration, &dir.join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact(_)));
    }
}
