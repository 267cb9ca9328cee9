//! Form input: what the user wrote and how they want it illustrated

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_INTENSITY: f64 = 0.1;
pub const MAX_INTENSITY: f64 = 2.0;
pub const INTENSITY_STEP: f64 = 0.1;
pub const DEFAULT_INTENSITY: f64 = 1.0;
pub const DEFAULT_TITLE: &str = "Mon ressenti du jour";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("Intensity must be between 0.1 and 2.0, got {0}")]
    IntensityOutOfRange(f64),

    #[error("Unknown style: {0}")]
    UnknownStyle(String),
}

/// Visual style of the illustration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    #[serde(alias = "abstrait")]
    Abstract,
    #[serde(alias = "impressionniste")]
    Impressionist,
    #[serde(alias = "photographique")]
    Photographic,
    #[serde(alias = "surréaliste", alias = "surrealiste")]
    Surrealist,
    #[serde(alias = "aquarelle")]
    Watercolor,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Abstract,
        Style::Impressionist,
        Style::Photographic,
        Style::Surrealist,
        Style::Watercolor,
    ];

    /// Word used in the image prompt and shown in the form
    pub fn prompt_term(&self) -> &'static str {
        match self {
            Style::Abstract => "abstrait",
            Style::Impressionist => "impressionniste",
            Style::Photographic => "photographique",
            Style::Surrealist => "surréaliste",
            Style::Watercolor => "aquarelle",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Style::Abstract => "abstract",
            Style::Impressionist => "impressionist",
            Style::Photographic => "photographic",
            Style::Surrealist => "surrealist",
            Style::Watercolor => "watercolor",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prompt_term())
    }
}

impl FromStr for Style {
    type Err = SubmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Style::ALL
            .into_iter()
            .find(|style| {
                style.key() == wanted
                    || style.prompt_term() == wanted
                    || (*style == Style::Surrealist && wanted == "surrealiste")
            })
            .ok_or_else(|| SubmissionError::UnknownStyle(s.to_string()))
    }
}

/// One form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub title: Option<String>,
    pub narrative: String,
    #[serde(default = "default_intensity")]
    pub intensity: f64,
    #[serde(default)]
    pub style: Style,
}

fn default_intensity() -> f64 {
    DEFAULT_INTENSITY
}

impl Submission {
    pub fn new(title: Option<String>, narrative: impl Into<String>, intensity: f64, style: Style) -> Self {
        Self {
            title,
            narrative: narrative.into(),
            intensity,
            style,
        }
    }

    /// A blank narrative means there is nothing to illustrate
    pub fn is_blank(&self) -> bool {
        self.narrative.trim().is_empty()
    }

    /// Check the intensity range and snap it onto the slider's 0.1 grid
    pub fn validate(mut self) -> Result<Self, SubmissionError> {
        if !self.intensity.is_finite()
            || self.intensity < MIN_INTENSITY - 1e-9
            || self.intensity > MAX_INTENSITY + 1e-9
        {
            return Err(SubmissionError::IntensityOutOfRange(self.intensity));
        }

        self.intensity = snap_intensity(self.intensity);
        Ok(self)
    }

    /// Heading shown above the results
    pub fn heading(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => "Résultat généré",
        }
    }

    /// Intensity as handed to the music generator ("1.0", "0.7", ...)
    pub fn intensity_arg(&self) -> String {
        format!("{:.1}", self.intensity)
    }
}

fn snap_intensity(value: f64) -> f64 {
    let steps = (value / INTENSITY_STEP).round();
    (steps * INTENSITY_STEP).clamp(MIN_INTENSITY, MAX_INTENSITY)
}

/// Everything the UI needs to draw the form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormOptions {
    pub default_title: &'static str,
    pub styles: Vec<StyleOption>,
    pub intensity_min: f64,
    pub intensity_max: f64,
    pub intensity_step: f64,
    pub intensity_default: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOption {
    pub value: Style,
    pub label: &'static str,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            default_title: DEFAULT_TITLE,
            styles: Style::ALL
                .into_iter()
                .map(|style| StyleOption {
                    value: style,
                    label: style.prompt_term(),
                })
                .collect(),
            intensity_min: MIN_INTENSITY,
            intensity_max: MAX_INTENSITY,
            intensity_step: INTENSITY_STEP,
            intensity_default: DEFAULT_INTENSITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blank_narratives() {
        let blank = Submission::new(None, "   \n\t ", 1.0, Style::Abstract);
        assert!(blank.is_blank());

        let empty = Submission::new(None, "", 1.0, Style::Abstract);
        assert!(empty.is_blank());

        let real = Submission::new(None, "  I lost my job today ", 1.0, Style::Abstract);
        assert!(!real.is_blank());
    }

    #[test]
    fn intensity_bounds() {
        let ok = Submission::new(None, "x", 2.0, Style::Watercolor).validate();
        assert_eq!(ok.unwrap().intensity_arg(), "2.0");

        let low = Submission::new(None, "x", 0.05, Style::Watercolor).validate();
        assert_eq!(low, Err(SubmissionError::IntensityOutOfRange(0.05)));

        assert!(Submission::new(None, "x", 2.5, Style::Abstract).validate().is_err());
        assert!(Submission::new(None, "x", f64::NAN, Style::Abstract).validate().is_err());
    }

    #[test]
    fn intensity_arg_keeps_one_decimal() {
        let s = Submission::new(None, "x", 1.0, Style::Abstract).validate().unwrap();
        assert_eq!(s.intensity_arg(), "1.0");

        let s = Submission::new(None, "x", 0.7000001, Style::Abstract).validate().unwrap();
        assert_eq!(s.intensity_arg(), "0.7");
    }

    #[test]
    fn style_parsing_accepts_both_languages() {
        assert_eq!("abstrait".parse::<Style>().unwrap(), Style::Abstract);
        assert_eq!("Abstract".parse::<Style>().unwrap(), Style::Abstract);
        assert_eq!("surréaliste".parse::<Style>().unwrap(), Style::Surrealist);
        assert_eq!("surrealiste".parse::<Style>().unwrap(), Style::Surrealist);
        assert_eq!("aquarelle".parse::<Style>().unwrap(), Style::Watercolor);
        assert!("cubist".parse::<Style>().is_err());
    }

    #[test]
    fn deserializes_form_payload() {
        let json = r#"{"title":"","narrative":"Je suis ravi","intensity":1.3,"style":"abstrait"}"#;
        let s: Submission = serde_json::from_str(json).unwrap();
        assert_eq!(s.style, Style::Abstract);
        assert_eq!(s.heading(), "Résultat généré");

        let minimal: Submission = serde_json::from_str(r#"{"narrative":"ok"}"#).unwrap();
        assert_eq!(minimal.intensity, DEFAULT_INTENSITY);
        assert_eq!(minimal.style, Style::Abstract);
    }

    #[test]
    fn form_options_list_every_style() {
        let options = FormOptions::default();
        assert_eq!(options.styles.len(), 5);
        assert_eq!(options.styles[0].label, "abstrait");
        assert_eq!(options.default_title, "Mon ressenti du jour");
    }

    proptest! {
        #[test]
        fn snapped_intensity_stays_on_grid(value in MIN_INTENSITY..=MAX_INTENSITY) {
            let s = Submission::new(None, "x", value, Style::Abstract).validate().unwrap();
            prop_assert!(s.intensity >= MIN_INTENSITY && s.intensity <= MAX_INTENSITY);
            let steps = s.intensity / INTENSITY_STEP;
            prop_assert!((steps - steps.round()).abs() < 1e-6);
            prop_assert!((s.intensity - value).abs() <= INTENSITY_STEP / 2.0 + 1e-9);
        }
    }
}
