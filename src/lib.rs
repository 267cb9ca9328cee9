pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod diffusion;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod presenter;
pub mod startup;
pub mod submission;
pub mod tools;

#[cfg(feature = "desktop")]
pub mod emotionbridge;
#[cfg(feature = "desktop")]
pub mod loggerbridge;

pub use error::{PipelineError, RequestFailure, Stage};
pub use pipeline::{Illustrator, Outcome, PipelineSettings, ProgressSink};
pub use submission::{Style, Submission};
