//! Error types for score parsing.
//!
//! Only structural problems with the input are errors. Alignment ambiguity
//! and tempo-curve degeneracies are absorbed where they happen and surface
//! as statistics instead.

use thiserror::Error;

/// Errors that abort parsing of the current score.
#[derive(Error, Debug)]
pub enum ScoreError {
    /// Markup that cannot be read as a MusicXML score.
    #[error("Malformed MusicXML: {0}")]
    MalformedInput(String),

    /// A compressed archive declares more than one candidate score.
    #[error("Ambiguous MXL container: {0}")]
    AmbiguousContainer(String),

    /// A compressed archive that is unreadable or holds no score.
    #[error("Invalid MXL container: {0}")]
    Container(String),

    /// Unpitched (percussion) notes are not supported.
    #[error("Unpitched note in part '{part}', measure {measure} at tick {tick}")]
    UnsupportedNote {
        part: String,
        measure: i32,
        tick: i64,
    },

    /// A `<step>` that is not one of A–G.
    #[error("Unknown pitch step '{step}' in part '{part}', measure {measure} at tick {tick}")]
    UnknownPitchStep {
        step: String,
        part: String,
        measure: i32,
        tick: i64,
    },

    #[error("Failed to read file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScoreError>;
