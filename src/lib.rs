//! scorealign: MusicXML temporal model and score-to-performance alignment.
//!
//! Supports both uncompressed MusicXML (.musicxml) and compressed MXL (.mxl)
//! files. A parsed [`Document`] carries exact tick and real-time positions;
//! its canonical note sequence can be matched against a performed note
//! stream, from which a tempo curve and per-note features are derived.
//!
//! # Example
//! ```no_run
//! use scorealign::{align_performance, parse_file, AlignConfig, PerformedNote};
//!
//! let doc = parse_file("path/to/score.musicxml").unwrap();
//! let performed: Vec<PerformedNote> = Vec::new();
//! let alignment = align_performance(&doc, &performed, &[], &AlignConfig::default());
//! println!("Matched: {}/{}", alignment.stats.matched, alignment.stats.notes);
//! println!("Tempo segments: {}", alignment.curve.segments.len());
//! ```

pub mod alignment;
pub mod canonical;
pub mod config;
pub mod directions;
pub mod error;
pub mod features;
pub mod midi;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod performance;
pub mod search;
pub mod tempo;
pub mod timemap;
pub mod unroller;

use std::path::Path;

use serde::Serialize;

pub use alignment::{match_notes, match_via_correspondence, AlignmentStats, MatchedPair};
pub use canonical::{canonicalize, canonicalize_with};
pub use config::*;
pub use directions::{resolve, resolve_with, NoteMarkings, ResolvedDirections};
pub use error::{Result, ScoreError};
pub use features::{extract_features, resynthesize, NoteFeatures};
pub use midi::performance_to_smf;
pub use model::*;
pub use mxl::parse_mxl;
pub use parser::{parse_musicxml, parse_musicxml_with};
pub use performance::{CorrespondenceTable, PedalEvent, PerformedNote, SustainSpan};
pub use tempo::{reconstruct_tempo, TempoCurve, TempoSegment};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Document> {
    parse_file_with(path, &ParseOptions::default())
}

pub fn parse_file_with<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Result<Document> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| ScoreError::Io {
        path: path.display().to_string(),
        source,
    })?;

    parse_bytes_with(&data, path.extension().and_then(|e| e.to_str()), options)
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Document> {
    parse_bytes_with(data, extension, &ParseOptions::default())
}

pub fn parse_bytes_with(data: &[u8], extension: Option<&str>, options: &ParseOptions) -> Result<Document> {
    let utf8 = |data: &[u8]| {
        std::str::from_utf8(data)
            .map(str::to_owned)
            .map_err(|e| ScoreError::MalformedInput(format!("Invalid UTF-8 in MusicXML file: {e}")))
    };
    match extension {
        Some("mxl") => parse_mxl(data, options),
        Some("musicxml") | Some("xml") => parse_musicxml_with(&utf8(data)?, options),
        _ => {
            // ZIP local file header
            if data.starts_with(b"PK\x03\x04") {
                return parse_mxl(data, options);
            }
            parse_musicxml_with(&utf8(data)?, options)
        }
    }
}

/// Convert canonical notes to a JSON string.
/// Useful for passing data across FFI boundaries.
pub fn notes_to_json(notes: &[Note]) -> Result<String> {
    Ok(serde_json::to_string_pretty(notes)?)
}

/// Everything one alignment run produces. `pairs`, `features` and
/// `markings` are parallel to `notes`; pair indices point into `performed`.
#[derive(Debug, Clone, Serialize)]
pub struct Alignment {
    pub notes: Vec<Note>,
    /// The performance with offsets elongated by the sustain pedal
    pub performed: Vec<PerformedNote>,
    pub pairs: Vec<MatchedPair>,
    pub stats: AlignmentStats,
    pub curve: TempoCurve,
    pub features: Vec<NoteFeatures>,
    pub directions: ResolvedDirections,
    pub markings: Vec<NoteMarkings>,
}

/// Canonicalize, match, reconstruct the tempo curve and extract features in
/// one call.
pub fn align_performance(
    doc: &Document,
    performed: &[PerformedNote],
    pedal: &[PedalEvent],
    config: &AlignConfig,
) -> Alignment {
    let notes = canonicalize_with(doc, &config.canonicalize);

    let mut performed = performed.to_vec();
    let spans = performance::sustain_spans(pedal, &config.pedal, performance::performance_end(&performed));
    performance::elongate_offsets_by_pedal(&mut performed, &spans);

    let (pairs, stats) = alignment::match_notes_with_stats(&notes, &performed, &config.matching);
    let curve = reconstruct_tempo(doc, &notes, &performed, &pairs, &config.tempo);
    let features = extract_features(doc, &notes, &performed, &pairs, &curve);
    let directions = resolve_with(doc, &config.vocabulary);
    let markings = notes
        .iter()
        .map(|n| directions.markings_at(n.duration.xml_position, Some(n.staff)))
        .collect();

    log::debug!(
        "aligned {} note(s): {} matched, {} unmatched, {} tempo segment(s)",
        stats.notes,
        stats.matched,
        stats.unmatched,
        curve.segments.len()
    );

    Alignment {
        notes,
        performed,
        pairs,
        stats,
        curve,
        features,
        directions,
        markings,
    }
}

/// Parse a score file and align it with a performance.
pub fn align_file<P: AsRef<Path>>(
    path: P,
    performed: &[PerformedNote],
    pedal: &[PedalEvent],
    config: &AlignConfig,
) -> Result<Alignment> {
    let doc = parse_file_with(path, &config.parse)?;
    Ok(align_performance(&doc, performed, pedal, config))
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI for iOS (static library) and other native hosts
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Parse a score file and return its canonical notes as a JSON C string.
/// The caller must free the returned string with `scorealign_free_string`.
///
/// # Safety
/// `path` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn scorealign_notes_json(path: *const c_char, melody_only: bool) -> *mut c_char {
    if path.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(path) };
    let path_str = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    let json = parse_file(path_str).and_then(|doc| notes_to_json(&canonicalize(&doc, melody_only, true)));
    match json {
        Ok(json) => CString::new(json).unwrap_or_default().into_raw(),
        Err(e) => {
            log::warn!("scorealign_notes_json({path_str}): {e}");
            std::ptr::null_mut()
        }
    }
}

/// Free a string previously returned by scorealign functions.
///
/// # Safety
/// `ptr` must be a string previously returned by a scorealign function, or null.
#[no_mangle]
pub unsafe extern "C" fn scorealign_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
