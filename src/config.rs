//! Configuration parameters for parsing, canonicalization, alignment and
//! tempo reconstruction.
//!
//! Nothing here is process-wide state: every stage takes its configuration
//! by reference, so independent pipelines can run side by side.

use serde::{Deserialize, Serialize};

/// Options for building the temporal document model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Expand repeats, volta endings and D.C./D.S. jumps into play order
    /// before assigning tick positions (default: true).
    pub expand_repeats: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            expand_repeats: true,
        }
    }
}

/// Options for the note canonicalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalizeOptions {
    /// Keep only voice 1 and reduce chords to their top note.
    pub melody_only: bool,
    /// Keep grace notes in the returned sequence (default: true).
    pub include_grace: bool,
    /// Keep coalesced rests in the returned sequence.
    pub keep_rests: bool,
}

impl Default for CanonicalizeOptions {
    fn default() -> Self {
        Self {
            melody_only: false,
            include_grace: true,
            keep_rests: false,
        }
    }
}

/// Alignment tolerances, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Half-width of the onset window around a note's expected onset (default: 0.1)
    pub onset_tolerance: f64,
    /// Expected-onset shift for notes after grace notes or arpeggios (default: 0.5)
    pub grace_onset_shift: f64,
    /// Window half-width for notes after grace notes or arpeggios (default: 0.6)
    pub grace_tolerance: f64,
    /// Onset equality tolerance for correspondence-table lookups (default: 0.001)
    pub correspondence_epsilon: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            onset_tolerance: 0.1,
            grace_onset_shift: 0.5,
            grace_tolerance: 0.6,
            correspondence_epsilon: 0.001,
        }
    }
}

/// Tempo-curve reconstruction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    /// Matched notes on one tick closer than this in performed time collapse
    /// to a single anchor (default: 0.05 s)
    pub min_chord_gap: f64,
    /// Use one grid point per measure instead of per beat (default: false)
    pub measure_level: bool,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_chord_gap: 0.05,
            measure_level: false,
        }
    }
}

/// Sustain pedal interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PedalConfig {
    /// Control values above this engage the pedal (default: 0)
    pub threshold: i32,
    /// Controller numbers treated as sustain (default: 64 and 127)
    pub controllers: Vec<u8>,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            threshold: 0,
            controllers: vec![64, 127],
        }
    }
}

/// Dynamic and tempo keyword tables used by the direction resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub absolute_tempos: Vec<String>,
    pub relative_tempos: Vec<String>,
    pub absolute_dynamics: Vec<String>,
    pub relative_dynamics: Vec<String>,
    /// Accent-like dynamics resolved as zero-length relative markings.
    pub accent_dynamics: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            absolute_tempos: words(&[
                "adagio", "lento", "andante", "andantino", "moderato", "allegretto", "allegro",
                "vivace", "presto", "prestissimo", "animato", "maestoso", "pesante", "veloce",
                "tempo i",
            ]),
            relative_tempos: words(&[
                "acc", "accel", "rit", "ritardando", "accelerando", "rall", "rallentando",
                "ritenuto", "a tempo", "stretto", "slentando", "meno mosso", "più mosso",
                "allargando",
            ]),
            absolute_dynamics: words(&["ppp", "pp", "p", "mp", "mf", "f", "ff", "fff", "fp"]),
            relative_dynamics: words(&[
                "crescendo", "diminuendo", "cresc", "dim", "dimin", "sotto voce", "mezza voce",
            ]),
            accent_dynamics: words(&["sf", "fz", "sfz", "sffz"]),
        }
    }
}

/// Everything `align_performance` needs in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignConfig {
    pub parse: ParseOptions,
    pub canonicalize: CanonicalizeOptions,
    pub matching: MatchConfig,
    pub tempo: TempoConfig,
    pub pedal: PedalConfig,
    pub vocabulary: Vocabulary,
}
