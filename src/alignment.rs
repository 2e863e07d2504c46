//! Alignment engine: pairs canonical score notes with performed note events.
//!
//! Pair lists are positional: `pairs[i]` always belongs to `notes[i]`.

use serde::{Deserialize, Serialize};

use crate::config::MatchConfig;
use crate::model::Note;
use crate::performance::{find_performed, CorrespondenceTable, PerformedNote};

/// The performed note matched to one score note, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchedPair {
    #[default]
    Empty,
    /// Index into the performed note stream
    Matched(usize),
}

impl MatchedPair {
    pub fn performed(&self) -> Option<usize> {
        match self {
            MatchedPair::Matched(i) => Some(*i),
            MatchedPair::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, MatchedPair::Empty)
    }
}

/// Aggregate diagnostics of one alignment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub notes: usize,
    pub rests: usize,
    /// Overlapped notes, never paired
    pub overlapped: usize,
    pub matched: usize,
    /// Sounding notes without a candidate
    pub unmatched: usize,
    /// Notes whose only candidates were already claimed
    pub contended: usize,
}

impl AlignmentStats {
    pub fn from_pairs(notes: &[Note], pairs: &[MatchedPair]) -> Self {
        let mut stats = AlignmentStats {
            notes: notes.len(),
            ..Default::default()
        };
        for (note, pair) in notes.iter().zip(pairs) {
            if note.is_rest() {
                stats.rests += 1;
            } else if note.is_overlapped {
                stats.overlapped += 1;
            } else if pair.is_empty() {
                stats.unmatched += 1;
            } else {
                stats.matched += 1;
            }
        }
        stats
    }
}

/// Expected onset and tolerance for a score note. Notes after grace notes
/// or under an arpeggio tend to sound late, so their window is shifted and
/// widened.
fn onset_window(note: &Note, config: &MatchConfig) -> (f64, f64) {
    let onset = note.duration.time_position;
    if note.duration.preceded_by_grace_note || note.notations.is_arpeggiate {
        (onset + config.grace_onset_shift, config.grace_tolerance)
    } else {
        (onset, config.onset_tolerance)
    }
}

/// Match every score note to a performed note.
///
/// Candidates are performed notes of the same pitch whose onset lies
/// strictly inside the note's window. The first candidate in performed
/// order that no earlier note has claimed wins. Rests and overlapped notes
/// are never matched. The result has one entry per score note.
pub fn match_notes(notes: &[Note], performed: &[PerformedNote], config: &MatchConfig) -> Vec<MatchedPair> {
    let (pairs, stats) = match_notes_with_stats(notes, performed, config);
    log::debug!(
        "matched {}/{} sounding notes ({} unmatched, {} contended)",
        stats.matched,
        stats.notes - stats.rests - stats.overlapped,
        stats.unmatched,
        stats.contended
    );
    pairs
}

/// [`match_notes`] plus run statistics.
pub fn match_notes_with_stats(
    notes: &[Note],
    performed: &[PerformedNote],
    config: &MatchConfig,
) -> (Vec<MatchedPair>, AlignmentStats) {
    let mut claimed = vec![false; performed.len()];
    let mut contended = 0;

    let pairs: Vec<MatchedPair> = notes
        .iter()
        .map(|note| {
            let Some(pitch) = note.midi_pitch() else {
                return MatchedPair::Empty;
            };
            if note.is_overlapped {
                return MatchedPair::Empty;
            }
            let (onset, tolerance) = onset_window(note, config);
            let mut candidates = performed
                .iter()
                .enumerate()
                .filter(|(_, p)| p.pitch == pitch && (p.start - onset).abs() < tolerance)
                .map(|(i, _)| i)
                .peekable();
            if candidates.peek().is_none() {
                return MatchedPair::Empty;
            }
            match candidates.find(|&i| !claimed[i]) {
                Some(i) => {
                    claimed[i] = true;
                    MatchedPair::Matched(i)
                }
                None => {
                    contended += 1;
                    MatchedPair::Empty
                }
            }
        })
        .collect();

    let mut stats = AlignmentStats::from_pairs(notes, &pairs);
    stats.contended = contended;
    (pairs, stats)
}

/// Re-target score→reference pairs onto another performance through a
/// correspondence table.
///
/// Each matched reference note is looked up by onset (within
/// `config.correspondence_epsilon`) and pitch; the row's aligned onset and
/// pitch are then searched for in `other`. Anything that cannot be resolved
/// becomes an empty pair.
pub fn match_via_correspondence(
    score_pairs: &[MatchedPair],
    reference: &[PerformedNote],
    table: &CorrespondenceTable,
    other: &[PerformedNote],
    config: &MatchConfig,
) -> Vec<MatchedPair> {
    let eps = config.correspondence_epsilon;
    let mut unresolved = 0usize;
    let pairs: Vec<MatchedPair> = score_pairs
        .iter()
        .map(|pair| {
            let Some(reference_note) = pair.performed().and_then(|i| reference.get(i)) else {
                return MatchedPair::Empty;
            };
            let target = table
                .lookup(reference_note.start, reference_note.pitch, eps)
                .and_then(|row| find_performed(other, row.aligned_time, row.aligned_pitch, eps));
            match target {
                Some(i) => MatchedPair::Matched(i),
                None => {
                    unresolved += 1;
                    MatchedPair::Empty
                }
            }
        })
        .collect();
    log::debug!("correspondence hop: {unresolved} pair(s) could not be re-targeted");
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NoteDuration, Pitch};
    use crate::performance::Correspondence;

    fn note(midi: i32, time: f64) -> Note {
        Note {
            pitch: Some(Pitch {
                name: String::new(),
                midi,
            }),
            voice: 1,
            duration: NoteDuration {
                duration: 1,
                time_position: time,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn played(pitch: i32, start: f64) -> PerformedNote {
        PerformedNote {
            pitch,
            start,
            end: start + 0.4,
            velocity: 64,
        }
    }

    #[test]
    fn pairs_follow_notes() {
        let mut rest = note(0, 0.5);
        rest.pitch = None;
        let notes = vec![note(60, 0.0), rest, note(62, 1.0), note(64, 2.0)];
        let performed = vec![played(60, 0.05), played(62, 1.02)];
        let pairs = match_notes(&notes, &performed, &MatchConfig::default());
        assert_eq!(
            pairs,
            vec![
                MatchedPair::Matched(0),
                MatchedPair::Empty,
                MatchedPair::Matched(1),
                MatchedPair::Empty
            ]
        );
    }

    #[test]
    fn window_is_strict() {
        let notes = vec![note(60, 0.0)];
        let performed = vec![played(60, 0.1)];
        assert_eq!(match_notes(&notes, &performed, &MatchConfig::default()), vec![MatchedPair::Empty]);
    }

    #[test]
    fn grace_preceded_notes_get_wider_later_window() {
        let mut n = note(60, 1.0);
        n.duration.preceded_by_grace_note = true;
        let performed = vec![played(60, 1.9)];
        assert_eq!(
            match_notes(&[n], &performed, &MatchConfig::default()),
            vec![MatchedPair::Matched(0)]
        );
    }

    #[test]
    fn arpeggiated_notes_get_the_same_shifted_window() {
        let mut rolled = note(64, 2.0);
        rolled.notations.is_arpeggiate = true;
        let plain = note(64, 2.0);
        let performed = vec![played(64, 2.5)];

        assert_eq!(
            match_notes(&[rolled], &performed, &MatchConfig::default()),
            vec![MatchedPair::Matched(0)]
        );
        assert_eq!(
            match_notes(&[plain], &performed, &MatchConfig::default()),
            vec![MatchedPair::Empty]
        );
    }

    #[test]
    fn first_fit_never_reuses_an_index() {
        let notes = vec![note(60, 0.0), note(60, 0.02), note(60, 0.04)];
        let performed = vec![played(60, 0.0), played(60, 0.03)];
        let (pairs, stats) = match_notes_with_stats(&notes, &performed, &MatchConfig::default());
        assert_eq!(
            pairs,
            vec![MatchedPair::Matched(0), MatchedPair::Matched(1), MatchedPair::Empty]
        );
        assert_eq!(stats.contended, 1);
        assert_eq!(stats.matched, 2);
    }

    #[test]
    fn correspondence_hop_retargets_and_absorbs_misses() {
        let reference = vec![played(60, 1.0), played(62, 2.0)];
        let other = vec![played(62, 2.6), played(60, 1.4)];
        let table = CorrespondenceTable::new(vec![Correspondence {
            ref_time: 1.0,
            ref_pitch: 60,
            aligned_time: 1.4,
            aligned_pitch: 60,
        }]);
        let score_pairs = vec![MatchedPair::Matched(0), MatchedPair::Matched(1), MatchedPair::Empty];
        let pairs = match_via_correspondence(&score_pairs, &reference, &table, &other, &MatchConfig::default());
        assert_eq!(
            pairs,
            vec![MatchedPair::Matched(1), MatchedPair::Empty, MatchedPair::Empty]
        );
    }
}
