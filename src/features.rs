//! Per-note performance features read off an alignment and a tempo curve,
//! and the inverse: rendering a score with those features applied.

use serde::{Deserialize, Serialize};

use crate::alignment::MatchedPair;
use crate::model::{Document, Note};
use crate::performance::PerformedNote;
use crate::search;
use crate::tempo::TempoCurve;

/// Velocity that a loudness of 0 maps to.
pub const DEFAULT_VELOCITY: f64 = 64.0;

/// Features of one canonical note. Fields that need a matched performance
/// (or a following note) are `None` when that is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteFeatures {
    /// Played onset minus notated onset, in quarter notes under the curve
    pub onset_deviation: Option<f64>,
    /// Played length over notated length at the local tempo
    pub articulation: Option<f64>,
    /// log10 of the played inter-onset share over the notated one
    pub ioi_ratio: Option<f64>,
    /// log10 of velocity over the mean matched velocity
    pub loudness: f64,
    /// Position inside the measure, in `[0, 1)`
    pub beat_position: f64,
    pub pitch_interval: Option<i32>,
    pub duration_ratio: Option<f64>,
    pub local_qpm: Option<f64>,
}

/// Compute features for every note; the result is parallel to `notes`.
pub fn extract_features(
    doc: &Document,
    notes: &[Note],
    performed: &[PerformedNote],
    pairs: &[MatchedPair],
    curve: &TempoCurve,
) -> Vec<NoteFeatures> {
    let played = |i: usize| pairs.get(i).and_then(|p| p.performed()).and_then(|k| performed.get(k));
    let mean_velocity = mean_matched_velocity(performed, pairs);
    let totals = matched_span(notes, performed, pairs);
    let measure_positions = doc.measure_positions();

    let features: Vec<NoteFeatures> = notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            let position = note.duration.xml_position;
            let next = notes.get(i + 1);
            let mut f = NoteFeatures {
                beat_position: beat_position(&measure_positions, position, doc.total_ticks),
                pitch_interval: next.and_then(|n| Some(n.midi_pitch()? - note.midi_pitch()?)),
                duration_ratio: next.and_then(|n| log_ratio(n.duration.duration as f64, note.duration.duration as f64)),
                local_qpm: curve.qpm_at(position as f64),
                ..Default::default()
            };
            let Some(p) = played(i) else {
                return f;
            };

            f.onset_deviation = curve.time_to_tick(p.start).map(|tick| {
                (tick - position as f64) / doc.divisions_at(position as f64) as f64
            });
            f.articulation = curve.segment_at(position as f64).and_then(|seg| {
                let notated = note.duration.duration as f64 * seg.seconds_per_tick();
                (notated > 0.0).then(|| p.duration() / notated)
            });
            if let (Some(next_played), Some(next_note), Some((score_total, perf_total))) = (played(i + 1), next, totals) {
                let score_ioi = (next_note.duration.xml_position - position) as f64;
                let perf_ioi = next_played.start - p.start;
                if score_ioi > 0.0 && perf_ioi > 0.0 {
                    f.ioi_ratio = log_ratio(perf_ioi / perf_total, score_ioi / score_total);
                }
            }
            if mean_velocity > 0.0 && p.velocity > 0 {
                f.loudness = (p.velocity as f64 / mean_velocity).log10();
            }
            f
        })
        .collect();

    log::debug!(
        "features for {} note(s), {} with onset deviation",
        features.len(),
        features.iter().filter(|f| f.onset_deviation.is_some()).count()
    );
    features
}

/// Render the score through a tempo curve and per-note features.
///
/// Each sounding, non-overlapped note with a length gets its onset and
/// offset ticks mapped through the curve (or its notated times when the
/// curve is empty), its length scaled by articulation and its velocity set
/// from loudness. The result is sorted by onset.
pub fn resynthesize(notes: &[Note], curve: &TempoCurve, features: &[NoteFeatures]) -> Vec<PerformedNote> {
    let mut out: Vec<PerformedNote> = notes
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.is_overlapped && n.duration.duration > 0)
        .filter_map(|(i, note)| {
            let pitch = note.midi_pitch()?;
            let feature = features.get(i).copied().unwrap_or_default();
            let onset_tick = note.duration.xml_position as f64;
            let offset_tick = note.end_xml_position() as f64;
            let (start, end) = match (curve.tick_to_time(onset_tick), curve.tick_to_time(offset_tick)) {
                (Some(start), Some(end)) => (start, end),
                _ => (
                    note.duration.time_position,
                    note.duration.time_position + note.duration.seconds,
                ),
            };
            let length = (end - start) * feature.articulation.unwrap_or(1.0);
            let velocity = (DEFAULT_VELOCITY * 10f64.powf(feature.loudness)).round().clamp(0.0, 127.0) as i32;
            Some(PerformedNote {
                pitch,
                start,
                end: start + length.max(0.0),
                velocity,
            })
        })
        .collect();
    out.sort_by(|a, b| a.start.total_cmp(&b.start));
    out
}

fn log_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (numerator > 0.0 && denominator > 0.0).then(|| (numerator / denominator).log10())
}

fn mean_matched_velocity(performed: &[PerformedNote], pairs: &[MatchedPair]) -> f64 {
    let velocities: Vec<f64> = pairs
        .iter()
        .filter_map(|p| performed.get(p.performed()?))
        .map(|p| p.velocity as f64)
        .collect();
    if velocities.is_empty() {
        return 0.0;
    }
    velocities.iter().sum::<f64>() / velocities.len() as f64
}

/// Score ticks and played seconds between the first and last matched notes.
fn matched_span(notes: &[Note], performed: &[PerformedNote], pairs: &[MatchedPair]) -> Option<(f64, f64)> {
    let mut matched = notes
        .iter()
        .zip(pairs)
        .filter_map(|(n, p)| Some((n.duration.xml_position, performed.get(p.performed()?)?.start)));
    let (first_tick, first_time) = matched.next()?;
    let (last_tick, last_time) = matched.last()?;
    let span = ((last_tick - first_tick) as f64, last_time - first_time);
    (span.0 > 0.0 && span.1 > 0.0).then_some(span)
}

fn beat_position(measure_positions: &[i64], position: i64, total_ticks: i64) -> f64 {
    if measure_positions.is_empty() {
        return 0.0;
    }
    let idx = search::at_or_before(measure_positions, &position);
    let start = measure_positions[idx];
    let length = match measure_positions.get(idx + 1) {
        Some(next) => next - start,
        None if idx > 0 => start - measure_positions[idx - 1],
        None => total_ticks - start,
    };
    if length <= 0 {
        return 0.0;
    }
    ((position - start) as f64 / length as f64).clamp(0.0, 1.0 - f64::EPSILON)
}
