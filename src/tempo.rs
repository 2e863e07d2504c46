//! Tempo-curve engine: a piecewise-constant tempo reconstructed from an
//! alignment, laid over the felt-beat grid of the score.

use serde::{Deserialize, Serialize};

use crate::alignment::MatchedPair;
use crate::config::TempoConfig;
use crate::model::{Document, Note, TimeSignature};
use crate::performance::PerformedNote;
use crate::search;

/// Constant-tempo interval `[tick_start, tick_end)` anchored in real time at
/// `tick_start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoSegment {
    pub tick_start: i64,
    pub tick_end: i64,
    pub time_start: f64,
    pub qpm: f64,
    pub divisions: i32,
}

impl TempoSegment {
    pub fn seconds_per_tick(&self) -> f64 {
        60.0 / self.qpm / self.divisions.max(1) as f64
    }

    pub fn time_at(&self, tick: f64) -> f64 {
        self.time_start + (tick - self.tick_start as f64) * self.seconds_per_tick()
    }

    pub fn tick_at(&self, time: f64) -> f64 {
        self.tick_start as f64 + (time - self.time_start) / self.seconds_per_tick()
    }
}

/// A matched score position and where it was played.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionPair {
    pub xml_position: i64,
    pub time: f64,
    pub pitch: i32,
}

/// Ordered, contiguous tempo segments with lookups in both directions.
/// Positions outside the covered range extrapolate from the nearest segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoCurve {
    pub segments: Vec<TempoSegment>,
}

impl TempoCurve {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment containing `tick`.
    pub fn segment_at(&self, tick: f64) -> Option<&TempoSegment> {
        let starts: Vec<f64> = self.segments.iter().map(|s| s.tick_start as f64).collect();
        self.segments.get(search::at_or_before(&starts, &tick))
    }

    pub fn tick_to_time(&self, tick: f64) -> Option<f64> {
        self.segment_at(tick).map(|s| s.time_at(tick))
    }

    pub fn time_to_tick(&self, time: f64) -> Option<f64> {
        let starts: Vec<f64> = self.segments.iter().map(|s| s.time_start).collect();
        self.segments
            .get(search::at_or_before(&starts, &time))
            .map(|s| s.tick_at(time))
    }

    pub fn qpm_at(&self, tick: f64) -> Option<f64> {
        self.segment_at(tick).map(|s| s.qpm)
    }
}

/// Tick positions of the felt beats of the first part.
///
/// Compound meters count dotted beats. A measure shorter than its time
/// signature (a pickup or a split measure) gets the beats that fit its
/// length; the opening pickup counts them backward from the next barline.
/// With `measure_level` every measure contributes only its downbeat.
pub fn beat_positions(doc: &Document, measure_level: bool) -> Vec<f64> {
    let Some(part) = doc.parts.first() else {
        return Vec::new();
    };
    let measures = &part.measures;
    let mut beats: Vec<f64> = Vec::new();
    let mut time_signature: Option<TimeSignature> = None;

    for (i, measure) in measures.iter().enumerate() {
        if measure.time_signature.is_some() {
            time_signature = measure.time_signature;
        }
        let (numerator, denominator) = time_signature.map_or((4, 4), |t| (t.numerator, t.denominator));
        let signature = TimeSignature {
            numerator,
            denominator,
            xml_position: measure.start_xml_position,
            divisions: measure.divisions.max(1),
        };
        let start = measure.start_xml_position as f64;
        let full_length = signature.measure_ticks();
        let next_start = measures.get(i + 1).map(|m| m.start_xml_position as f64);
        let actual_length = match next_start {
            Some(next) => next - start,
            None if measure.implicit => doc.total_ticks as f64 - start,
            None => full_length,
        };

        let mut beat_count = if measure_level { 1 } else { signature.beats_per_measure().max(1) };
        let interval = full_length / beat_count as f64;

        let implicit = measure.implicit || (actual_length - full_length).abs() > f64::EPSILON;
        if implicit && full_length > 0.0 {
            let ratio = actual_length / full_length;
            beat_count = (ratio * beat_count as f64 - 1e-9).ceil().max(0.0) as i32;
            if let (0, Some(next)) = (i, next_start) {
                for j in (1..=beat_count).rev() {
                    push_increasing(&mut beats, next - j as f64 * interval);
                }
                continue;
            }
        }
        for j in 0..beat_count {
            push_increasing(&mut beats, start + j as f64 * interval);
        }
    }
    beats
}

fn push_increasing(beats: &mut Vec<f64>, beat: f64) {
    if beats.last().map_or(true, |&last| beat > last) {
        beats.push(beat);
    }
}

/// Matched, non-grace notes as (tick, time) anchors sorted by tick then
/// pitch. Chord members played within `min_chord_gap` seconds of the lowest
/// one collapse onto it.
pub fn position_pairs(
    notes: &[Note],
    performed: &[PerformedNote],
    pairs: &[MatchedPair],
    config: &TempoConfig,
) -> Vec<PositionPair> {
    let mut anchors: Vec<PositionPair> = notes
        .iter()
        .zip(pairs)
        .filter(|(note, _)| !note.is_grace())
        .filter_map(|(note, pair)| {
            let played = performed.get(pair.performed()?)?;
            Some(PositionPair {
                xml_position: note.duration.xml_position,
                time: played.start,
                pitch: note.midi_pitch()?,
            })
        })
        .collect();
    anchors.sort_by_key(|a| (a.xml_position, a.pitch));

    let mut collapsed: Vec<PositionPair> = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        if let Some(kept) = collapsed.last() {
            if kept.xml_position == anchor.xml_position && (anchor.time - kept.time).abs() < config.min_chord_gap {
                continue;
            }
        }
        collapsed.push(anchor);
    }
    collapsed
}

/// Build a tempo curve from an alignment.
///
/// Each beat is anchored on the first matched position at or after it, and a
/// segment spans from one accepted anchor to the next. Anchors that do not
/// move forward in both ticks and seconds are skipped. The first segment is
/// extended back to tick 0 and the last forward to the end of the piece.
pub fn reconstruct_tempo(
    doc: &Document,
    notes: &[Note],
    performed: &[PerformedNote],
    pairs: &[MatchedPair],
    config: &TempoConfig,
) -> TempoCurve {
    let beats = beat_positions(doc, config.measure_level);
    let anchors = position_pairs(notes, performed, pairs, config);
    let curve = segments_from_anchors(doc, &beats, &anchors);
    log::debug!(
        "tempo curve: {} segment(s) over {} beat(s) and {} anchor(s)",
        curve.segments.len(),
        beats.len(),
        anchors.len()
    );
    curve
}

fn segments_from_anchors(doc: &Document, beats: &[f64], anchors: &[PositionPair]) -> TempoCurve {
    let ticks: Vec<f64> = anchors.iter().map(|a| a.xml_position as f64).collect();
    let anchor_at = |beat: f64| anchors.get(search::at_or_after(&ticks, &beat));

    let mut segments: Vec<TempoSegment> = Vec::new();
    let mut skipped = 0usize;
    let mut current = beats.first().and_then(|&b| anchor_at(b)).copied();

    for &beat in beats.iter().skip(1) {
        let (Some(cur), Some(&next)) = (current, anchor_at(beat)) else {
            break;
        };
        let tick_span = next.xml_position - cur.xml_position;
        let time_span = next.time - cur.time;
        if tick_span <= 0 || time_span <= 0.0 {
            skipped += 1;
            continue;
        }
        let divisions = doc.divisions_at(cur.xml_position as f64);
        segments.push(TempoSegment {
            tick_start: cur.xml_position,
            tick_end: next.xml_position,
            time_start: cur.time,
            qpm: tick_span as f64 / time_span / divisions as f64 * 60.0,
            divisions,
        });
        current = Some(next);
    }
    if skipped > 0 {
        log::debug!("skipped {skipped} degenerate tempo segment(s)");
    }

    if let Some(first) = segments.first_mut() {
        if first.tick_start > 0 {
            first.time_start = first.time_at(0.0);
            first.tick_start = 0;
        }
    }
    if let Some(last) = segments.last_mut() {
        last.tick_end = last.tick_end.max(doc.total_ticks);
    }
    TempoCurve { segments }
}
