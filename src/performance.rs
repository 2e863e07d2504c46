//! Performed note streams and the side inputs that travel with them:
//! sustain pedal events and correspondence tables between two
//! performances of the same piece.

use serde::{Deserialize, Serialize};

use crate::config::PedalConfig;

/// One performed note event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformedNote {
    /// MIDI pitch
    pub pitch: i32,
    /// Onset in seconds
    pub start: f64,
    /// Offset in seconds
    pub end: f64,
    /// 0..=127
    pub velocity: i32,
}

impl PerformedNote {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A control change on a sustain controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PedalEvent {
    pub time: f64,
    /// 0..=127
    pub value: i32,
    /// Controller number (64 for sustain; some datasets use 127)
    pub controller: u8,
}

/// An interval during which the sustain pedal is held.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SustainSpan {
    pub start: f64,
    pub end: f64,
}

/// Turn pedal control events into held spans.
///
/// A value above the threshold engages the pedal and a value at or below it
/// releases it. An engage while already held closes the current span and
/// opens a new one. A span still open at the end is closed at `piece_end`.
pub fn sustain_spans(events: &[PedalEvent], config: &PedalConfig, piece_end: f64) -> Vec<SustainSpan> {
    let mut sorted: Vec<&PedalEvent> = events
        .iter()
        .filter(|e| config.controllers.contains(&e.controller))
        .collect();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut spans = Vec::new();
    let mut open: Option<f64> = None;
    for event in sorted {
        if event.value > config.threshold {
            if let Some(start) = open.take() {
                spans.push(SustainSpan { start, end: event.time });
            }
            open = Some(event.time);
        } else if let Some(start) = open.take() {
            spans.push(SustainSpan { start, end: event.time });
        } else {
            log::warn!("sustain release at {:.3} s without a preceding engage; ignored", event.time);
        }
    }
    if let Some(start) = open {
        log::warn!("sustain pedal still held at the end; closing at {piece_end:.3} s");
        spans.push(SustainSpan { start, end: piece_end.max(start) });
    }
    spans
}

/// Extend every note released while the pedal is held to the pedal release.
pub fn elongate_offsets_by_pedal(notes: &mut [PerformedNote], spans: &[SustainSpan]) {
    for span in spans {
        for note in notes.iter_mut() {
            if span.start < note.end && note.end <= span.end {
                note.end = span.end;
            }
        }
    }
}

/// Latest offset of a performance, 0 when empty.
pub fn performance_end(notes: &[PerformedNote]) -> f64 {
    notes.iter().map(|n| n.end).fold(0.0, f64::max)
}

/// One row of a correspondence table: the same note as played in a
/// reference performance and in an aligned performance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub ref_time: f64,
    pub ref_pitch: i32,
    pub aligned_time: f64,
    pub aligned_pitch: i32,
}

/// Mapping between two performed-note timelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceTable {
    pub rows: Vec<Correspondence>,
}

impl CorrespondenceTable {
    pub fn new(rows: Vec<Correspondence>) -> Self {
        Self { rows }
    }

    /// Read the tab-separated format written by symbolic alignment tools:
    ///
    /// `alignID alignOntime alignSitch alignPitch alignOnvel refID refOntime refSitch refPitch refOnvel`
    ///
    /// Comment lines, short rows and rows whose times or pitches are not
    /// numbers (unaligned notes are written as `*`) are skipped.
    pub fn from_tsv(text: &str) -> Self {
        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with("//") {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 10 {
                skipped += 1;
                continue;
            }
            let parsed = (
                fields[1].trim().parse::<f64>(),
                fields[3].trim().parse::<i32>(),
                fields[6].trim().parse::<f64>(),
                fields[8].trim().parse::<i32>(),
            );
            match parsed {
                (Ok(aligned_time), Ok(aligned_pitch), Ok(ref_time), Ok(ref_pitch)) => {
                    rows.push(Correspondence {
                        ref_time,
                        ref_pitch,
                        aligned_time,
                        aligned_pitch,
                    });
                }
                _ => skipped += 1,
            }
        }
        log::debug!("correspondence table: {} row(s), {} skipped", rows.len(), skipped);
        Self { rows }
    }

    /// First row whose reference onset is within `epsilon` of `ref_time`
    /// and whose reference pitch equals `ref_pitch`.
    pub fn lookup(&self, ref_time: f64, ref_pitch: i32, epsilon: f64) -> Option<&Correspondence> {
        self.rows
            .iter()
            .find(|r| (r.ref_time - ref_time).abs() < epsilon && r.ref_pitch == ref_pitch)
    }
}

/// First performed note starting within `epsilon` of `time` with `pitch`.
pub fn find_performed(notes: &[PerformedNote], time: f64, pitch: i32, epsilon: f64) -> Option<usize> {
    notes
        .iter()
        .position(|n| (n.start - time).abs() < epsilon && n.pitch == pitch)
}
