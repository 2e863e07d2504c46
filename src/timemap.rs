//! Global time-position pass.
//!
//! Tempo markings can sit in any part or voice, so the provisional times the
//! parser computes while walking one part are wrong for notes of other parts
//! that precede the marking in document order. Once the whole tree is built,
//! every tempo event is collected, sorted by tick position, and each note and
//! direction gets its real time from the tempo segment that contains it.

use crate::model::{Document, TempoEvent};
use crate::parser::DEFAULT_QPM;
use crate::search;

/// Collect, sort and anchor all tempo events, then re-time every note and
/// direction. Fills `doc.tempos` and `doc.total_seconds`.
///
/// A note's `seconds` uses the tempo in force at its onset, even when a
/// tempo change falls inside the note.
pub fn apply_global_time(doc: &mut Document) {
    let tempos = anchored_tempos(doc);
    let ticks: Vec<i64> = tempos.iter().map(|t| t.xml_position).collect();

    for part in &mut doc.parts {
        for measure in &mut part.measures {
            for note in &mut measure.notes {
                let tempo = &tempos[search::at_or_before(&ticks, &note.duration.xml_position)];
                note.duration.time_position = time_at(tempo, note.duration.xml_position as f64);
                note.duration.seconds = note.duration.duration as f64 * tempo.seconds_per_tick();
            }
            for direction in &mut measure.directions {
                let tempo = &tempos[search::at_or_before(&ticks, &direction.xml_position)];
                direction.time_position = time_at(tempo, direction.xml_position as f64);
            }
            for event in &mut measure.tempos {
                let tempo = &tempos[search::at_or_before(&ticks, &event.xml_position)];
                event.time_position = time_at(tempo, event.xml_position as f64);
            }
        }
    }

    let last = &tempos[search::at_or_before(&ticks, &doc.total_ticks)];
    doc.total_seconds = time_at(last, doc.total_ticks as f64);
    log::debug!(
        "{} tempo event(s), {:.3} s over {} ticks",
        tempos.len(),
        doc.total_seconds,
        doc.total_ticks
    );
    doc.tempos = tempos;
}

/// Real time at a (possibly fractional) tick inside `tempo`'s segment.
pub fn time_at(tempo: &TempoEvent, xml_position: f64) -> f64 {
    tempo.time_position + (xml_position - tempo.xml_position as f64) * tempo.seconds_per_tick()
}

/// All tempo events of the document, stably sorted by tick, starting at
/// tick 0 and carrying cumulative real-time anchors.
fn anchored_tempos(doc: &Document) -> Vec<TempoEvent> {
    let mut tempos: Vec<TempoEvent> = doc
        .parts
        .iter()
        .flat_map(|p| p.measures.iter())
        .flat_map(|m| m.tempos.iter().copied())
        .collect();
    tempos.sort_by_key(|t| t.xml_position);

    if tempos.first().map_or(true, |t| t.xml_position != 0) {
        let divisions = tempos
            .first()
            .map(|t| t.divisions)
            .unwrap_or_else(|| doc.divisions_at(0.0));
        tempos.insert(
            0,
            TempoEvent {
                xml_position: 0,
                qpm: DEFAULT_QPM,
                divisions,
                time_position: 0.0,
            },
        );
    }

    let mut time = 0.0;
    for i in 0..tempos.len() {
        tempos[i].time_position = time;
        if let Some(next) = tempos.get(i + 1) {
            time += (next.xml_position - tempos[i].xml_position) as f64 * tempos[i].seconds_per_tick();
        }
    }
    tempos
}
