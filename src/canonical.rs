//! Note canonicalizer: turns the parsed note stream into one ordered,
//! de-duplicated sequence suitable for alignment.
//!
//! The passes run in a fixed order, each consuming the previous one's output:
//! grace attachment, chord propagation, tie merge, sort, overlap marking,
//! ornament resolution, slur resolution, rest coalescing and, on request,
//! melody reduction. Notes are cloned out of the [`Document`]; the document
//! itself is left untouched.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use crate::config::CanonicalizeOptions;
use crate::model::{Document, Note, Slur, SpanMark};
use crate::search;

/// Voice numbers are offset by this much per part so voices of different
/// parts never collide.
pub const VOICES_PER_PART: i32 = 10;

/// Canonical note sequence of a document.
pub fn canonicalize(doc: &Document, melody_only: bool, include_grace: bool) -> Vec<Note> {
    canonicalize_with(
        doc,
        &CanonicalizeOptions {
            melody_only,
            include_grace,
            ..CanonicalizeOptions::default()
        },
    )
}

/// Canonical note sequence of a document with explicit options.
pub fn canonicalize_with(doc: &Document, options: &CanonicalizeOptions) -> Vec<Note> {
    let stream = collect_notes(doc, options.melody_only);
    let (notes, rests) = attach_grace_notes(stream);
    let mut notes = propagate_grace_to_chords(notes);
    notes = merge_ties(notes);
    sort_canonical(&mut notes);
    mark_overlaps(&mut notes);
    notes = resolve_ornaments(notes);
    resolve_slurs(&mut notes);
    let rests = coalesce_rests(rests);
    apply_rests(&mut notes, &rests);

    if options.melody_only {
        notes.dedup_by_key(|n| (n.duration.xml_position, n.duration.grace_order));
    }
    if options.keep_rests {
        notes.extend(rests);
        sort_canonical(&mut notes);
    }
    if !options.include_grace {
        notes.retain(|n| !n.is_grace());
    }

    log::debug!(
        "canonicalized {} note(s) (melody_only={}, include_grace={})",
        notes.len(),
        options.melody_only,
        options.include_grace
    );
    notes
}

/// Stable canonical order: onset, then grace notes before the note they
/// lead into, then pitch from the top down. Rests sort after pitched notes
/// on the same onset.
pub fn sort_canonical(notes: &mut [Note]) {
    notes.sort_by_key(|n| (n.duration.xml_position, n.duration.grace_order, Reverse(n.midi_pitch())));
}

fn collect_notes(doc: &Document, melody_only: bool) -> Vec<Note> {
    let mut stream = Vec::new();
    for (part_index, part) in doc.parts.iter().enumerate() {
        for measure in &part.measures {
            for note in &measure.notes {
                let mut note = note.clone();
                note.voice += part_index as i32 * VOICES_PER_PART;
                if melody_only && note.voice != 1 {
                    continue;
                }
                stream.push(note);
            }
        }
    }
    stream
}

// ─── Grace notes ─────────────────────────────────────────────────────

/// Split rests off and number grace notes against the note that follows
/// them in the same voice. Returns `(notes, printed rests)`.
fn attach_grace_notes(stream: Vec<Note>) -> (Vec<Note>, Vec<Note>) {
    let mut notes: Vec<Note> = Vec::with_capacity(stream.len());
    let mut rests = Vec::new();
    // Indices into `notes` of grace notes still waiting for a principal.
    let mut pending: Vec<usize> = Vec::new();

    for mut note in stream {
        if note.is_grace() {
            pending.push(notes.len());
            notes.push(note);
        } else if !note.is_rest() {
            if !pending.is_empty() {
                let mut order = -1;
                let mut attached = Vec::new();
                let mut carried = Vec::new();
                for &gi in pending.iter().rev() {
                    let grace = &mut notes[gi];
                    if grace.voice == note.voice {
                        note.duration.preceded_by_grace_note = true;
                        grace.duration.grace_order = order;
                        grace.grace_principal = Some(note.id);
                        // Grace chords share one order.
                        if grace.chord_index == 0 {
                            order -= 1;
                        }
                        attached.push(gi);
                    } else {
                        carried.push(gi);
                    }
                }
                let num_grace = -order - 1;
                for gi in attached {
                    let grace = &mut notes[gi].duration;
                    grace.num_grace = num_grace;
                    grace.is_first_grace_note = grace.grace_order.abs() == num_grace;
                }
                carried.reverse();
                pending = carried;
            }
            notes.push(note);
        } else if note.is_print_object {
            rests.push(note);
        }
    }
    (notes, rests)
}

/// Chord members of a note preceded by grace notes share its grace timing.
fn propagate_grace_to_chords(mut notes: Vec<Note>) -> Vec<Note> {
    let onsets: HashSet<(i64, i32)> = notes
        .iter()
        .filter(|n| n.duration.preceded_by_grace_note)
        .map(|n| (n.duration.xml_position, n.voice))
        .collect();
    for note in notes.iter_mut().filter(|n| !n.is_grace()) {
        if onsets.contains(&(note.duration.xml_position, note.voice)) {
            note.duration.preceded_by_grace_note = true;
        }
    }
    notes
}

// ─── Ties ────────────────────────────────────────────────────────────

/// Fold every tie-stop note into the most recent open tie-start note of the
/// same pitch, preferring one in the same voice. The folded note disappears
/// from the sequence; the start stays open only if the stop continues the
/// tie.
pub fn merge_ties(notes: Vec<Note>) -> Vec<Note> {
    let mut merged: Vec<Note> = Vec::with_capacity(notes.len());
    // Indices into `merged` of tie starts not yet closed.
    let mut open: Vec<usize> = Vec::new();

    for note in notes {
        if !note.notations.tied_stop {
            if note.notations.tied_start {
                open.push(merged.len());
            }
            merged.push(note);
            continue;
        }
        let pitch = note.midi_pitch();
        let found = open
            .iter()
            .rposition(|&j| merged[j].midi_pitch() == pitch && merged[j].voice == note.voice)
            .or_else(|| open.iter().rposition(|&j| merged[j].midi_pitch() == pitch));
        match found {
            Some(k) => {
                let j = open[k];
                if !note.notations.tied_start {
                    open.remove(k);
                }
                let start = &mut merged[j];
                start.duration.duration += note.duration.duration;
                start.duration.seconds += note.duration.seconds;
                start.duration.midi_ticks += note.duration.midi_ticks;
                start.notations.slurs.extend(note.notations.slurs);
            }
            None if note.notations.tied_start => {
                log::warn!(
                    "tie stop without a matching start (pitch {:?}, tick {}); kept as a new tie start",
                    pitch,
                    note.duration.xml_position
                );
                open.push(merged.len());
                merged.push(note);
            }
            None => log::warn!(
                "tie stop without a matching start (pitch {:?}, tick {}); note dropped",
                pitch,
                note.duration.xml_position
            ),
        }
    }
    merged
}

// ─── Overlaps ────────────────────────────────────────────────────────

/// Among notes sharing onset, voice and pitch, flag the shorter one.
fn mark_overlaps(notes: &mut [Note]) {
    let mut seen: HashMap<(i64, i32, Option<i32>), usize> = HashMap::new();
    for i in 0..notes.len() {
        if notes[i].is_grace() {
            continue;
        }
        let key = (notes[i].duration.xml_position, notes[i].voice, notes[i].midi_pitch());
        match seen.get(&key) {
            Some(&prev) => {
                if notes[prev].duration.duration > notes[i].duration.duration {
                    notes[i].is_overlapped = true;
                } else {
                    notes[prev].is_overlapped = true;
                    seen.insert(key, i);
                }
            }
            None => {
                seen.insert(key, i);
            }
        }
    }
}

// ─── Ornaments ───────────────────────────────────────────────────────

/// A trill extension line resolved to a tick interval.
#[derive(Debug, Clone, Copy)]
struct TrillSpan {
    number: i32,
    start: i64,
    end: Option<i64>,
    pitch: i32,
}

fn resolve_ornaments(mut notes: Vec<Note>) -> Vec<Note> {
    promote_trills(&mut notes);

    // Trill marks on hidden notes go to a nearby printed note.
    let hidden_trills: Vec<(i64, i32)> = notes
        .iter()
        .filter(|n| !n.is_print_object && n.notations.is_trill)
        .filter_map(|n| Some((n.duration.xml_position, n.midi_pitch()?)))
        .collect();
    let spans = pair_wavy_lines(&notes);

    notes.retain(|n| n.is_print_object);

    for (position, pitch) in hidden_trills {
        if let Some(note) = notes.iter_mut().find(|n| {
            n.duration.xml_position == position
                && !n.is_grace()
                && n.midi_pitch().is_some_and(|p| (p - pitch).abs() < 4)
        }) {
            note.notations.is_trill = true;
        }
    }

    apply_wavy_lines(notes, &spans)
}

/// Move each trill flag to the highest non-grace note sounding at the same
/// onset in the same voice.
fn promote_trills(notes: &mut [Note]) {
    let positions: Vec<i64> = notes.iter().map(|n| n.duration.xml_position).collect();
    for i in 0..notes.len() {
        if !notes[i].notations.is_trill || notes[i].is_grace() {
            continue;
        }
        let position = positions[i];
        let voice = notes[i].voice;
        let lo = search::at_or_after(&positions, &position);
        let highest = (lo..notes.len())
            .take_while(|&j| notes[j].duration.xml_position == position)
            .filter(|&j| notes[j].voice == voice && !notes[j].is_grace())
            .max_by_key(|&j| (notes[j].midi_pitch(), Reverse(j)));
        if let Some(h) = highest {
            if h != i && notes[h].midi_pitch() > notes[i].midi_pitch() {
                notes[i].notations.is_trill = false;
                notes[h].notations.is_trill = true;
            }
        }
    }
}

/// Pair wavy-line starts with stops of the same number. Unpaired marks are
/// dropped.
fn pair_wavy_lines(notes: &[Note]) -> Vec<TrillSpan> {
    let mut spans: Vec<TrillSpan> = Vec::new();
    for note in notes {
        let (Some(wavy), Some(pitch)) = (note.notations.wavy_line, note.midi_pitch()) else {
            continue;
        };
        let position = note.duration.xml_position;
        match wavy.mark {
            SpanMark::Start => spans.push(TrillSpan {
                number: wavy.number,
                start: position,
                end: None,
                pitch,
            }),
            SpanMark::Stop => {
                if let Some(open) = spans
                    .iter_mut()
                    .rev()
                    .find(|s| s.end.is_none() && s.number == wavy.number)
                {
                    open.end = Some(position);
                }
            }
            SpanMark::Continue => {}
        }
    }
    spans.retain(|s| s.end.is_some_and(|end| end > s.start));
    spans
}

/// Stretch each trill's anchor over its span and drop the same-pitch notes
/// inside it, which spell out the trill rather than new onsets.
fn apply_wavy_lines(notes: Vec<Note>, spans: &[TrillSpan]) -> Vec<Note> {
    if notes.is_empty() || spans.is_empty() {
        return notes;
    }
    let mut notes = notes;
    let positions: Vec<i64> = notes.iter().map(|n| n.duration.xml_position).collect();
    let mut omit: HashSet<usize> = HashSet::new();

    for span in spans {
        let Some(end) = span.end else { continue };
        let mut index = search::at_or_before(&positions, &span.start);
        while index > 0
            && positions[index - 1] == positions[index]
            && notes[index].midi_pitch().map_or(true, |p| (p - span.pitch).abs() > 3)
        {
            index -= 1;
        }

        let anchor = &mut notes[index];
        let length = end - span.start;
        if anchor.duration.duration > 0 {
            let scale = length as f64 / anchor.duration.duration as f64;
            anchor.duration.seconds *= scale;
            anchor.duration.midi_ticks *= scale;
        }
        anchor.duration.duration = length;
        let trill_pitch = anchor.midi_pitch();

        for (j, note) in notes.iter().enumerate().skip(index + 1) {
            if note.duration.xml_position >= end {
                break;
            }
            if note.midi_pitch() == trill_pitch {
                omit.insert(j);
            }
        }
    }

    notes
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !omit.contains(i))
        .map(|(_, n)| n)
        .collect()
}

// ─── Slurs ───────────────────────────────────────────────────────────

/// Pair slur starts and stops per voice and flag every note under a
/// resolved slur.
fn resolve_slurs(notes: &mut [Note]) {
    let mut unresolved: Vec<Slur> = Vec::new();
    let mut resolved: Vec<Slur> = Vec::new();
    let mut next_index = 0;

    for note in notes.iter_mut() {
        if note.notations.slurs.is_empty() {
            continue;
        }
        let position = note.duration.xml_position;
        let marks = std::mem::take(&mut note.notations.slurs);
        let mut kept = Vec::with_capacity(marks.len());
        for mut slur in marks.into_iter().rev() {
            slur.xml_position = position;
            slur.voice = note.voice;
            match slur.mark {
                SpanMark::Start => {
                    slur.index = next_index;
                    next_index += 1;
                    note.notations.is_slur_start = true;
                    unresolved.push(slur.clone());
                    kept.push(slur);
                }
                SpanMark::Stop => {
                    note.notations.is_slur_stop = true;
                    match unresolved
                        .iter()
                        .position(|s| s.number == slur.number && s.voice == slur.voice)
                    {
                        Some(k) => {
                            let mut open = unresolved.remove(k);
                            open.end_xml_position = position;
                            resolved.push(open.clone());
                            kept.push(open);
                        }
                        None => kept.push(slur),
                    }
                }
                SpanMark::Continue => kept.push(slur),
            }
        }
        kept.reverse();
        note.notations.slurs = kept;
    }

    let ends: HashMap<usize, i64> = resolved.iter().map(|s| (s.index, s.end_xml_position)).collect();
    for note in notes.iter_mut() {
        for slur in note.notations.slurs.iter_mut() {
            if slur.mark == SpanMark::Start {
                if let Some(&end) = ends.get(&slur.index) {
                    slur.end_xml_position = end;
                }
            }
        }
    }

    for note in notes.iter_mut().filter(|n| n.notations.slurs.is_empty()) {
        let position = note.duration.xml_position;
        for slur in resolved
            .iter()
            .filter(|s| s.voice == note.voice && s.xml_position <= position && position <= s.end_xml_position)
        {
            note.notations.slurs.push(slur.clone());
            if slur.xml_position == position {
                note.notations.is_slur_start = true;
            } else if slur.end_xml_position == position {
                note.notations.is_slur_stop = true;
            } else {
                note.notations.is_slur_continue = true;
            }
        }
    }
}

// ─── Rests ───────────────────────────────────────────────────────────

/// Merge runs of same-voice rests whose tick ranges touch.
fn coalesce_rests(mut rests: Vec<Note>) -> Vec<Note> {
    rests.sort_by_key(|r| (r.voice, r.duration.xml_position));
    let mut merged: Vec<Note> = Vec::with_capacity(rests.len());
    for rest in rests {
        if rest.duration.duration == 0 {
            continue;
        }
        if let Some(last) = merged.last_mut() {
            if last.voice == rest.voice && last.end_xml_position() == rest.duration.xml_position {
                last.duration.duration += rest.duration.duration;
                last.duration.seconds += rest.duration.seconds;
                last.duration.midi_ticks += rest.duration.midi_ticks;
                last.notations.is_fermata |= rest.notations.is_fermata;
                continue;
            }
        }
        merged.push(rest);
    }
    merged
}

/// Record each rest's length on the note of the same voice that it follows.
fn apply_rests(notes: &mut [Note], rests: &[Note]) {
    let mut by_end: HashMap<(i32, i64), Vec<usize>> = HashMap::new();
    for (i, note) in notes.iter().enumerate() {
        if !note.is_grace() {
            by_end.entry((note.voice, note.end_xml_position())).or_default().push(i);
        }
    }
    for rest in rests {
        if let Some(indices) = by_end.get(&(rest.voice, rest.duration.xml_position)) {
            for &i in indices {
                notes[i].duration.following_rest_duration = rest.duration.duration;
                if rest.notations.is_fermata {
                    notes[i].followed_by_fermata_rest = true;
                }
            }
        }
    }
}
