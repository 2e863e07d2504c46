//! MusicXML parser: builds the temporal document model from `score-partwise`
//! markup.
//!
//! One [`ParserState`] is threaded through the whole document. It carries the
//! current divisions and tempo, the running tick and time cursors, the active
//! transposition and what the previous note looked like (chord notes take
//! their onset and duration from it). Time positions computed here are
//! provisional; [`crate::timemap::apply_global_time`] overwrites them once
//! every tempo event in the piece is known.

use roxmltree::{Document as XmlDocument, Node};

use crate::config::ParseOptions;
use crate::error::{Result, ScoreError};
use crate::midi::TICKS_PER_QUARTER;
use crate::model::*;
use crate::timemap;
use crate::unroller::{self, EndingMark, MeasureMarks};

/// Tempo assumed until the score says otherwise.
pub const DEFAULT_QPM: f64 = 120.0;

/// Parse a MusicXML string with default options.
pub fn parse_musicxml(xml: &str) -> Result<Document> {
    parse_musicxml_with(xml, &ParseOptions::default())
}

/// Parse a MusicXML string into a [`Document`] with resolved tick and
/// real-time positions.
pub fn parse_musicxml_with(xml: &str, options: &ParseOptions) -> Result<Document> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let parsing = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let xml_doc = XmlDocument::parse_with_options(xml, parsing)
        .map_err(|e| ScoreError::MalformedInput(format!("XML parse error: {e}")))?;
    let root = xml_doc.root_element();

    if root.tag_name().name() != "score-partwise" {
        return Err(ScoreError::MalformedInput(format!(
            "Unsupported root element: '{}'. Only 'score-partwise' is supported.",
            root.tag_name().name()
        )));
    }

    let mut doc = Document::new();
    doc.version = root.attribute("version").map(String::from);

    let mut state = ParserState::new();
    let mut score_parts: Vec<Part> = Vec::new();

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut doc),
            "movement-title" => {
                if doc.title.is_none() {
                    doc.title = text_of(&child);
                }
            }
            "identification" => parse_identification(&child, &mut doc),
            "credit" => parse_credit(&child, &mut doc),
            "part-list" => score_parts = parse_part_list(&child),
            "part" => {
                let part = parse_part(&child, &score_parts, &mut state, options)?;
                doc.total_ticks = doc.total_ticks.max(state.xml_position);
                doc.parts.push(part);
            }
            _ => {}
        }
    }

    log::debug!(
        "parsed {} part(s), {} measure(s) in the first part, {} ticks",
        doc.parts.len(),
        doc.measure_count(),
        doc.total_ticks
    );

    timemap::apply_global_time(&mut doc);
    Ok(doc)
}

// ─── Parser state ────────────────────────────────────────────────────

/// Mutable cursor state threaded through the document.
#[derive(Debug, Clone)]
struct ParserState {
    divisions: i32,
    qpm: f64,
    seconds_per_quarter: f64,
    xml_position: i64,
    time_position: f64,
    /// Semitones added to every computed MIDI pitch
    transpose: i32,
    chord_index: u32,
    previous_note_xml_position: i64,
    previous_note_time_position: f64,
    previous_note_duration: i64,
    next_note_id: usize,
}

impl ParserState {
    fn new() -> Self {
        Self {
            divisions: 1,
            qpm: DEFAULT_QPM,
            seconds_per_quarter: 60.0 / DEFAULT_QPM,
            xml_position: 0,
            time_position: 0.0,
            transpose: 0,
            chord_index: 0,
            previous_note_xml_position: 0,
            previous_note_time_position: 0.0,
            previous_note_duration: 0,
            next_note_id: 0,
        }
    }

    /// Cursors and transposition restart with every part; divisions, tempo
    /// and note numbering carry over.
    fn reset_for_part(&mut self) {
        self.xml_position = 0;
        self.time_position = 0.0;
        self.transpose = 0;
        self.chord_index = 0;
        self.previous_note_xml_position = 0;
        self.previous_note_time_position = 0.0;
        self.previous_note_duration = 0;
    }

    fn set_qpm(&mut self, qpm: f64) {
        self.qpm = qpm;
        self.seconds_per_quarter = 60.0 / qpm;
    }

    fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 / self.divisions as f64 * self.seconds_per_quarter
    }

    fn advance(&mut self, ticks: i64) {
        self.xml_position += ticks;
        self.time_position += self.ticks_to_seconds(ticks);
    }

    fn tempo_event(&self, qpm: f64) -> TempoEvent {
        TempoEvent {
            xml_position: self.xml_position,
            qpm,
            divisions: self.divisions,
            time_position: self.time_position,
        }
    }
}

/// Where an error was found, for error messages.
struct Location<'a> {
    part: &'a str,
    measure: i32,
}

// ─── Work / identification / credits ─────────────────────────────────

fn parse_work(node: &Node, doc: &mut Document) {
    for child in node.children().filter(|n| n.is_element()) {
        // <credit type="title"> takes priority
        if child.tag_name().name() == "work-title" && doc.title.is_none() {
            doc.title = text_of(&child);
        }
    }
}

fn parse_identification(node: &Node, doc: &mut Document) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "creator"
            && child.attribute("type") == Some("composer")
            && doc.composer.is_none()
        {
            doc.composer = text_of(&child);
        }
    }
}

fn parse_credit(node: &Node, doc: &mut Document) {
    let mut credit_type = String::new();
    let mut credit_text = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "credit-type" => credit_type = child.text().unwrap_or("").trim().to_string(),
            "credit-words" => {
                let text = child.text().unwrap_or("").trim();
                if !text.is_empty() {
                    if !credit_text.is_empty() {
                        credit_text.push('\n');
                    }
                    credit_text.push_str(text);
                }
            }
            _ => {}
        }
    }

    if credit_text.is_empty() {
        return;
    }
    match credit_type.as_str() {
        "title" => doc.title = Some(credit_text),
        "composer" => doc.composer = Some(credit_text),
        _ => {}
    }
}

// ─── Part list ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node) -> Vec<Part> {
    let mut parts = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "score-part" {
            continue;
        }
        let mut part = empty_part(child.attribute("id").unwrap_or(""));
        for sp_child in child.children().filter(|n| n.is_element()) {
            match sp_child.tag_name().name() {
                "part-name" => part.name = sp_child.text().unwrap_or("").trim().to_string(),
                "midi-instrument" => {
                    for midi in sp_child.children().filter(|n| n.is_element()) {
                        match midi.tag_name().name() {
                            "midi-channel" => part.midi_channel = parse_i32(&midi),
                            "midi-program" => part.midi_program = parse_i32(&midi),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        parts.push(part);
    }
    parts
}

fn empty_part(id: &str) -> Part {
    Part {
        id: id.to_string(),
        name: String::new(),
        midi_program: None,
        midi_channel: None,
        measures: Vec::new(),
    }
}

// ─── Part (measures) ─────────────────────────────────────────────────

fn parse_part(
    node: &Node,
    score_parts: &[Part],
    state: &mut ParserState,
    options: &ParseOptions,
) -> Result<Part> {
    let part_id = node.attribute("id").unwrap_or("");
    // A part missing from the part-list still gets parsed.
    let mut part = score_parts
        .iter()
        .find(|p| p.id == part_id)
        .cloned()
        .unwrap_or_else(|| empty_part(part_id));

    let xml_measures: Vec<Node> = node
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "measure")
        .collect();

    let order: Vec<usize> = if options.expand_repeats {
        let marks: Vec<MeasureMarks> = xml_measures.iter().map(scan_measure_marks).collect();
        unroller::play_order(&marks)
    } else {
        (0..xml_measures.len()).collect()
    };
    if order.len() != xml_measures.len() {
        log::debug!(
            "part '{}': {} written measures expand to {} in play order",
            part.id,
            xml_measures.len(),
            order.len()
        );
    }

    state.reset_for_part();
    for source_index in order {
        let measure_index = part.measures.len();
        let measure = parse_measure(
            &xml_measures[source_index],
            source_index,
            measure_index,
            &part.id,
            state,
        )?;
        part.measures.push(measure);
    }

    Ok(part)
}

/// Pre-scan one measure for barline repeats, volta endings and jumps.
fn scan_measure_marks(node: &Node) -> MeasureMarks {
    let mut marks = MeasureMarks::default();
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "barline" => {
                let location = child.attribute("location").unwrap_or("right");
                for bl in child.children().filter(|n| n.is_element()) {
                    match bl.tag_name().name() {
                        "repeat" => match bl.attribute("direction") {
                            Some("backward") if location == "right" => marks.backward_repeat = true,
                            Some("forward") if location == "left" => marks.forward_repeat = true,
                            _ => {}
                        },
                        "ending" => marks.endings.push(EndingMark {
                            numbers: unroller::parse_ending_numbers(
                                bl.attribute("number").unwrap_or("1"),
                            ),
                            start: bl.attribute("type").unwrap_or("start") == "start",
                        }),
                        _ => {}
                    }
                }
            }
            "direction" => {
                for d in child.descendants().filter(|n| n.is_element()) {
                    match d.tag_name().name() {
                        "segno" => marks.segno = true,
                        "coda" => marks.coda = true,
                        "words" => {
                            if d.text().is_some_and(unroller::words_mark_fine) {
                                marks.fine = true;
                            }
                        }
                        "sound" => scan_sound_marks(&d, &mut marks),
                        _ => {}
                    }
                }
            }
            "sound" => scan_sound_marks(&child, &mut marks),
            _ => {}
        }
    }
    marks
}

fn scan_sound_marks(sound: &Node, marks: &mut MeasureMarks) {
    if sound.attribute("segno").is_some() {
        marks.segno = true;
    }
    if sound.attribute("coda").is_some() {
        marks.coda = true;
    }
    if sound.attribute("dacapo") == Some("yes") {
        marks.dacapo = true;
    }
    if sound.attribute("dalsegno").is_some() {
        marks.dalsegno = true;
    }
    if sound.attribute("fine").is_some() {
        marks.fine = true;
    }
    if sound.attribute("tocoda").is_some() {
        marks.tocoda = true;
    }
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(
    node: &Node,
    source_index: usize,
    measure_index: usize,
    part_id: &str,
    state: &mut ParserState,
) -> Result<Measure> {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let loc = Location {
        part: part_id,
        measure: number,
    };

    let mut measure = Measure {
        number,
        source_index,
        implicit: node.attribute("implicit") == Some("yes"),
        start_xml_position: state.xml_position,
        divisions: state.divisions,
        time_signature: None,
        notes: Vec::new(),
        directions: Vec::new(),
        tempos: Vec::new(),
    };

    let children: Vec<Node> = node.children().filter(|n| n.is_element()).collect();
    let note_count = children.iter().filter(|n| n.tag_name().name() == "note").count();
    let forward_count = children.iter().filter(|n| n.tag_name().name() == "forward").count();
    // A lone <forward> in a note-less measure stands for a whole-measure rest.
    let repair_empty = note_count == 0 && forward_count == 1;
    let mut furthest = state.xml_position;

    for child in &children {
        match child.tag_name().name() {
            "attributes" => parse_attributes(child, state, &mut measure)?,
            "note" => {
                let note = parse_note(child, measure_index, &loc, state)?;
                measure.notes.push(note);
            }
            "backup" => {
                let ticks = duration_child(child)?.unwrap_or(0);
                state.advance(-ticks);
            }
            "forward" => {
                let ticks = duration_child(child)?.unwrap_or(0);
                if repair_empty {
                    measure.notes.push(whole_measure_rest(ticks, measure_index, state));
                } else {
                    state.advance(ticks);
                }
            }
            "direction" => parse_direction(child, state, &mut measure),
            "sound" => {
                if let Some(qpm) = sound_tempo(child) {
                    apply_tempo(qpm, state, &mut measure);
                }
            }
            _ => {}
        }
        furthest = furthest.max(state.xml_position);
    }

    // Voices that end early or a trailing <backup> leave the cursor short
    // of the measure end.
    if furthest > state.xml_position {
        let gap = furthest - state.xml_position;
        state.advance(gap);
    }
    measure.divisions = state.divisions;
    Ok(measure)
}

fn whole_measure_rest(ticks: i64, measure_index: usize, state: &mut ParserState) -> Note {
    let duration = NoteDuration {
        duration: ticks,
        xml_position: state.xml_position,
        time_position: state.time_position,
        seconds: state.ticks_to_seconds(ticks),
        midi_ticks: midi_ticks(ticks, state.divisions),
        note_type: Some("whole".to_string()),
        ..NoteDuration::default()
    };
    let note = Note {
        id: state.next_note_id,
        pitch: None,
        voice: 1,
        staff: 1,
        chord_index: 0,
        is_in_chord: false,
        is_print_object: true,
        is_overlapped: false,
        measure_index,
        accidental: None,
        grace_principal: None,
        duration,
        notations: Notations::default(),
        followed_by_fermata_rest: false,
    };
    state.next_note_id += 1;
    state.chord_index = 0;
    state.previous_note_xml_position = state.xml_position;
    state.previous_note_time_position = state.time_position;
    state.previous_note_duration = ticks;
    state.advance(ticks);
    note
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(node: &Node, state: &mut ParserState, measure: &mut Measure) -> Result<()> {
    let mut time: Option<(i32, i32)> = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                let divisions = parse_i32(&child).filter(|d| *d > 0).ok_or_else(|| {
                    ScoreError::MalformedInput(format!(
                        "invalid <divisions> '{}' in measure {}",
                        child.text().unwrap_or("").trim(),
                        measure.number
                    ))
                })?;
                state.divisions = divisions;
            }
            "time" => time = parse_time(&child),
            "transpose" => {
                let mut chromatic = 0;
                let mut octave_change = 0;
                for t in child.children().filter(|n| n.is_element()) {
                    match t.tag_name().name() {
                        "chromatic" => chromatic = parse_i32(&t).unwrap_or(0),
                        "octave-change" => octave_change = parse_i32(&t).unwrap_or(0),
                        _ => {}
                    }
                }
                state.transpose = chromatic + 12 * octave_change;
            }
            _ => {}
        }
    }

    if let Some((numerator, denominator)) = time {
        measure.time_signature = Some(TimeSignature {
            numerator,
            denominator,
            xml_position: state.xml_position,
            divisions: state.divisions,
        });
    }
    measure.divisions = state.divisions;
    Ok(())
}

fn parse_time(node: &Node) -> Option<(i32, i32)> {
    let mut beats = None;
    let mut beat_type = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beats" => beats = parse_i32(&child),
            "beat-type" => beat_type = parse_i32(&child),
            _ => {}
        }
    }
    match (beats, beat_type) {
        (Some(b), Some(t)) if b > 0 && t > 0 => Some((b, t)),
        _ => match node.attribute("symbol") {
            Some("cut") => Some((2, 2)),
            Some("common") => Some((4, 4)),
            _ => None,
        },
    }
}

// ─── Note ────────────────────────────────────────────────────────────

/// Everything read off a `<note>` element before timing is applied.
#[derive(Default)]
struct RawNote {
    chord: bool,
    grace: bool,
    rest: bool,
    unpitched: bool,
    step: Option<String>,
    alter: f64,
    octave: i32,
    duration: Option<i64>,
    voice: Option<i32>,
    staff: Option<i32>,
    dots: u32,
    note_type: Option<String>,
    tuplet: TupletRatio,
    accidental: Option<String>,
    notations: Notations,
}

fn parse_note(node: &Node, measure_index: usize, loc: &Location, state: &mut ParserState) -> Result<Note> {
    let mut raw = RawNote {
        octave: 4,
        ..RawNote::default()
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "chord" => raw.chord = true,
            "grace" => {
                raw.grace = true;
                raw.notations.is_slash = child.attribute("slash") == Some("yes");
            }
            "cue" => raw.notations.is_cue = true,
            "rest" => raw.rest = true,
            "unpitched" => raw.unpitched = true,
            "pitch" => {
                for p in child.children().filter(|n| n.is_element()) {
                    match p.tag_name().name() {
                        "step" => raw.step = text_of(&p),
                        "alter" => raw.alter = parse_f64(&p).unwrap_or(0.0),
                        "octave" => raw.octave = parse_i32(&p).unwrap_or(4),
                        _ => {}
                    }
                }
            }
            "duration" => raw.duration = duration_value(&child)?,
            "voice" => raw.voice = parse_i32(&child),
            "staff" => raw.staff = parse_i32(&child),
            "type" => raw.note_type = text_of(&child),
            "dot" => raw.dots += 1,
            "time-modification" => {
                for tm in child.children().filter(|n| n.is_element()) {
                    match tm.tag_name().name() {
                        "actual-notes" => raw.tuplet.actual = parse_i32(&tm).unwrap_or(1).max(1),
                        "normal-notes" => raw.tuplet.normal = parse_i32(&tm).unwrap_or(1).max(1),
                        _ => {}
                    }
                }
            }
            "accidental" => raw.accidental = text_of(&child),
            "tie" => match child.attribute("type") {
                Some("start") => raw.notations.tied_start = true,
                Some("stop") => raw.notations.tied_stop = true,
                _ => {}
            },
            "beam" => match child.text().map(str::trim) {
                Some("begin") => raw.notations.is_beam_start = true,
                Some("continue") => raw.notations.is_beam_continue = true,
                Some("end") => raw.notations.is_beam_stop = true,
                _ => {}
            },
            "notations" => parse_notations(&child, &mut raw.notations),
            _ => {}
        }
    }

    if raw.unpitched {
        return Err(ScoreError::UnsupportedNote {
            part: loc.part.to_string(),
            measure: loc.measure,
            tick: state.xml_position,
        });
    }

    let pitch = match (&raw.step, raw.rest) {
        (Some(step), false) => Some(make_pitch(step, raw.alter, raw.octave, loc, state)?),
        _ => None,
    };

    // Chord members take the onset of the note they stack on.
    if raw.chord {
        state.chord_index += 1;
    } else {
        state.chord_index = 0;
    }

    let mut duration = NoteDuration {
        dots: raw.dots,
        note_type: raw.note_type,
        tuplet_ratio: raw.tuplet,
        is_grace_note: raw.grace,
        ..NoteDuration::default()
    };
    duration.duration = if raw.grace {
        0
    } else if raw.chord {
        state.previous_note_duration
    } else {
        match raw.duration {
            Some(d) => d,
            None => duration.nominal_ticks(state.divisions).unwrap_or(0),
        }
    };
    duration.seconds = state.ticks_to_seconds(duration.duration);
    duration.midi_ticks = midi_ticks(duration.duration, state.divisions);

    if raw.chord {
        duration.xml_position = state.previous_note_xml_position;
        duration.time_position = state.previous_note_time_position;
    } else {
        duration.xml_position = state.xml_position;
        duration.time_position = state.time_position;
        state.advance(duration.duration);
    }
    state.previous_note_xml_position = duration.xml_position;
    state.previous_note_time_position = duration.time_position;
    state.previous_note_duration = duration.duration;

    let note = Note {
        id: state.next_note_id,
        pitch,
        voice: raw.voice.unwrap_or(1),
        staff: raw.staff.unwrap_or(1),
        chord_index: state.chord_index,
        is_in_chord: raw.chord,
        is_print_object: node.attribute("print-object") != Some("no"),
        is_overlapped: false,
        measure_index,
        accidental: raw.accidental,
        grace_principal: None,
        duration,
        notations: raw.notations,
        followed_by_fermata_rest: false,
    };
    state.next_note_id += 1;
    Ok(note)
}

fn make_pitch(step: &str, alter: f64, octave: i32, loc: &Location, state: &ParserState) -> Result<Pitch> {
    let class = pitch_class(step).ok_or_else(|| ScoreError::UnknownPitchStep {
        step: step.to_string(),
        part: loc.part.to_string(),
        measure: loc.measure,
        tick: state.xml_position,
    })?;
    let semitones = alter as i32;
    let mut name = step.to_string();
    name.push_str(match semitones {
        -2 => "bb",
        -1 => "b",
        1 => "#",
        2 => "x",
        _ => "",
    });
    name.push_str(&octave.to_string());
    Ok(Pitch {
        name,
        midi: 12 + class + semitones + 12 * octave + state.transpose,
    })
}

fn parse_notations(node: &Node, notations: &mut Notations) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "articulations" => {
                for a in child.children().filter(|n| n.is_element()) {
                    match a.tag_name().name() {
                        "accent" => notations.is_accent = true,
                        "strong-accent" => notations.is_strong_accent = true,
                        "staccato" | "staccatissimo" => notations.is_staccato = true,
                        "tenuto" => notations.is_tenuto = true,
                        _ => {}
                    }
                }
            }
            "arpeggiate" => notations.is_arpeggiate = true,
            "fermata" => notations.is_fermata = true,
            "tied" => match child.attribute("type") {
                Some("start") => notations.tied_start = true,
                Some("stop") => notations.tied_stop = true,
                _ => {}
            },
            "ornaments" => {
                for o in child.children().filter(|n| n.is_element()) {
                    match o.tag_name().name() {
                        "trill-mark" => notations.is_trill = true,
                        "mordent" | "inverted-mordent" => notations.is_mordent = true,
                        "wavy-line" => {
                            if let Some(mark) = o.attribute("type").and_then(SpanMark::parse) {
                                notations.wavy_line = Some(WavyLine {
                                    mark,
                                    number: number_attr(&o),
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            "slur" => {
                if let Some(mark) = child.attribute("type").and_then(SpanMark::parse) {
                    notations.slurs.push(Slur {
                        mark,
                        number: number_attr(&child),
                        xml_position: 0,
                        end_xml_position: 0,
                        voice: 0,
                        index: 0,
                    });
                }
            }
            _ => {}
        }
    }
}

// ─── Direction ───────────────────────────────────────────────────────

fn parse_direction(node: &Node, state: &mut ParserState, measure: &mut Measure) {
    let placement = node.attribute("placement").map(String::from);
    let mut staff = None;
    let mut kinds: Vec<DirectionKind> = Vec::new();
    let mut sound_qpm = None;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt in child.children().filter(|n| n.is_element()) {
                    if let Some(kind) = parse_direction_type(&dt) {
                        // Consecutive <words> read as one phrase.
                        if let (DirectionKind::Words(new), Some(DirectionKind::Words(prev))) =
                            (&kind, kinds.last_mut())
                        {
                            prev.push(' ');
                            prev.push_str(new);
                            continue;
                        }
                        kinds.push(kind);
                    }
                }
            }
            "staff" => staff = parse_i32(&child),
            "sound" => sound_qpm = sound_tempo(&child),
            _ => {}
        }
    }

    let metronome_qpm = kinds.iter().find_map(|k| match k {
        DirectionKind::Metronome(m) if m.per_minute > 0.0 => Some(m.qpm()),
        _ => None,
    });
    if let Some(qpm) = sound_qpm {
        kinds.push(DirectionKind::Tempo(qpm));
    }

    for kind in kinds {
        measure.directions.push(Direction {
            xml_position: state.xml_position,
            time_position: state.time_position,
            staff,
            placement: placement.clone(),
            kind,
        });
    }

    // A metronome mark without playback tempo still sets the pace.
    if let Some(qpm) = sound_qpm.or(metronome_qpm) {
        apply_tempo(qpm, state, measure);
    }
}

fn parse_direction_type(node: &Node) -> Option<DirectionKind> {
    match node.tag_name().name() {
        "dynamics" => {
            let first = node.children().find(|n| n.is_element())?;
            if first.tag_name().name() == "other-dynamics" {
                first.text().map(|t| DirectionKind::Words(expand_dynamic_symbols(t)))
            } else {
                Some(DirectionKind::Dynamic(first.tag_name().name().to_string()))
            }
        }
        "pedal" => {
            let mark = match node.attribute("type")? {
                "start" => PedalMark::Start,
                "stop" => PedalMark::Stop,
                "change" => PedalMark::Change,
                "continue" => PedalMark::Continue,
                _ => return None,
            };
            Some(DirectionKind::Pedal(mark))
        }
        "wedge" => {
            let number = node.attribute("number").and_then(|n| n.parse().ok());
            let (kind, status) = match node.attribute("type") {
                Some("crescendo") => (Some(WedgeKind::Crescendo), Some(SpanMark::Start)),
                Some("diminuendo") => (Some(WedgeKind::Diminuendo), Some(SpanMark::Start)),
                Some(other) => (None, SpanMark::parse(other)),
                None => (None, None),
            };
            Some(DirectionKind::Wedge(Wedge { kind, status, number }))
        }
        "words" => node
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| DirectionKind::Words(t.to_string())),
        "octave-shift" => {
            let shift = match node.attribute("type")? {
                "up" => OctaveShift::Up,
                "down" => OctaveShift::Down,
                "stop" => OctaveShift::Stop,
                "continue" => OctaveShift::Continue,
                _ => return None,
            };
            let size = node.attribute("size").and_then(|s| s.parse().ok()).unwrap_or(8);
            Some(DirectionKind::OctaveShift { shift, size })
        }
        "metronome" => Some(DirectionKind::Metronome(parse_metronome(node))),
        _ => None,
    }
}

/// SMuFL glyph names some exporters leave inside `<other-dynamics>`.
fn expand_dynamic_symbols(text: &str) -> String {
    [
        ("<sym>dynamicPiano</sym>", "p"),
        ("<sym>dynamicForte</sym>", "f"),
        ("<sym>dynamicMezzo</sym>", "m"),
        ("<sym>dynamicSforzando</sym>", "sf"),
        ("<sym>dynamicRinforzando</sym>", "r"),
        ("<sym>dynamicNiente</sym>", "n"),
        ("<sym>dynamicZ</sym>", "z"),
    ]
    .iter()
    .fold(text.to_string(), |acc, (sym, letter)| acc.replace(sym, letter))
}

fn parse_metronome(node: &Node) -> Metronome {
    let mut metronome = Metronome {
        beat_unit: "quarter".to_string(),
        dotted: false,
        per_minute: 0.0,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                metronome.beat_unit = child.text().unwrap_or("quarter").trim().to_string();
            }
            "beat-unit-dot" => metronome.dotted = true,
            "per-minute" => metronome.per_minute = parse_f64(&child).unwrap_or(0.0),
            _ => {}
        }
    }
    metronome
}

/// `<sound tempo>`; a zero tempo means the default.
fn sound_tempo(node: &Node) -> Option<f64> {
    let qpm = node.attribute("tempo")?.trim().parse::<f64>().ok()?;
    if qpm > 0.0 {
        Some(qpm)
    } else {
        Some(DEFAULT_QPM)
    }
}

fn apply_tempo(qpm: f64, state: &mut ParserState, measure: &mut Measure) {
    state.set_qpm(qpm);
    measure.tempos.push(state.tempo_event(qpm));
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn midi_ticks(ticks: i64, divisions: i32) -> f64 {
    ticks as f64 * TICKS_PER_QUARTER as f64 / divisions as f64
}

fn duration_child(node: &Node) -> Result<Option<i64>> {
    match node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "duration")
    {
        Some(d) => duration_value(&d),
        None => Ok(None),
    }
}

fn duration_value(node: &Node) -> Result<Option<i64>> {
    let text = node.text().unwrap_or("").trim();
    // Some exporters write fractional durations
    text.parse::<f64>()
        .map(|d| Some(d.round() as i64))
        .map_err(|_| ScoreError::MalformedInput(format!("invalid <duration> '{text}'")))
}

fn number_attr(node: &Node) -> i32 {
    node.attribute("number").and_then(|n| n.parse().ok()).unwrap_or(1)
}

fn text_of(node: &Node) -> Option<String> {
    node.text().map(|t| t.trim().to_string())
}

fn parse_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(measures: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">{measures}</part>
</score-partwise>"#
        )
    }

    #[test]
    fn rejects_other_roots() {
        let err = parse_musicxml("<score-timewise/>").unwrap_err();
        assert!(matches!(err, ScoreError::MalformedInput(_)));
        let err = parse_musicxml("<score-partwise").unwrap_err();
        assert!(matches!(err, ScoreError::MalformedInput(_)));
    }

    #[test]
    fn pitch_includes_alteration_and_transposition() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>1</divisions><transpose><chromatic>-2</chromatic></transpose></attributes>
              <note><pitch><step>C</step><alter>1</alter><octave>4</octave></pitch><duration>1</duration></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let note = &doc.parts[0].measures[0].notes[0];
        let pitch = note.pitch.as_ref().unwrap();
        assert_eq!(pitch.name, "C#4");
        assert_eq!(pitch.midi, 59);
    }

    #[test]
    fn unpitched_and_bad_steps_are_errors() {
        let xml = wrap(
            r#"<measure number="3"><note><unpitched/><duration>1</duration></note></measure>"#,
        );
        match parse_musicxml(&xml) {
            Err(ScoreError::UnsupportedNote { part, measure, tick }) => {
                assert_eq!(part, "P1");
                assert_eq!(measure, 3);
                assert_eq!(tick, 0);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let xml = wrap(
            r#"<measure number="1"><note><pitch><step>Q</step><octave>4</octave></pitch><duration>1</duration></note></measure>"#,
        );
        assert!(matches!(
            parse_musicxml(&xml),
            Err(ScoreError::UnknownPitchStep { ref step, .. }) if step == "Q"
        ));
    }

    #[test]
    fn chords_share_onset_and_backup_rewinds() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>2</divisions></attributes>
              <note><pitch><step>C</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice></note>
              <note><chord/><pitch><step>E</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice></note>
              <backup><duration>4</duration></backup>
              <note><pitch><step>C</step><octave>3</octave></pitch><duration>2</duration><voice>2</voice></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let notes = &doc.parts[0].measures[0].notes;
        assert_eq!(notes[1].duration.xml_position, 0);
        assert_eq!(notes[1].chord_index, 1);
        assert_eq!(notes[2].duration.xml_position, 0);
        assert_eq!(doc.total_ticks, 4);
    }

    #[test]
    fn grace_notes_take_no_time() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>1</divisions></attributes>
              <note><grace slash="yes"/><pitch><step>D</step><octave>4</octave></pitch><type>eighth</type></note>
              <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let notes = &doc.parts[0].measures[0].notes;
        assert!(notes[0].is_grace());
        assert!(notes[0].notations.is_slash);
        assert_eq!(notes[0].duration.duration, 0);
        assert_eq!(notes[1].duration.xml_position, 0);
    }

    #[test]
    fn missing_duration_uses_type_and_tuplet() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>6</divisions></attributes>
              <note><pitch><step>C</step><octave>4</octave></pitch><type>eighth</type>
                <time-modification><actual-notes>3</actual-notes><normal-notes>2</normal-notes></time-modification></note>
              <note><pitch><step>D</step><octave>4</octave></pitch><type>quarter</type><dot/></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let notes = &doc.parts[0].measures[0].notes;
        assert_eq!(notes[0].duration.duration, 2);
        assert_eq!(notes[1].duration.xml_position, 2);
        assert_eq!(notes[1].duration.duration, 9);
    }

    #[test]
    fn lone_forward_becomes_measure_rest() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>1</divisions></attributes>
              <forward><duration>4</duration></forward>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let notes = &doc.parts[0].measures[0].notes;
        assert_eq!(notes.len(), 1);
        assert!(notes[0].is_rest());
        assert_eq!(notes[0].duration.duration, 4);
        assert_eq!(doc.total_ticks, 4);
    }

    #[test]
    fn directions_are_typed() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>1</divisions></attributes>
              <direction placement="below">
                <direction-type><dynamics><mf/></dynamics></direction-type><staff>2</staff>
              </direction>
              <direction><direction-type><wedge type="crescendo" number="1"/></direction-type></direction>
              <direction><direction-type><words>poco </words><words>rit.</words></direction-type></direction>
              <direction><direction-type><pedal type="start"/></direction-type></direction>
              <direction>
                <direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>90</per-minute></metronome></direction-type>
                <sound tempo="90"/>
              </direction>
              <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let measure = &doc.parts[0].measures[0];
        let kinds: Vec<&DirectionKind> = measure.directions.iter().map(|d| &d.kind).collect();
        assert_eq!(kinds[0], &DirectionKind::Dynamic("mf".to_string()));
        assert_eq!(measure.directions[0].staff, Some(2));
        assert!(matches!(
            kinds[1],
            DirectionKind::Wedge(Wedge { kind: Some(WedgeKind::Crescendo), status: Some(SpanMark::Start), number: Some(1) })
        ));
        assert_eq!(kinds[2], &DirectionKind::Words("poco rit.".to_string()));
        assert_eq!(kinds[3], &DirectionKind::Pedal(PedalMark::Start));
        assert!(matches!(kinds[4], DirectionKind::Metronome(_)));
        assert_eq!(kinds[5], &DirectionKind::Tempo(90.0));
        assert_eq!(measure.tempos.len(), 1);
        assert_eq!(measure.tempos[0].qpm, 90.0);
    }

    #[test]
    fn repeats_expand_into_play_order() {
        let xml = wrap(
            r#"<measure number="1">
              <attributes><divisions>1</divisions></attributes>
              <note><pitch><step>C</step><octave>4</octave></pitch><duration>4</duration></note>
              <barline location="right"><repeat direction="backward"/></barline>
            </measure>
            <measure number="2">
              <note><pitch><step>D</step><octave>4</octave></pitch><duration>4</duration></note>
            </measure>"#,
        );
        let doc = parse_musicxml(&xml).unwrap();
        let numbers: Vec<i32> = doc.parts[0].measures.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![1, 1, 2]);
        let starts = doc.measure_positions();
        assert_eq!(starts, vec![0, 4, 8]);

        let flat = parse_musicxml_with(&xml, &ParseOptions { expand_repeats: false }).unwrap();
        assert_eq!(flat.measure_count(), 2);
    }
}
