//! Data model for the temporal view of a parsed MusicXML score.
//!
//! Every note and direction carries an exact tick position (`xml_position`,
//! in divisions of a quarter note) and a real-time position in seconds that
//! the global time pass in [`crate::timemap`] fixes after parsing.

use serde::{Deserialize, Serialize};

/// A complete score: parts in document order plus every tempo event found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    /// MusicXML version (e.g., "3.1", "4.0")
    pub version: Option<String>,
    /// Musical parts (instruments)
    pub parts: Vec<Part>,
    /// Tempo events across all parts, sorted by tick position, with their
    /// real-time anchors filled in by the global time pass
    pub tempos: Vec<TempoEvent>,
    /// Furthest tick position reached by any part
    pub total_ticks: i64,
    /// Real time at `total_ticks`
    pub total_seconds: f64,
}

/// A musical part (one instrument).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name from the part-list
    pub name: String,
    /// MIDI program number
    pub midi_program: Option<i32>,
    /// MIDI channel
    pub midi_channel: Option<i32>,
    /// Measures in play order
    pub measures: Vec<Measure>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number attribute
    pub number: i32,
    /// Index of the `<measure>` element in the written part (differs from
    /// the position in `Part::measures` once repeats are expanded)
    pub source_index: usize,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Tick position where the measure starts
    pub start_xml_position: i64,
    /// Divisions per quarter note in effect for this measure
    pub divisions: i32,
    /// Time signature, only present where one is written
    pub time_signature: Option<TimeSignature>,
    /// Notes and rests in document order
    pub notes: Vec<Note>,
    /// Directions in document order
    pub directions: Vec<Direction>,
    /// Tempo events in document order
    pub tempos: Vec<TempoEvent>,
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub numerator: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub denominator: i32,
    /// Tick position where it takes effect
    pub xml_position: i64,
    /// Divisions in effect where it takes effect
    pub divisions: i32,
}

impl TimeSignature {
    /// Nominal measure length in ticks.
    pub fn measure_ticks(&self) -> f64 {
        self.divisions as f64 * self.numerator as f64 / self.denominator as f64 * 4.0
    }

    /// Felt beats per measure. Compound meters count dotted beats.
    pub fn beats_per_measure(&self) -> i32 {
        match self.numerator {
            6 => 2,
            9 => 3,
            12 => 4,
            18 => 3,
            24 => 4,
            n => n,
        }
    }
}

/// A tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEvent {
    /// Tick position of the change
    pub xml_position: i64,
    /// Quarter notes per minute
    pub qpm: f64,
    /// Divisions in effect at the change
    pub divisions: i32,
    /// Real time of the change in seconds
    pub time_position: f64,
}

impl TempoEvent {
    /// Seconds per tick under this tempo.
    pub fn seconds_per_tick(&self) -> f64 {
        60.0 / self.qpm / self.divisions.max(1) as f64
    }
}

/// A single note or rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Document-order index across the whole score, stable through
    /// canonicalization
    pub id: usize,
    /// Pitch; `None` means this is a rest
    pub pitch: Option<Pitch>,
    /// Voice number (offset by 10 per part after canonicalization)
    pub voice: i32,
    /// Staff number (1-based)
    pub staff: i32,
    /// Position within a simultaneous onset (0 for the first chord note)
    pub chord_index: u32,
    /// Whether this note carries `<chord/>`
    pub is_in_chord: bool,
    /// `print-object="no"` clears this
    pub is_print_object: bool,
    /// Shorter duplicate of another note at the same onset
    pub is_overlapped: bool,
    /// Index into `Part::measures`
    pub measure_index: usize,
    /// Written accidental, if any
    pub accidental: Option<String>,
    /// For grace notes: id of the note they lead into
    pub grace_principal: Option<usize>,
    /// Timing
    pub duration: NoteDuration,
    /// Articulations, ornaments, ties and slurs
    pub notations: Notations,
    /// The rest following this note is itself followed by a fermata
    pub followed_by_fermata_rest: bool,
}

/// A printed voice-1 rest at tick 0.
impl Default for Note {
    fn default() -> Self {
        Self {
            id: 0,
            pitch: None,
            voice: 1,
            staff: 1,
            chord_index: 0,
            is_in_chord: false,
            is_print_object: true,
            is_overlapped: false,
            measure_index: 0,
            accidental: None,
            grace_principal: None,
            duration: NoteDuration::default(),
            notations: Notations::default(),
            followed_by_fermata_rest: false,
        }
    }
}

impl Note {
    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }

    pub fn is_grace(&self) -> bool {
        self.duration.is_grace_note
    }

    /// MIDI pitch, `None` for rests.
    pub fn midi_pitch(&self) -> Option<i32> {
        self.pitch.as_ref().map(|p| p.midi)
    }

    /// Tick position where the note ends.
    pub fn end_xml_position(&self) -> i64 {
        self.duration.xml_position + self.duration.duration
    }
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch {
    /// Written name without transposition, e.g. "C#4"
    pub name: String,
    /// MIDI note number including transposition (middle C = 60)
    pub midi: i32,
}

/// Diatonic step letter to semitone offset within the octave.
pub fn pitch_class(step: &str) -> Option<i32> {
    match step {
        "C" => Some(0),
        "D" => Some(2),
        "E" => Some(4),
        "F" => Some(5),
        "G" => Some(7),
        "A" => Some(9),
        "B" => Some(11),
        _ => None,
    }
}

/// Tuplet ratio from `<time-modification>`: `actual` notes in the time of
/// `normal` notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupletRatio {
    pub actual: i32,
    pub normal: i32,
}

impl Default for TupletRatio {
    fn default() -> Self {
        Self { actual: 1, normal: 1 }
    }
}

/// Timing of one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDuration {
    /// Duration in ticks (0 for grace notes)
    pub duration: i64,
    /// Onset in ticks
    pub xml_position: i64,
    /// Onset in seconds
    pub time_position: f64,
    /// Duration in seconds
    pub seconds: f64,
    /// Duration in MIDI ticks at [`crate::midi::TICKS_PER_QUARTER`]
    pub midi_ticks: f64,
    /// Augmentation dots
    pub dots: u32,
    /// Note type: "whole", "half", "quarter", "eighth", "16th", ...
    pub note_type: Option<String>,
    pub tuplet_ratio: TupletRatio,
    pub is_grace_note: bool,
    /// Negative order of a grace note, -1 nearest the principal note
    pub grace_order: i32,
    /// Number of grace notes in this note's group
    pub num_grace: i32,
    /// Earliest grace note of its group
    pub is_first_grace_note: bool,
    /// Principal note of a grace group (or a chord member of one)
    pub preceded_by_grace_note: bool,
    /// Length in ticks of the rest run that follows the note
    pub following_rest_duration: i64,
}

impl Default for NoteDuration {
    fn default() -> Self {
        Self {
            duration: 0,
            xml_position: 0,
            time_position: 0.0,
            seconds: 0.0,
            midi_ticks: 0.0,
            dots: 0,
            note_type: None,
            tuplet_ratio: TupletRatio::default(),
            is_grace_note: false,
            grace_order: 0,
            num_grace: 0,
            is_first_grace_note: false,
            preceded_by_grace_note: false,
            following_rest_duration: 0,
        }
    }
}

impl NoteDuration {
    /// Duration in ticks implied by the note type, dots and tuplet ratio.
    /// Used when a non-grace note has no `<duration>` element.
    pub fn nominal_ticks(&self, divisions: i32) -> Option<i64> {
        let whole_fraction = match self.note_type.as_deref()? {
            "maxima" => 8.0,
            "long" => 4.0,
            "breve" => 2.0,
            "whole" => 1.0,
            "half" => 0.5,
            "quarter" => 0.25,
            "eighth" => 0.125,
            "16th" => 1.0 / 16.0,
            "32nd" => 1.0 / 32.0,
            "64th" => 1.0 / 64.0,
            "128th" => 1.0 / 128.0,
            "256th" => 1.0 / 256.0,
            "512th" => 1.0 / 512.0,
            "1024th" => 1.0 / 1024.0,
            _ => return None,
        };
        let tuplet = self.tuplet_ratio.normal as f64 / self.tuplet_ratio.actual.max(1) as f64;
        let base = whole_fraction * tuplet;
        let dotted: f64 = (1..=self.dots).map(|d| base * 0.5f64.powi(d as i32)).sum();
        Some(((base + dotted) * 4.0 * divisions as f64).round() as i64)
    }
}

/// Start/stop/continue marker shared by ties, slurs and wavy lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanMark {
    Start,
    Stop,
    Continue,
}

impl SpanMark {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(SpanMark::Start),
            "stop" => Some(SpanMark::Stop),
            "continue" => Some(SpanMark::Continue),
            _ => None,
        }
    }
}

/// A trill extension line attached to a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavyLine {
    pub mark: SpanMark,
    pub number: i32,
}

/// A slur mark on a note; span fields are filled when the canonicalizer
/// pairs starts with stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slur {
    pub mark: SpanMark,
    pub number: i32,
    pub xml_position: i64,
    pub end_xml_position: i64,
    pub voice: i32,
    pub index: usize,
}

/// Notation flags of a note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notations {
    pub is_accent: bool,
    pub is_strong_accent: bool,
    pub is_arpeggiate: bool,
    pub is_fermata: bool,
    pub is_mordent: bool,
    pub is_staccato: bool,
    pub is_tenuto: bool,
    pub is_trill: bool,
    pub is_cue: bool,
    /// Slashed (acciaccatura) grace note
    pub is_slash: bool,
    pub tied_start: bool,
    pub tied_stop: bool,
    pub wavy_line: Option<WavyLine>,
    pub slurs: Vec<Slur>,
    pub is_slur_start: bool,
    pub is_slur_continue: bool,
    pub is_slur_stop: bool,
    pub is_beam_start: bool,
    pub is_beam_continue: bool,
    pub is_beam_stop: bool,
}

/// A direction (expression marking) with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Tick position
    pub xml_position: i64,
    /// Real time in seconds
    pub time_position: f64,
    /// Owning staff, if the direction names one
    pub staff: Option<i32>,
    /// "above" or "below"
    pub placement: Option<String>,
    pub kind: DirectionKind,
}

/// What a direction says, one variant per direction kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirectionKind {
    /// Dynamic mark such as "p", "mf", "sfz"
    Dynamic(String),
    /// Playback tempo from `<sound tempo>`, in qpm
    Tempo(f64),
    Pedal(PedalMark),
    Wedge(Wedge),
    /// Free text ("cresc.", "rit.", "Allegro")
    Words(String),
    OctaveShift { shift: OctaveShift, size: i32 },
    Metronome(Metronome),
}

/// Pedal marking type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PedalMark {
    Start,
    Stop,
    Change,
    Continue,
}

/// Hairpin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WedgeKind {
    Crescendo,
    Diminuendo,
}

/// Hairpin marking. `kind` is unknown on written stop/continue marks and
/// `status` is unknown when the markup omits it; the direction resolver
/// infers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wedge {
    pub kind: Option<WedgeKind>,
    pub status: Option<SpanMark>,
    pub number: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OctaveShift {
    Up,
    Down,
    Stop,
    Continue,
}

/// Metronome mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metronome {
    /// Beat unit: "quarter", "half", "eighth", etc.
    pub beat_unit: String,
    pub dotted: bool,
    /// Beats per minute
    pub per_minute: f64,
}

impl Metronome {
    /// Equivalent tempo in quarter notes per minute.
    pub fn qpm(&self) -> f64 {
        let unit = match self.beat_unit.as_str() {
            "whole" => 4.0,
            "half" => 2.0,
            "eighth" => 0.5,
            "16th" => 0.25,
            _ => 1.0,
        };
        let unit = if self.dotted { unit * 1.5 } else { unit };
        self.per_minute * unit
    }
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            title: None,
            composer: None,
            version: None,
            parts: Vec::new(),
            tempos: Vec::new(),
            total_ticks: 0,
            total_seconds: 0.0,
        }
    }

    /// Number of measures in the first part.
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// Measure start positions of the first part.
    pub fn measure_positions(&self) -> Vec<i64> {
        self.parts
            .first()
            .map(|p| p.measures.iter().map(|m| m.start_xml_position).collect())
            .unwrap_or_default()
    }

    /// Divisions in effect at a tick position, read from the first part.
    pub fn divisions_at(&self, xml_position: f64) -> i32 {
        let Some(part) = self.parts.first() else {
            return 1;
        };
        let starts: Vec<f64> = part
            .measures
            .iter()
            .map(|m| m.start_xml_position as f64)
            .collect();
        if starts.is_empty() {
            return 1;
        }
        let idx = crate::search::at_or_before(&starts, &xml_position);
        part.measures[idx].divisions.max(1)
    }

    /// All notes of all parts in document order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.parts
            .iter()
            .flat_map(|p| p.measures.iter())
            .flat_map(|m| m.notes.iter())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
