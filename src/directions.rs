//! Direction resolver: turns the raw direction marks of a document into
//! closed spans and keyword-classified dynamic and tempo markings that can
//! be queried per note.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Vocabulary;
use crate::model::{Direction, DirectionKind, Document, PedalMark, SpanMark, Wedge, WedgeKind};

/// What a [`DirectionSpan`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Crescendo,
    Diminuendo,
    Pedal,
}

/// A start→stop direction closed into a tick interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionSpan {
    pub kind: SpanKind,
    pub staff: Option<i32>,
    pub number: Option<i32>,
    pub xml_position: i64,
    /// Tick of the matching stop, or the end of the piece if none
    pub end_xml_position: i64,
    pub time_position: f64,
}

impl DirectionSpan {
    pub fn contains(&self, xml_position: i64) -> bool {
        self.xml_position <= xml_position && xml_position <= self.end_xml_position
    }
}

/// A dynamic or tempo keyword found at a point in the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marking {
    /// Matched keyword, lowercase
    pub word: String,
    pub xml_position: i64,
    pub staff: Option<i32>,
}

/// A relative marking (crescendo, accelerando, sforzando, ...) resolved to
/// the interval it acts over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeMarking {
    pub word: String,
    pub xml_position: i64,
    pub end_xml_position: i64,
    pub staff: Option<i32>,
    /// Absolute marking in force where this one starts
    pub previous: Option<String>,
    /// Next absolute marking after it
    pub next: Option<String>,
}

/// Directions of a whole document, resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedDirections {
    /// Every direction sorted by tick, wedge kind and status filled in
    pub directions: Vec<Direction>,
    /// Hairpin and pedal spans
    pub spans: Vec<DirectionSpan>,
    pub absolute_dynamics: Vec<Marking>,
    pub relative_dynamics: Vec<RelativeMarking>,
    pub absolute_tempos: Vec<Marking>,
    pub relative_tempos: Vec<RelativeMarking>,
}

/// Markings in force at one note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteMarkings {
    pub dynamic: Option<String>,
    pub tempo: Option<String>,
    pub relative_dynamics: Vec<RelativeMarking>,
    pub relative_tempos: Vec<RelativeMarking>,
    pub pedal: bool,
}

/// Resolve with the default keyword tables.
pub fn resolve(doc: &Document) -> ResolvedDirections {
    resolve_with(doc, &Vocabulary::default())
}

/// Resolve every direction of `doc` against `vocabulary`.
pub fn resolve_with(doc: &Document, vocabulary: &Vocabulary) -> ResolvedDirections {
    let mut directions: Vec<Direction> = doc
        .parts
        .iter()
        .flat_map(|p| p.measures.iter())
        .flat_map(|m| m.directions.iter().cloned())
        .collect();
    directions.sort_by_key(|d| d.xml_position);

    infer_wedges(&mut directions);
    let spans = close_spans(&directions, doc.total_ticks);

    let mut absolute_dynamics = Vec::new();
    let mut relative_dynamics = Vec::new();
    let mut absolute_tempos = Vec::new();
    let mut relative_tempos = Vec::new();

    for direction in &directions {
        let at = |word: &str| Marking {
            word: word.to_string(),
            xml_position: direction.xml_position,
            staff: direction.staff,
        };
        match &direction.kind {
            DirectionKind::Dynamic(word) => {
                let word = word.to_lowercase();
                if contains(&vocabulary.accent_dynamics, &word) {
                    relative_dynamics.push(point(at(&word)));
                } else if contains(&vocabulary.absolute_dynamics, &word) {
                    absolute_dynamics.push(at(&word));
                } else if contains(&vocabulary.relative_dynamics, &word) {
                    relative_dynamics.push(open(at(&word)));
                }
            }
            DirectionKind::Words(text) => {
                let tokens = tokenize(text);
                for word in matches(&vocabulary.absolute_dynamics, &tokens) {
                    absolute_dynamics.push(at(word));
                }
                for word in matches(&vocabulary.accent_dynamics, &tokens) {
                    relative_dynamics.push(point(at(word)));
                }
                for word in matches(&vocabulary.relative_dynamics, &tokens) {
                    relative_dynamics.push(open(at(word)));
                }
                for word in matches(&vocabulary.absolute_tempos, &tokens) {
                    absolute_tempos.push(at(word));
                }
                for word in matches(&vocabulary.relative_tempos, &tokens) {
                    relative_tempos.push(open(at(word)));
                }
            }
            _ => {}
        }
    }

    for span in spans.iter().filter(|s| s.kind != SpanKind::Pedal) {
        relative_dynamics.push(RelativeMarking {
            word: match span.kind {
                SpanKind::Crescendo => "crescendo".to_string(),
                _ => "diminuendo".to_string(),
            },
            xml_position: span.xml_position,
            end_xml_position: span.end_xml_position,
            staff: span.staff,
            previous: None,
            next: None,
        });
    }

    relative_dynamics.sort_by_key(|r| r.xml_position);
    relative_tempos.sort_by_key(|r| r.xml_position);
    bound_relatives(&mut relative_dynamics, &absolute_dynamics, doc.total_ticks);
    bound_relatives(&mut relative_tempos, &absolute_tempos, doc.total_ticks);

    log::debug!(
        "directions: {} total, {} span(s), {} absolute / {} relative dynamics, {} absolute / {} relative tempos",
        directions.len(),
        spans.len(),
        absolute_dynamics.len(),
        relative_dynamics.len(),
        absolute_tempos.len(),
        relative_tempos.len()
    );

    ResolvedDirections {
        directions,
        spans,
        absolute_dynamics,
        relative_dynamics,
        absolute_tempos,
        relative_tempos,
    }
}

impl ResolvedDirections {
    /// Markings that apply at `xml_position`. Absolute markings apply to
    /// every staff; relative markings and pedal spans are filtered by
    /// `staff` when both sides name one.
    pub fn markings_at(&self, xml_position: i64, staff: Option<i32>) -> NoteMarkings {
        let on_staff = |s: Option<i32>| match (s, staff) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        NoteMarkings {
            dynamic: last_at_or_before(&self.absolute_dynamics, xml_position),
            tempo: last_at_or_before(&self.absolute_tempos, xml_position),
            relative_dynamics: self
                .relative_dynamics
                .iter()
                .filter(|r| r.xml_position <= xml_position && xml_position <= r.end_xml_position)
                .filter(|r| on_staff(r.staff))
                .cloned()
                .collect(),
            relative_tempos: self
                .relative_tempos
                .iter()
                .filter(|r| r.xml_position <= xml_position && xml_position <= r.end_xml_position)
                .cloned()
                .collect(),
            pedal: self
                .spans
                .iter()
                .any(|s| s.kind == SpanKind::Pedal && s.contains(xml_position) && on_staff(s.staff)),
        }
    }
}

fn last_at_or_before(markings: &[Marking], xml_position: i64) -> Option<String> {
    let idx = markings.partition_point(|m| m.xml_position <= xml_position);
    idx.checked_sub(1).map(|i| markings[i].word.clone())
}

fn point(marking: Marking) -> RelativeMarking {
    RelativeMarking {
        end_xml_position: marking.xml_position,
        ..open(marking)
    }
}

/// End position is settled later by [`bound_relatives`].
fn open(marking: Marking) -> RelativeMarking {
    RelativeMarking {
        word: marking.word,
        xml_position: marking.xml_position,
        end_xml_position: i64::MIN,
        staff: marking.staff,
        previous: None,
        next: None,
    }
}

/// Attach the surrounding absolute markings to each relative marking and
/// end the open ones at the next absolute marking (or the end of the piece).
fn bound_relatives(relatives: &mut [RelativeMarking], absolutes: &[Marking], total_ticks: i64) {
    for rel in relatives.iter_mut() {
        let idx = absolutes.partition_point(|a| a.xml_position <= rel.xml_position);
        rel.previous = idx.checked_sub(1).map(|i| absolutes[i].word.clone());
        let next = absolutes[idx..].iter().find(|a| a.xml_position > rel.xml_position);
        rel.next = next.map(|a| a.word.clone());
        if rel.end_xml_position == i64::MIN {
            rel.end_xml_position = next.map_or(total_ticks, |a| a.xml_position);
        }
    }
}

// ─── Wedges and spans ────────────────────────────────────────────────

/// Fill in what written wedge marks leave out: the hairpin kind of a
/// stop/continue, and the status of a wedge without one.
fn infer_wedges(directions: &mut [Direction]) {
    let mut last_by_key: HashMap<(Option<i32>, Option<i32>), Wedge> = HashMap::new();
    let mut last_on_staff: HashMap<Option<i32>, Wedge> = HashMap::new();

    for direction in directions.iter_mut() {
        let DirectionKind::Wedge(wedge) = &mut direction.kind else {
            continue;
        };
        let key = (direction.staff, wedge.number);
        let previous = last_by_key
            .get(&key)
            .or_else(|| last_on_staff.get(&direction.staff))
            .copied();

        if wedge.kind.is_none() {
            wedge.kind = previous.and_then(|p| p.kind);
        }
        if wedge.status.is_none() {
            wedge.status = match previous {
                Some(p) if p.kind == wedge.kind && p.status != Some(SpanMark::Stop) => Some(SpanMark::Continue),
                _ => Some(SpanMark::Start),
            };
        }
        last_by_key.insert(key, *wedge);
        last_on_staff.insert(direction.staff, *wedge);
    }
}

/// Pair hairpin and pedal starts with their stops.
fn close_spans(directions: &[Direction], total_ticks: i64) -> Vec<DirectionSpan> {
    let mut spans: Vec<DirectionSpan> = Vec::new();
    // Indices into `spans` still waiting for a stop.
    let mut open_spans: Vec<usize> = Vec::new();

    for d in directions {
        let start = |kind, number| DirectionSpan {
            kind,
            staff: d.staff,
            number,
            xml_position: d.xml_position,
            end_xml_position: total_ticks,
            time_position: d.time_position,
        };
        match &d.kind {
            DirectionKind::Wedge(wedge) => {
                let kind = match wedge.kind {
                    Some(WedgeKind::Crescendo) => SpanKind::Crescendo,
                    Some(WedgeKind::Diminuendo) => SpanKind::Diminuendo,
                    None => continue,
                };
                match wedge.status {
                    Some(SpanMark::Start) => {
                        open_spans.push(spans.len());
                        spans.push(start(kind, wedge.number));
                    }
                    Some(SpanMark::Stop) => close_open(&mut spans, &mut open_spans, kind, d, wedge.number),
                    _ => {}
                }
            }
            DirectionKind::Pedal(mark) => match mark {
                PedalMark::Start => {
                    open_spans.push(spans.len());
                    spans.push(start(SpanKind::Pedal, None));
                }
                PedalMark::Stop => close_open(&mut spans, &mut open_spans, SpanKind::Pedal, d, None),
                PedalMark::Change => {
                    close_open(&mut spans, &mut open_spans, SpanKind::Pedal, d, None);
                    open_spans.push(spans.len());
                    spans.push(start(SpanKind::Pedal, None));
                }
                PedalMark::Continue => {}
            },
            _ => {}
        }
    }
    spans
}

/// Close the most recent open span of `kind` on the same staff whose number
/// agrees with `number`.
fn close_open(
    spans: &mut [DirectionSpan],
    open_spans: &mut Vec<usize>,
    kind: SpanKind,
    d: &Direction,
    number: Option<i32>,
) {
    let found = open_spans.iter().rposition(|&i| {
        spans[i].kind == kind
            && spans[i].staff == d.staff
            && (number.is_none() || spans[i].number.is_none() || spans[i].number == number)
    });
    if let Some(k) = found {
        let i = open_spans.remove(k);
        spans[i].end_xml_position = d.xml_position;
    }
}

// ─── Keyword matching ────────────────────────────────────────────────

/// Lowercase tokens with `,` and `.` treated as separators.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace([',', '.'], " ")
        .split_whitespace()
        .map(String::from)
        .collect()
}

fn contains(list: &[String], word: &str) -> bool {
    list.iter().any(|k| k == word)
}

/// Keywords of `list` occurring in `tokens` as whole, contiguous tokens.
fn matches<'a>(list: &'a [String], tokens: &[String]) -> Vec<&'a str> {
    list.iter()
        .filter(|keyword| {
            let words: Vec<&str> = keyword.split_whitespace().collect();
            !words.is_empty()
                && tokens
                    .windows(words.len())
                    .any(|w| w.iter().zip(&words).all(|(t, k)| t == k))
        })
        .map(String::as_str)
        .collect()
}
