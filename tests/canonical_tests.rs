//! Integration tests: canonical note sequences and resolved directions
//! from inline MusicXML.

use pretty_assertions::assert_eq;
use scorealign::{canonicalize, canonicalize_with, parse_musicxml, resolve, CanonicalizeOptions, Document};

fn parse(measures: &str) -> Document {
    let xml = format!(
        r#"<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>2</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>
      {measures}
    </measure>
  </part>
</score-partwise>"#
    );
    parse_musicxml(&xml).unwrap()
}

fn note(step: &str, duration: i64, voice: i32, extra: &str) -> String {
    format!(
        "<note><pitch><step>{step}</step><octave>4</octave></pitch>\
         <duration>{duration}</duration><voice>{voice}</voice>{extra}</note>"
    )
}

fn grace(step: &str, voice: i32) -> String {
    format!("<note><grace/><pitch><step>{step}</step><octave>5</octave></pitch><voice>{voice}</voice></note>")
}

#[test]
fn grace_notes_count_down_to_their_principal() {
    let doc = parse(&format!(
        "{}{}{}{}{}",
        grace("C", 1),
        grace("D", 1),
        grace("E", 1),
        note("F", 8, 1, ""),
        ""
    ));
    let notes = canonicalize(&doc, false, true);

    let orders: Vec<i32> = notes.iter().map(|n| n.duration.grace_order).collect();
    assert_eq!(orders, vec![-3, -2, -1, 0]);
    let first: Vec<bool> = notes.iter().map(|n| n.duration.is_first_grace_note).collect();
    assert_eq!(first, vec![true, false, false, false]);
    assert!(notes[3].duration.preceded_by_grace_note);
    assert_eq!(notes[0].duration.duration, 0);

    let without = canonicalize(&doc, false, false);
    assert_eq!(without.len(), 1);
    assert!(without[0].duration.preceded_by_grace_note);
}

#[test]
fn shorter_duplicate_is_flagged_overlapped() {
    let doc = parse(&format!(
        "{}<backup><duration>2</duration></backup>{}",
        note("C", 2, 1, ""),
        note("C", 4, 1, "")
    ));
    let notes = canonicalize(&doc, false, true);

    assert_eq!(notes.len(), 2);
    let flags: Vec<(i64, bool)> = notes.iter().map(|n| (n.duration.duration, n.is_overlapped)).collect();
    assert_eq!(flags, vec![(2, true), (4, false)]);
}

#[test]
fn tied_run_merges_into_one_note() {
    let doc = parse(&format!(
        "{}{}{}",
        note("G", 4, 1, r#"<tie type="start"/>"#),
        note("G", 4, 1, r#"<tie type="stop"/><tie type="start"/>"#),
        note("G", 2, 1, r#"<tie type="stop"/>"#)
    ));
    let notes = canonicalize(&doc, false, true);

    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].duration.duration, 10);
    assert_eq!(notes[0].duration.xml_position, 0);
    // 10 ticks at 120 qpm with 2 divisions
    assert_eq!(notes[0].duration.seconds, 2.5);
}

#[test]
fn unison_voices_tied_across_the_barline_stay_separate() {
    let held = |voice: i32, tie: &str| {
        format!(
            "<note><pitch><step>C</step><octave>4</octave></pitch><duration>4</duration>\
             <voice>{voice}</voice><tie type=\"{tie}\"/></note>"
        )
    };
    let xml = format!(
        r#"<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>
      {}<backup><duration>4</duration></backup>{}
    </measure>
    <measure number="2">{}<backup><duration>4</duration></backup>{}</measure>
  </part>
</score-partwise>"#,
        held(1, "start"),
        held(2, "start"),
        held(1, "stop"),
        held(2, "stop")
    );
    let doc = parse_musicxml(&xml).unwrap();
    let notes = canonicalize(&doc, false, true);

    let held: Vec<(i32, i64)> = notes.iter().map(|n| (n.voice, n.duration.duration)).collect();
    assert_eq!(held, vec![(1, 8), (2, 8)]);
}

#[test]
fn grace_note_before_a_chord_marks_every_member() {
    let doc = parse(&format!(
        "{}{}{}",
        grace("D", 1),
        note("C", 8, 1, ""),
        "<note><chord/><pitch><step>E</step><octave>4</octave></pitch><duration>8</duration><voice>1</voice></note>"
    ));
    let notes = canonicalize(&doc, false, true);

    let summary: Vec<(Option<i32>, i32, bool)> = notes
        .iter()
        .map(|n| (n.midi_pitch(), n.duration.grace_order, n.duration.preceded_by_grace_note))
        .collect();
    assert_eq!(
        summary,
        vec![(Some(74), -1, false), (Some(64), 0, true), (Some(60), 0, true)]
    );
}

#[test]
fn melody_keeps_voice_one_top_line() {
    let doc = parse(&format!(
        "{}{}{}<backup><duration>8</duration></backup>{}",
        note("C", 4, 1, ""),
        "<note><chord/><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice></note>",
        note("E", 4, 1, ""),
        note("A", 8, 2, "")
    ));

    let full = canonicalize(&doc, false, true);
    assert_eq!(full.len(), 4);

    let melody = canonicalize(&doc, true, true);
    let pitches: Vec<Option<i32>> = melody.iter().map(|n| n.midi_pitch()).collect();
    assert_eq!(pitches, vec![Some(67), Some(64)]);
}

#[test]
fn rests_feed_following_rest_duration() {
    let doc = parse(&format!(
        "{}<note><rest/><duration>2</duration><voice>1</voice></note>\
         <note><rest/><duration>2</duration><voice>1</voice><notations><fermata/></notations></note>{}",
        note("C", 2, 1, ""),
        note("D", 2, 1, "")
    ));

    let notes = canonicalize(&doc, false, true);
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].duration.following_rest_duration, 4);
    assert!(notes[0].followed_by_fermata_rest);

    let with_rests = canonicalize_with(
        &doc,
        &CanonicalizeOptions {
            keep_rests: true,
            ..CanonicalizeOptions::default()
        },
    );
    assert_eq!(with_rests.len(), 3);
    assert!(with_rests[1].is_rest());
    assert_eq!(with_rests[1].duration.duration, 4);
}

#[test]
fn directions_resolve_to_note_markings() {
    let doc = parse(&format!(
        r#"<direction><direction-type><dynamics><p/></dynamics></direction-type><staff>1</staff></direction>
        <direction><direction-type><wedge type="crescendo" number="1"/></direction-type><staff>1</staff></direction>
        {}
        <direction><direction-type><wedge type="stop" number="1"/></direction-type><staff>1</staff></direction>
        <direction><direction-type><dynamics><f/></dynamics></direction-type><staff>1</staff></direction>
        <direction><direction-type><words>poco rit.</words></direction-type><staff>1</staff></direction>
        {}
        <direction><direction-type><pedal type="start"/></direction-type><staff>1</staff></direction>
        {}{}"#,
        note("C", 2, 1, ""),
        note("D", 2, 1, ""),
        note("E", 2, 1, ""),
        note("F", 2, 1, "")
    ));
    let resolved = resolve(&doc);

    assert_eq!(resolved.spans.len(), 2);
    let at_start = resolved.markings_at(0, Some(1));
    assert_eq!(at_start.dynamic.as_deref(), Some("p"));
    let words: Vec<&str> = at_start.relative_dynamics.iter().map(|r| r.word.as_str()).collect();
    assert_eq!(words, vec!["crescendo"]);
    assert_eq!(at_start.relative_dynamics[0].end_xml_position, 2);
    assert!(!at_start.pedal);

    let later = resolved.markings_at(6, Some(1));
    assert_eq!(later.dynamic.as_deref(), Some("f"));
    assert!(later.relative_dynamics.is_empty());
    assert_eq!(later.relative_tempos.len(), 1);
    assert_eq!(later.relative_tempos[0].word, "rit");
    assert!(later.pedal);
}
