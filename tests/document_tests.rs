//! Integration tests for the temporal document model: parsing, global timing,
//! repeat expansion and container loading.

use std::io::{Cursor, Write};

use pretty_assertions::assert_eq;
use scorealign::{parse_bytes, parse_file, parse_musicxml, parse_musicxml_with, Document, ParseOptions, ScoreError};

fn score(measures: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 4.0 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">
<score-partwise version="4.0">
  <work><work-title>Study</work-title></work>
  <identification><creator type="composer">Anon</creator></identification>
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">{measures}</part>
</score-partwise>"#
    )
}

fn pitched(step: &str, octave: i32, duration: i64, voice: i32) -> String {
    format!(
        "<note><pitch><step>{step}</step><octave>{octave}</octave></pitch>\
         <duration>{duration}</duration><voice>{voice}</voice></note>"
    )
}

fn times_by_voice(doc: &Document, voice: i32) -> Vec<f64> {
    doc.notes()
        .filter(|n| n.voice == voice)
        .map(|n| n.duration.time_position)
        .collect()
}

// ─── Timing ──────────────────────────────────────────────────────────

#[test]
fn single_tempo_eighth_notes() {
    let xml = score(&format!(
        r#"<measure number="1">
          <attributes><divisions>2</divisions><time><beats>1</beats><beat-type>4</beat-type></time></attributes>
          <direction><direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>120</per-minute></metronome></direction-type><sound tempo="120"/></direction>
          {}{}
        </measure>"#,
        pitched("C", 4, 1, 1),
        pitched("D", 4, 1, 1)
    ));
    let doc = parse_musicxml(&xml).unwrap();

    assert_eq!(doc.title.as_deref(), Some("Study"));
    assert_eq!(doc.composer.as_deref(), Some("Anon"));
    assert_eq!(doc.tempos.len(), 1);
    assert_eq!(times_by_voice(&doc, 1), vec![0.0, 0.25]);
    assert_eq!(doc.total_ticks, 2);
    assert_eq!(doc.total_seconds, 0.5);
}

#[test]
fn time_is_monotonic_within_each_voice() {
    let xml = score(&format!(
        r#"<measure number="1">
          <attributes><divisions>2</divisions></attributes>
          {a}{b}{c}{d}
          <backup><duration>8</duration></backup>
          {e}
          <direction><direction-type><words>Adagio</words></direction-type><sound tempo="60"/></direction>
          {f}{g}
        </measure>
        <measure number="2">{h}{i}</measure>"#,
        a = pitched("C", 5, 2, 1),
        b = pitched("D", 5, 2, 1),
        c = pitched("E", 5, 2, 1),
        d = pitched("F", 5, 2, 1),
        e = pitched("C", 3, 2, 2),
        f = pitched("G", 3, 4, 2),
        g = pitched("C", 3, 2, 2),
        h = pitched("G", 4, 4, 1),
        i = pitched("A", 4, 4, 1),
    ));
    let doc = parse_musicxml(&xml).unwrap();

    for voice in [1, 2] {
        let times = times_by_voice(&doc, voice);
        assert!(
            times.windows(2).all(|w| w[0] <= w[1]),
            "voice {voice} times go backwards: {times:?}"
        );
    }
    // The tempo change sits in voice 2 at tick 2 but governs voice 1 too.
    assert_eq!(times_by_voice(&doc, 1), vec![0.0, 0.5, 1.5, 2.5, 3.5, 5.5]);
}

// ─── Repeats ─────────────────────────────────────────────────────────

#[test]
fn repeats_expand_only_when_asked() {
    let xml = score(&format!(
        r#"<measure number="1"><attributes><divisions>1</divisions></attributes>{}</measure>
        <measure number="2">{}<barline location="right"><repeat direction="backward"/></barline></measure>
        <measure number="3">{}</measure>"#,
        pitched("C", 4, 4, 1),
        pitched("D", 4, 4, 1),
        pitched("E", 4, 4, 1),
    ));

    let expanded = parse_musicxml(&xml).unwrap();
    let sources: Vec<usize> = expanded.parts[0].measures.iter().map(|m| m.source_index).collect();
    assert_eq!(sources, vec![0, 1, 0, 1, 2]);
    assert_eq!(expanded.total_ticks, 20);

    let written = parse_musicxml_with(&xml, &ParseOptions { expand_repeats: false }).unwrap();
    assert_eq!(written.measure_positions(), vec![0, 4, 8]);
}

// ─── Errors ──────────────────────────────────────────────────────────

#[test]
fn structural_errors_are_fatal() {
    assert!(matches!(
        parse_musicxml("<score-timewise/>"),
        Err(ScoreError::MalformedInput(_))
    ));
    assert!(matches!(
        parse_musicxml("<score-partwise><part"),
        Err(ScoreError::MalformedInput(_))
    ));

    let unpitched = score(
        r#"<measure number="3"><attributes><divisions>1</divisions></attributes>
        <note><unpitched><display-step>C</display-step><display-octave>5</display-octave></unpitched><duration>1</duration></note>
        </measure>"#,
    );
    match parse_musicxml(&unpitched) {
        Err(ScoreError::UnsupportedNote { part, measure, tick }) => {
            assert_eq!((part.as_str(), measure, tick), ("P1", 3, 0));
        }
        other => panic!("expected UnsupportedNote, got {other:?}"),
    }

    let bad_step = score(&format!(
        r#"<measure number="1"><attributes><divisions>1</divisions></attributes>{}</measure>"#,
        pitched("H", 4, 1, 1)
    ));
    assert!(matches!(
        parse_musicxml(&bad_step),
        Err(ScoreError::UnknownPitchStep { step, .. }) if step == "H"
    ));

    assert!(matches!(
        parse_file("/nonexistent/score.musicxml"),
        Err(ScoreError::Io { .. })
    ));
}

// ─── Containers ──────────────────────────────────────────────────────

fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn mxl_with_container_is_auto_detected() {
    let xml = score(&format!(
        r#"<measure number="1"><attributes><divisions>1</divisions></attributes>{}</measure>"#,
        pitched("C", 4, 4, 1)
    ));
    let container = r#"<?xml version="1.0"?>
<container><rootfiles><rootfile full-path="score.xml" media-type="application/vnd.recordare.musicxml+xml"/></rootfiles></container>"#;
    let data = zip_of(&[("META-INF/container.xml", container), ("score.xml", xml.as_str())]);

    let doc = parse_bytes(&data, None).unwrap();
    assert_eq!(doc.parts.len(), 1);
    assert_eq!(doc.total_ticks, 4);

    let same = parse_bytes(xml.as_bytes(), None).unwrap();
    assert_eq!(same.total_ticks, doc.total_ticks);
}

#[test]
fn mxl_with_two_scores_is_ambiguous() {
    let xml = score("");
    let data = zip_of(&[("first.xml", xml.as_str()), ("second.musicxml", xml.as_str())]);
    assert!(matches!(
        parse_bytes(&data, Some("mxl")),
        Err(ScoreError::AmbiguousContainer(_))
    ));
}
