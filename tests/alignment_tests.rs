//! Integration tests: alignment, tempo curve, features and resynthesis
//! over a small score played slightly unevenly.

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use scorealign::alignment::match_notes_with_stats;
use scorealign::tempo::beat_positions;
use scorealign::{
    align_performance, canonicalize, match_notes, match_via_correspondence, parse_musicxml, performance_to_smf,
    resynthesize, AlignConfig, CorrespondenceTable, Document, MatchConfig, MatchedPair, PedalEvent, PerformedNote,
};

const SCALE: [(&str, i32); 8] = [
    ("C", 4),
    ("D", 4),
    ("E", 4),
    ("F", 4),
    ("G", 4),
    ("A", 4),
    ("B", 4),
    ("C", 5),
];

/// Two 4/4 measures of quarter notes at 60 qpm: one second per tick.
fn scale_document() -> Document {
    let notes: Vec<String> = SCALE
        .iter()
        .map(|(step, octave)| {
            format!("<note><pitch><step>{step}</step><octave>{octave}</octave></pitch><duration>1</duration><voice>1</voice><type>quarter</type></note>")
        })
        .collect();
    let xml = format!(
        r#"<score-partwise version="4.0">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>
      <direction><direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>60</per-minute></metronome></direction-type><sound tempo="60"/></direction>
      {}
    </measure>
    <measure number="2">{}</measure>
  </part>
</score-partwise>"#,
        notes[..4].concat(),
        notes[4..].concat()
    );
    parse_musicxml(&xml).unwrap()
}

/// The scale with off-beats late, the sixth note missing and a doubled
/// first note at the end of the stream.
fn performance() -> Vec<PerformedNote> {
    let pitches = [60, 62, 64, 65, 67, 69, 71, 72];
    let mut performed: Vec<PerformedNote> = (0..8)
        .filter(|&i| i != 5)
        .map(|i| {
            let start = i as f64 + if i % 2 == 1 { 0.05 } else { 0.0 };
            PerformedNote {
                pitch: pitches[i],
                start,
                end: start + 0.5,
                velocity: 60 + i as i32 * 2,
            }
        })
        .collect();
    performed.push(PerformedNote {
        pitch: 60,
        start: 0.04,
        end: 0.3,
        velocity: 30,
    });
    performed
}

#[test]
fn pairs_are_positional_and_unique() {
    let doc = scale_document();
    let notes = canonicalize(&doc, false, true);
    let performed = performance();

    let (pairs, stats) = match_notes_with_stats(&notes, &performed, &MatchConfig::default());
    assert_eq!(pairs.len(), notes.len());
    assert_eq!(pairs[0], MatchedPair::Matched(0));
    assert_eq!(pairs[5], MatchedPair::Empty);
    assert_eq!((stats.matched, stats.unmatched), (7, 1));

    let used: Vec<usize> = pairs.iter().filter_map(|p| p.performed()).collect();
    let unique: HashSet<usize> = used.iter().copied().collect();
    assert_eq!(used.len(), unique.len());

    assert!(match_notes(&notes, &[], &MatchConfig::default())
        .iter()
        .all(MatchedPair::is_empty));
}

#[test]
fn correspondence_hop_onto_a_second_performance() {
    let doc = scale_document();
    let notes = canonicalize(&doc, false, true);
    let reference = performance();
    let other: Vec<PerformedNote> = reference
        .iter()
        .map(|p| PerformedNote {
            start: p.start + 0.5,
            end: p.end + 0.5,
            ..*p
        })
        .collect();

    let mut tsv = String::from("//Version: 1\n");
    for (i, (r, o)) in reference.iter().zip(&other).enumerate() {
        tsv.push_str(&format!(
            "{i}\t{:.6}\tX\t{}\t{}\t{i}\t{:.6}\tX\t{}\t{}\n",
            o.start, o.pitch, o.velocity, r.start, r.pitch, r.velocity
        ));
    }
    let table = CorrespondenceTable::from_tsv(&tsv);
    assert_eq!(table.rows.len(), reference.len());

    let config = MatchConfig::default();
    let score_pairs = match_notes(&notes, &reference, &config);
    let hopped = match_via_correspondence(&score_pairs, &reference, &table, &other, &config);
    assert_eq!(hopped, score_pairs);

    let empty_table = CorrespondenceTable::default();
    let lost = match_via_correspondence(&score_pairs, &reference, &empty_table, &other, &config);
    assert_eq!(lost.len(), score_pairs.len());
    assert!(lost.iter().all(MatchedPair::is_empty));
}

#[test]
fn tempo_segments_cover_the_piece_without_gaps() {
    let doc = scale_document();
    assert_eq!(beat_positions(&doc, false), (0..8).map(f64::from).collect::<Vec<_>>());

    let alignment = align_performance(&doc, &performance(), &[], &AlignConfig::default());
    let segments = &alignment.curve.segments;
    assert!(!segments.is_empty());
    assert_eq!(segments[0].tick_start, 0);
    assert_eq!(segments[segments.len() - 1].tick_end, doc.total_ticks);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].tick_end, pair[1].tick_start);
    }
    for tick in 0..doc.total_ticks {
        let covering = segments
            .iter()
            .filter(|s| s.tick_start <= tick && tick < s.tick_end)
            .count();
        assert_eq!(covering, 1, "tick {tick}");
    }
    // Beat 5 was never played: its segment runs from tick 4 to 6.
    assert!(segments.iter().any(|s| (s.tick_start, s.tick_end) == (4, 6)));
}

#[test]
fn pipeline_features_and_resynthesis() {
    let doc = scale_document();
    let pedal = [
        PedalEvent { time: 0.0, value: 127, controller: 64 },
        PedalEvent { time: 0.9, value: 0, controller: 64 },
    ];
    let alignment = align_performance(&doc, &performance(), &pedal, &AlignConfig::default());

    assert_eq!(alignment.performed[0].end, 0.9);
    assert_eq!(alignment.features.len(), alignment.notes.len());
    assert_eq!(alignment.markings.len(), alignment.notes.len());
    assert!(alignment.features[1].onset_deviation.is_some());
    assert_eq!(alignment.features[5].onset_deviation, None);
    assert_eq!(alignment.features[5].loudness, 0.0);
    assert_eq!(alignment.features[0].pitch_interval, Some(2));

    let rendered = resynthesize(&alignment.notes, &alignment.curve, &alignment.features);
    assert_eq!(rendered.len(), alignment.notes.len());
    assert!(rendered.windows(2).all(|w| w[0].start <= w[1].start));
    assert!(rendered.iter().all(|n| (0..=127).contains(&n.velocity) && n.end >= n.start));

    let smf = performance_to_smf(&rendered);
    assert_eq!(&smf[0..4], b"MThd");
    assert_eq!(smf.windows(4).filter(|w| *w == b"MTrk").count(), 2);
}
