//! MIDI file generation from a performed (or resynthesized) note stream.
//!
//! Produces a Standard MIDI File (SMF) Type 1 as raw bytes.
//! Track 0 is the tempo map, fixed at 120 qpm so one second is exactly
//! 960 ticks; track 1 holds the notes and sustain pedal changes on
//! channel 0.

use crate::performance::{PedalEvent, PerformedNote};

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// A single MIDI event (note on/off, control change, etc.)
#[derive(Debug, Clone)]
pub struct MidiEvent {
    /// Absolute time in ticks from the start of the track
    pub tick: u32,
    /// Raw MIDI message bytes (status + data)
    pub bytes: Vec<u8>,
}

/// Ticks per quarter note in our MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

/// Tempo of the output file.
pub const OUTPUT_QPM: f64 = 120.0;

/// Encode performed notes as a piano SMF.
pub fn performance_to_smf(notes: &[PerformedNote]) -> Vec<u8> {
    performance_to_smf_with_pedal(notes, &[])
}

/// Encode performed notes plus sustain pedal control changes.
pub fn performance_to_smf_with_pedal(notes: &[PerformedNote], pedal: &[PedalEvent]) -> Vec<u8> {
    // (tick, order, bytes): at one tick, note-offs go first so a repeated
    // pitch is not cut by its own predecessor.
    let mut timed: Vec<(u32, u8, Vec<u8>)> = Vec::with_capacity(notes.len() * 2 + pedal.len());

    for note in notes {
        let Some(pitch) = data_byte(note.pitch) else {
            log::warn!("pitch {} outside the MIDI range; note dropped", note.pitch);
            continue;
        };
        let velocity = note.velocity.clamp(1, 127) as u8;
        let on = seconds_to_ticks(note.start);
        let off = seconds_to_ticks(note.end).max(on);
        timed.push((on, 2, vec![0x90, pitch, velocity]));
        timed.push((off, 0, vec![0x80, pitch, 0]));
    }
    for event in pedal {
        let value = event.value.clamp(0, 127) as u8;
        timed.push((seconds_to_ticks(event.time), 1, vec![0xB0, event.controller.min(127), value]));
    }
    timed.sort_by_key(|(tick, order, _)| (*tick, *order));

    let events: Vec<MidiEvent> = timed
        .into_iter()
        .map(|(tick, _, bytes)| MidiEvent { tick, bytes })
        .collect();

    let mut program = vec![MidiEvent {
        tick: 0,
        bytes: vec![0xC0, 0],
    }];
    program.extend(events);

    let tracks = vec![build_tempo_track(), encode_track(&program, "Piano")];
    log::debug!("wrote {} note(s) and {} pedal event(s) to SMF", notes.len(), pedal.len());
    build_smf(&tracks)
}

/// Absolute tick of a time in seconds under [`OUTPUT_QPM`].
pub fn seconds_to_ticks(seconds: f64) -> u32 {
    let ticks_per_second = TICKS_PER_QUARTER as f64 * OUTPUT_QPM / 60.0;
    (seconds.max(0.0) * ticks_per_second).round() as u32
}

fn data_byte(value: i32) -> Option<u8> {
    u8::try_from(value).ok().filter(|v| *v <= 127)
}

// ═══════════════════════════════════════════════════════════════════════
// SMF byte encoding
// ═══════════════════════════════════════════════════════════════════════

/// Assemble the SMF from header + track chunks.
fn build_smf(tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();

    // MThd header
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes()); // header length
    out.extend_from_slice(&1u16.to_be_bytes()); // format type 1
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&TICKS_PER_QUARTER.to_be_bytes());

    for track_data in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        out.extend_from_slice(track_data);
    }

    out
}

fn build_tempo_track() -> Vec<u8> {
    let uspq = (60_000_000.0 / OUTPUT_QPM) as u32; // microseconds per quarter
    // Meta event: FF 51 03 tt tt tt
    let tempo = MidiEvent {
        tick: 0,
        bytes: vec![
            0xFF,
            0x51,
            0x03,
            ((uspq >> 16) & 0xFF) as u8,
            ((uspq >> 8) & 0xFF) as u8,
            (uspq & 0xFF) as u8,
        ],
    };
    encode_track(&[tempo], "Tempo")
}

/// Encode events as one MTrk body. Events keep their relative order within
/// a tick.
fn encode_track(events: &[MidiEvent], name: &str) -> Vec<u8> {
    let mut data = Vec::new();

    // Track name meta event
    let name_bytes = name.as_bytes();
    data.push(0x00);
    data.push(0xFF);
    data.push(0x03);
    write_vlq(&mut data, name_bytes.len() as u32);
    data.extend_from_slice(name_bytes);

    let mut sorted: Vec<&MidiEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.tick);

    let mut last_tick: u32 = 0;
    for event in &sorted {
        write_vlq(&mut data, event.tick.saturating_sub(last_tick));
        data.extend_from_slice(&event.bytes);
        last_tick = event.tick;
    }

    // End of track
    data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

    data
}

/// Variable-length quantity, most significant group first.
fn write_vlq(out: &mut Vec<u8>, mut value: u32) {
    if value == 0 {
        out.push(0);
        return;
    }
    let mut buf = [0u8; 5];
    let mut i = 0;
    while value > 0 {
        buf[i] = (value & 0x7F) as u8;
        value >>= 7;
        if i > 0 {
            buf[i] |= 0x80;
        }
        i += 1;
    }
    for j in (0..i).rev() {
        out.push(buf[j]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        write_vlq(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, vec![0x83, 0x60]);
    }

    #[test]
    fn smf_header_valid() {
        let track = encode_track(&[], "Test");
        let smf = build_smf(&[track]);
        assert_eq!(&smf[0..4], b"MThd");
        assert_eq!(&smf[8..10], &1u16.to_be_bytes()); // format 1
        assert_eq!(&smf[12..14], &TICKS_PER_QUARTER.to_be_bytes());
        assert!(smf.windows(4).any(|w| w == b"MTrk"));
    }

    #[test]
    fn one_second_is_960_ticks() {
        assert_eq!(seconds_to_ticks(1.0), 960);
        assert_eq!(seconds_to_ticks(0.25), 240);
        assert_eq!(seconds_to_ticks(-1.0), 0);
    }

    #[test]
    fn repeated_pitch_releases_before_restrike() {
        let notes = [
            PerformedNote { pitch: 60, start: 0.0, end: 0.5, velocity: 80 },
            PerformedNote { pitch: 60, start: 0.5, end: 1.0, velocity: 80 },
        ];
        let smf = performance_to_smf(&notes);
        assert_eq!(&smf[10..12], &2u16.to_be_bytes());
        let off = smf.windows(3).position(|w| w == [0x80, 60, 0]);
        let second_on = smf
            .windows(3)
            .enumerate()
            .filter(|(_, w)| *w == [0x90, 60, 80])
            .map(|(i, _)| i)
            .nth(1);
        assert!(off.is_some() && second_on.is_some());
        assert!(off < second_on);
    }
}
