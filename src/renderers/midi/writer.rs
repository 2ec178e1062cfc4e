//! Song-IR → Standard MIDI File (Format 1)
//!
//! Layout: an `MThd` header, one conductor track carrying the merged
//! tempo/time-signature maps, then one `MTrk` chunk per MIDI track. Only
//! note, CC, and pitch-bend events reach the file; rests and notation
//! events are timeline-only. Output is deterministic: identical Song-IR
//! always produces identical bytes.

use crate::diagnostics::{Code, Diagnostic};
use crate::ir::{MidiTrack, SongIR, TrackEvent};
use crate::renderers::midi::vlq::write_vlq;

/// At equal ticks, channel events order as note-off, CC, pitch-bend,
/// note-on, so a note ending exactly where another begins releases first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EventClass {
    NoteOff = 0,
    ControlChange = 1,
    PitchBend = 2,
    NoteOn = 3,
}

/// Serialize a validated Song-IR to SMF bytes
pub fn write_smf(song: &SongIR) -> Result<Vec<u8>, Diagnostic> {
    if song.ppq == 0 || song.ppq > u16::MAX as u32 {
        return Err(Diagnostic::new(
            Code::InvalidPpq,
            format!("ppq {} does not fit the SMF division field", song.ppq),
        ));
    }

    let midi_tracks: Vec<&MidiTrack> = song.midi_tracks().collect();
    let ntracks = 1 + midi_tracks.len() as u16;

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&ntracks.to_be_bytes());
    out.extend_from_slice(&(song.ppq as u16).to_be_bytes());

    write_chunk(&mut out, &conductor_payload(song)?);
    for track in midi_tracks {
        write_chunk(&mut out, &track_payload(track));
    }

    log::debug!("wrote smf: {} track chunk(s), {} byte(s)", ntracks, out.len());
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Track 0: merged tempo and time-signature events
fn conductor_payload(song: &SongIR) -> Result<Vec<u8>, Diagnostic> {
    let mut events: Vec<(u64, Vec<u8>)> = Vec::new();

    for tempo in &song.tempos {
        let micros = (60_000_000.0 / tempo.bpm).round() as u64;
        if micros > 0xFF_FFFF {
            return Err(Diagnostic::new(
                Code::TempoOutOfRange,
                format!("tempo {} bpm does not fit 24-bit microseconds", tempo.bpm),
            ));
        }
        let mut bytes = vec![0xFF, 0x51, 0x03];
        bytes.extend_from_slice(&micros.to_be_bytes()[5..]);
        events.push((tempo.tick, bytes));
    }

    for sig in &song.time_sigs {
        if !sig.denominator.is_power_of_two() || sig.denominator > 64 || sig.denominator == 0 {
            return Err(Diagnostic::new(
                Code::BadTimeSignature,
                format!("time-signature denominator {} is not a power of two up to 64", sig.denominator),
            ));
        }
        let log2_den = sig.denominator.trailing_zeros() as u8;
        // 24 MIDI clocks per metronome click, eight 32nds per quarter
        events.push((sig.tick, vec![0xFF, 0x58, 0x04, sig.numerator as u8, log2_den, 24, 8]));
    }

    // tempos come before time signatures on tick ties (stable sort over
    // the push order above)
    events.sort_by_key(|(tick, _)| *tick);

    let mut payload = Vec::new();
    let mut prev_tick = 0u64;
    for (tick, bytes) in events {
        write_delta(&mut payload, tick, &mut prev_tick);
        payload.extend_from_slice(&bytes);
    }
    end_of_track(&mut payload);
    Ok(payload)
}

/// One `MTrk` payload for a MIDI track
fn track_payload(track: &MidiTrack) -> Vec<u8> {
    let channel = track.channel & 0x0F;

    let mut events: Vec<(u64, EventClass, Vec<u8>)> = Vec::new();
    for event in &track.events {
        match event {
            TrackEvent::Note { tick, dur, key, vel, .. } => {
                events.push((*tick, EventClass::NoteOn, vec![0x90 | channel, *key, *vel]));
                // explicit note-off, not a zero-velocity note-on
                events.push((tick + dur, EventClass::NoteOff, vec![0x80 | channel, *key, 0x00]));
            }
            TrackEvent::Cc { tick, controller, value } => {
                events.push((*tick, EventClass::ControlChange, vec![0xB0 | channel, *controller, *value]));
            }
            TrackEvent::PitchBend { tick, value } => {
                let v14 = (*value as i32 + 8192) as u16;
                events.push((
                    *tick,
                    EventClass::PitchBend,
                    vec![0xE0 | channel, (v14 & 0x7F) as u8, ((v14 >> 7) & 0x7F) as u8],
                ));
            }
            // rests shape the cursor only; notation events have no SMF form
            _ => {}
        }
    }
    events.sort_by_key(|(tick, class, _)| (*tick, *class));

    let mut payload = Vec::new();
    payload.push(0x00);
    payload.push(0xC0 | channel);
    payload.push(track.program & 0x7F);

    let mut prev_tick = 0u64;
    for (tick, _, bytes) in events {
        write_delta(&mut payload, tick, &mut prev_tick);
        payload.extend_from_slice(&bytes);
    }
    end_of_track(&mut payload);
    payload
}

fn write_delta(payload: &mut Vec<u8>, tick: u64, prev_tick: &mut u64) {
    let delta = tick.saturating_sub(*prev_tick);
    write_vlq(payload, delta.min(u32::MAX as u64) as u32);
    *prev_tick = tick;
}

fn end_of_track(payload: &mut Vec<u8>) {
    payload.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{TempoEvent, TimeSigEvent, Track};

    fn minimal_song() -> SongIR {
        let mut song = SongIR::new(480);
        song.tempos.push(TempoEvent { tick: 0, bpm: 120.0 });
        song.time_sigs.push(TimeSigEvent { tick: 0, numerator: 4, denominator: 4 });
        song.tracks.push(Track::Midi(MidiTrack {
            id: "t1".to_string(),
            name: "lead".to_string(),
            channel: 0,
            program: 0,
            default_vel: 100,
            events: vec![
                TrackEvent::Note { tick: 0, dur: 480, key: 60, vel: 100, lyric: None, articulation: None },
                TrackEvent::Note { tick: 480, dur: 480, key: 62, vel: 100, lyric: None, articulation: None },
            ],
        }));
        song
    }

    #[test]
    fn test_header_chunk() {
        let bytes = write_smf(&minimal_song()).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
        assert_eq!(&bytes[8..10], &[0, 1]); // format 1
        assert_eq!(&bytes[10..12], &[0, 2]); // conductor + one track
        assert_eq!(&bytes[12..14], &[0x01, 0xE0]); // division 480
    }

    #[test]
    fn test_conductor_tempo_and_meter_bytes() {
        let bytes = write_smf(&minimal_song()).unwrap();
        let payload_start = 14 + 8;
        // 120 bpm = 500000 us = 0x07 0xA1 0x20, at delta 0
        assert_eq!(
            &bytes[payload_start..payload_start + 7],
            &[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]
        );
        // 4/4 at delta 0: FF 58 04 04 02 18 08
        assert_eq!(
            &bytes[payload_start + 7..payload_start + 15],
            &[0x00, 0xFF, 0x58, 0x04, 0x04, 0x02, 0x18, 0x08]
        );
        // end of track
        assert_eq!(
            &bytes[payload_start + 15..payload_start + 19],
            &[0x00, 0xFF, 0x2F, 0x00]
        );
    }

    #[test]
    fn test_note_track_bytes() {
        let bytes = write_smf(&minimal_song()).unwrap();
        // conductor: 14-byte header, 8-byte chunk header, 19-byte payload
        let track_start = 14 + 8 + 19;
        assert_eq!(&bytes[track_start..track_start + 4], b"MTrk");
        let payload = &bytes[track_start + 8..];
        assert_eq!(&payload[0..3], &[0x00, 0xC0, 0x00]); // program change
        assert_eq!(&payload[3..7], &[0x00, 0x90, 60, 100]); // C4 on
        assert_eq!(&payload[7..12], &[0x83, 0x60, 0x80, 60, 0]); // off after 480
        assert_eq!(&payload[12..16], &[0x00, 0x90, 62, 100]); // D4 on
        assert_eq!(&payload[16..21], &[0x83, 0x60, 0x80, 62, 0]);
        assert_eq!(&payload[21..25], &[0x00, 0xFF, 0x2F, 0x00]);
    }

    #[test]
    fn test_same_tick_ordering() {
        let mut song = minimal_song();
        if let Track::Midi(track) = &mut song.tracks[0] {
            track.events = vec![
                TrackEvent::Note { tick: 0, dur: 480, key: 60, vel: 100, lyric: None, articulation: None },
                // second note begins exactly as the first ends
                TrackEvent::Note { tick: 480, dur: 480, key: 60, vel: 100, lyric: None, articulation: None },
                TrackEvent::Cc { tick: 480, controller: 64, value: 0 },
                TrackEvent::PitchBend { tick: 480, value: 0 },
            ];
        }
        let bytes = write_smf(&song).unwrap();
        let track_start = 14 + 8 + 19;
        let payload = &bytes[track_start + 8..];
        // at tick 480 (after the two-byte delta): note-off, then cc, then
        // bend, then note-on
        assert_eq!(&payload[9..12], &[0x80, 60, 0]);
        assert_eq!(&payload[13..16], &[0xB0, 64, 0]);
        assert_eq!(&payload[17..20], &[0xE0, 0x00, 0x40]);
        assert_eq!(&payload[21..24], &[0x90, 60, 100]);
    }

    #[test]
    fn test_tempo_change_deltas_and_micros() {
        let mut song = minimal_song();
        song.tempos.push(TempoEvent { tick: 1920, bpm: 90.0 });
        if let Track::Midi(track) = &mut song.tracks[0] {
            track.events.clear();
        }
        let bytes = write_smf(&song).unwrap();
        let payload_start = 14 + 8;
        // second tempo: delta 1920 = 0x8F 0x00, 666667 us = 0x0A 0x2C 0x2B
        let second = payload_start + 15;
        assert_eq!(&bytes[second..second + 7], &[0x8F, 0x00, 0xFF, 0x51, 0x03, 0x0A, 0x2C]);
        assert_eq!(bytes[second + 7], 0x2B);
    }

    #[test]
    fn test_pitch_bend_encoding() {
        let mut song = minimal_song();
        if let Track::Midi(track) = &mut song.tracks[0] {
            track.events = vec![
                TrackEvent::PitchBend { tick: 0, value: -8192 },
                TrackEvent::PitchBend { tick: 1, value: 0 },
                TrackEvent::PitchBend { tick: 2, value: 8191 },
            ];
        }
        let bytes = write_smf(&song).unwrap();
        let track_start = 14 + 8 + 19;
        let payload = &bytes[track_start + 8..];
        assert_eq!(&payload[3..7], &[0x00, 0xE0, 0x00, 0x00]); // min
        assert_eq!(&payload[7..11], &[0x01, 0xE0, 0x00, 0x40]); // center
        assert_eq!(&payload[11..15], &[0x01, 0xE0, 0x7F, 0x7F]); // max
    }

    #[test]
    fn test_vocal_tracks_do_not_write_chunks() {
        let mut song = minimal_song();
        song.tracks.push(Track::Vocal(crate::ir::VocalTrack {
            id: "v".to_string(),
            name: "voice".to_string(),
            phrases: vec![],
            events: vec![],
            vocaloid_params: None,
        }));
        let bytes = write_smf(&song).unwrap();
        assert_eq!(&bytes[10..12], &[0, 2]); // still conductor + one midi track
    }

    #[test]
    fn test_extreme_tempo_rejected() {
        let mut song = minimal_song();
        song.tempos[0].bpm = 3.0; // 20,000,000 us per quarter
        let err = write_smf(&song).unwrap_err();
        assert_eq!(err.code, Code::TempoOutOfRange);
    }

    #[test]
    fn test_byte_exact_across_runs() {
        let song = minimal_song();
        assert_eq!(write_smf(&song).unwrap(), write_smf(&song).unwrap());
    }
}
