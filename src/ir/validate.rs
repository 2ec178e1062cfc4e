//! Song-IR invariant checks and canonical ordering
//!
//! Runs after evaluation and before any exporter: deduplicates tick-0
//! tempo/meter declarations (last wins), stable-sorts the global maps and
//! every track's events by tick, then verifies the structural invariants.

use crate::diagnostics::{Code, Diagnostic};
use crate::ir::types::SongIR;

/// Normalize and validate a Song-IR in place
///
/// Invariants enforced:
/// - `ppq > 0`
/// - exactly one tempo at tick 0 (duplicates collapse to the last)
/// - exactly one time signature at tick 0 (same rule)
/// - tempos, time signatures, and track events sorted by tick (stable)
pub fn validate(song: &mut SongIR) -> Result<(), Diagnostic> {
    if song.ppq == 0 {
        return Err(Diagnostic::new(Code::InvalidPpq, "ppq must be positive"));
    }

    dedup_last_wins(&mut song.tempos, |t| t.tick);
    dedup_last_wins(&mut song.time_sigs, |t| t.tick);

    song.tempos.sort_by_key(|t| t.tick);
    song.time_sigs.sort_by_key(|t| t.tick);

    if !song.tempos.iter().any(|t| t.tick == 0) {
        return Err(Diagnostic::new(
            Code::MissingTempoAtZero,
            "song has no tempo at tick 0",
        )
        .with_help("declare a tempo at 1:1, e.g. `tempo { 1:1 -> 120bpm; }`"));
    }
    if !song.time_sigs.iter().any(|t| t.tick == 0) {
        return Err(Diagnostic::new(
            Code::MissingMeterAtZero,
            "song has no time signature at tick 0",
        )
        .with_help("declare a meter at 1:1, e.g. `meter { 1:1 -> 4/4; }`"));
    }

    for track in &mut song.tracks {
        track.events_mut().sort_by_key(|e| e.tick());
    }

    log::debug!(
        "validated song-ir: {} tempo(s), {} time signature(s), {} track(s)",
        song.tempos.len(),
        song.time_sigs.len(),
        song.tracks.len()
    );
    Ok(())
}

/// Keep only the last element for each duplicate key, preserving order of
/// first appearance
fn dedup_last_wins<T: Clone, K: Eq + Copy>(items: &mut Vec<T>, key: impl Fn(&T) -> K) {
    let mut result: Vec<T> = Vec::with_capacity(items.len());
    for item in items.iter() {
        if let Some(existing) = result.iter_mut().find(|r| key(r) == key(item)) {
            *existing = item.clone();
        } else {
            result.push(item.clone());
        }
    }
    *items = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::*;

    fn song_with_zero_maps() -> SongIR {
        let mut song = SongIR::new(480);
        song.tempos.push(TempoEvent { tick: 0, bpm: 120.0 });
        song.time_sigs.push(TimeSigEvent { tick: 0, numerator: 4, denominator: 4 });
        song
    }

    #[test]
    fn test_valid_song_passes() {
        let mut song = song_with_zero_maps();
        assert!(validate(&mut song).is_ok());
    }

    #[test]
    fn test_zero_ppq_rejected() {
        let mut song = song_with_zero_maps();
        song.ppq = 0;
        assert_eq!(validate(&mut song).unwrap_err().code, Code::InvalidPpq);
    }

    #[test]
    fn test_missing_tempo_at_zero() {
        let mut song = song_with_zero_maps();
        song.tempos = vec![TempoEvent { tick: 960, bpm: 90.0 }];
        assert_eq!(validate(&mut song).unwrap_err().code, Code::MissingTempoAtZero);
    }

    #[test]
    fn test_missing_meter_at_zero() {
        let mut song = song_with_zero_maps();
        song.time_sigs = vec![TimeSigEvent { tick: 1920, numerator: 3, denominator: 4 }];
        assert_eq!(validate(&mut song).unwrap_err().code, Code::MissingMeterAtZero);
    }

    #[test]
    fn test_duplicate_tick_zero_tempo_last_wins() {
        let mut song = song_with_zero_maps();
        song.tempos.push(TempoEvent { tick: 0, bpm: 140.0 });
        validate(&mut song).unwrap();
        assert_eq!(song.tempos.len(), 1);
        assert_eq!(song.tempos[0].bpm, 140.0);
    }

    #[test]
    fn test_maps_sorted_after_validate() {
        let mut song = song_with_zero_maps();
        song.tempos.push(TempoEvent { tick: 3840, bpm: 100.0 });
        song.tempos.push(TempoEvent { tick: 1920, bpm: 90.0 });
        validate(&mut song).unwrap();
        let ticks: Vec<u64> = song.tempos.iter().map(|t| t.tick).collect();
        assert_eq!(ticks, vec![0, 1920, 3840]);
    }

    #[test]
    fn test_track_events_sorted() {
        let mut song = song_with_zero_maps();
        song.tracks.push(Track::Midi(MidiTrack {
            id: "t".to_string(),
            name: "T".to_string(),
            channel: 0,
            program: 0,
            default_vel: 100,
            events: vec![
                TrackEvent::Note { tick: 480, dur: 480, key: 62, vel: 100, lyric: None, articulation: None },
                TrackEvent::Note { tick: 0, dur: 480, key: 60, vel: 100, lyric: None, articulation: None },
            ],
        }));
        validate(&mut song).unwrap();
        assert_eq!(song.tracks[0].events()[0].tick(), 0);
        assert_eq!(song.tracks[0].events()[1].tick(), 480);
    }
}
