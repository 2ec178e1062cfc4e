//! Song intermediate representation
//!
//! The Song-IR is the stable boundary between evaluation and the export
//! backends: a passive, serde-serializable data model with a versioned
//! schema. Exporters (the SMF writer here) read Song-IR only; they never
//! see the AST or runtime values.
//!
//! Notation-level events (slurs, hairpins, noteheads, effect annotations,
//! …) are preserved in the IR even though the SMF writer ignores them, so
//! richer backends can consume the same structure.

use serde::{Deserialize, Serialize};

/// Current Song-IR schema version
pub const SCHEMA_VERSION: &str = "2.0";

/// A whole song: global maps plus per-part tracks
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SongIR {
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Ticks per quarter note; also the SMF division
    pub ppq: u32,
    /// Tempo map, sorted by tick; at least one entry at tick 0
    pub tempos: Vec<TempoEvent>,
    /// Time-signature map, sorted by tick; at least one entry at tick 0
    pub time_sigs: Vec<TimeSigEvent>,
    /// Song-level section/rehearsal markers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<SongMarker>,
    pub tracks: Vec<Track>,
}

/// A song-level marker declared at score scope
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SongMarker {
    pub tick: u64,
    pub kind: String,
    pub label: String,
}

impl SongIR {
    pub fn new(ppq: u32) -> SongIR {
        SongIR {
            schema_version: SCHEMA_VERSION.to_string(),
            title: None,
            ppq,
            tempos: Vec::new(),
            time_sigs: Vec::new(),
            markers: Vec::new(),
            tracks: Vec::new(),
        }
    }

    /// The MIDI tracks, in declaration order
    pub fn midi_tracks(&self) -> impl Iterator<Item = &MidiTrack> {
        self.tracks.iter().filter_map(|t| match t {
            Track::Midi(m) => Some(m),
            Track::Vocal(_) => None,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct TempoEvent {
    pub tick: u64,
    pub bpm: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSigEvent {
    pub tick: u64,
    pub numerator: u32,
    pub denominator: u32,
}

/// A part: either an instrumental MIDI track or a vocal track
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Track {
    Midi(MidiTrack),
    Vocal(VocalTrack),
}

impl Track {
    pub fn events(&self) -> &[TrackEvent] {
        match self {
            Track::Midi(t) => &t.events,
            Track::Vocal(t) => &t.events,
        }
    }

    pub fn events_mut(&mut self) -> &mut Vec<TrackEvent> {
        match self {
            Track::Midi(t) => &mut t.events,
            Track::Vocal(t) => &mut t.events,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Track::Midi(t) => &t.name,
            Track::Vocal(t) => &t.name,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MidiTrack {
    pub id: String,
    pub name: String,
    /// MIDI channel 0..=15 (9 = percussion)
    pub channel: u8,
    /// GM program 0..=127
    pub program: u8,
    /// Velocity used when a note does not carry its own, 1..=127
    pub default_vel: u8,
    pub events: Vec<TrackEvent>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VocalTrack {
    pub id: String,
    pub name: String,
    pub phrases: Vec<Phrase>,
    pub events: Vec<TrackEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocaloid_params: Option<VocaloidParams>,
}

/// A bracketed run of vocal notes aligned to a lyric list
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Phrase {
    pub tick: u64,
    pub notes: Vec<PhraseNote>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PhraseNote {
    pub tick: u64,
    pub dur: u64,
    pub key: u8,
    pub vel: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyric: Option<String>,
    /// True when this note is the tail of a tie (same pitch carried over)
    pub continuation: bool,
    /// True when a melisma token stretched the previous lyric onto this note
    pub extend: bool,
}

/// Synthesis parameter curves for vocal backends (dynamics, breathiness, …)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct VocaloidParams {
    pub curves: Vec<ParamCurve>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParamCurve {
    pub param: String,
    pub points: Vec<CurvePoint>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct CurvePoint {
    pub tick: u64,
    pub value: f64,
}

/// Performance qualifier attached to a note
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Articulation {
    Staccato,
    Legato,
    Accent,
    Tenuto,
    Marcato,
}

/// One event on a track's timeline
///
/// The first four variants drive SMF output; the rest are notation and
/// annotation events carried through for other backends.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackEvent {
    Note {
        tick: u64,
        dur: u64,
        key: u8,
        vel: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        lyric: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        articulation: Option<Articulation>,
    },
    Rest {
        tick: u64,
        dur: u64,
    },
    Cc {
        tick: u64,
        controller: u8,
        value: u8,
    },
    PitchBend {
        tick: u64,
        /// 14-bit signed value, -8192..=8191
        value: i16,
    },
    Marker {
        tick: u64,
        kind: String,
        label: String,
    },
    SlurStart {
        tick: u64,
    },
    SlurEnd {
        tick: u64,
    },
    /// Crescendo or diminuendo hairpin
    Hairpin {
        tick: u64,
        end_tick: u64,
        crescendo: bool,
    },
    Dynamics {
        tick: u64,
        marking: String,
    },
    Notehead {
        tick: u64,
        shape: String,
    },
    Tablature {
        tick: u64,
        strings: u32,
        tuning: Vec<u8>,
    },
    TabNote {
        tick: u64,
        string: u32,
        fret: u32,
    },
    Fermata {
        tick: u64,
    },
    Breath {
        tick: u64,
    },
    Vibrato {
        tick: u64,
        dur: u64,
        depth: f64,
        rate: f64,
    },
    Automation {
        tick: u64,
        end_tick: u64,
        param: String,
        from: f64,
        to: f64,
        curve: String,
    },
    /// Named effect annotation with free-form parameters
    Effect {
        tick: u64,
        name: String,
        params: serde_json::Value,
    },
}

impl TrackEvent {
    pub fn tick(&self) -> u64 {
        match self {
            TrackEvent::Note { tick, .. }
            | TrackEvent::Rest { tick, .. }
            | TrackEvent::Cc { tick, .. }
            | TrackEvent::PitchBend { tick, .. }
            | TrackEvent::Marker { tick, .. }
            | TrackEvent::SlurStart { tick }
            | TrackEvent::SlurEnd { tick }
            | TrackEvent::Hairpin { tick, .. }
            | TrackEvent::Dynamics { tick, .. }
            | TrackEvent::Notehead { tick, .. }
            | TrackEvent::Tablature { tick, .. }
            | TrackEvent::TabNote { tick, .. }
            | TrackEvent::Fermata { tick }
            | TrackEvent::Breath { tick }
            | TrackEvent::Vibrato { tick, .. }
            | TrackEvent::Automation { tick, .. }
            | TrackEvent::Effect { tick, .. } => *tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let mut song = SongIR::new(480);
        song.title = Some("Test".to_string());
        song.tempos.push(TempoEvent { tick: 0, bpm: 120.0 });
        song.time_sigs.push(TimeSigEvent { tick: 0, numerator: 4, denominator: 4 });
        song.tracks.push(Track::Midi(MidiTrack {
            id: "t1".to_string(),
            name: "Piano".to_string(),
            channel: 0,
            program: 0,
            default_vel: 100,
            events: vec![
                TrackEvent::Note { tick: 0, dur: 480, key: 60, vel: 100, lyric: None, articulation: None },
                TrackEvent::Cc { tick: 480, controller: 64, value: 127 },
            ],
        }));

        let json = serde_json::to_string(&song).unwrap();
        let back: SongIR = serde_json::from_str(&json).unwrap();
        assert_eq!(song, back);
        assert_eq!(back.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_event_tick_accessor() {
        let e = TrackEvent::PitchBend { tick: 77, value: -100 };
        assert_eq!(e.tick(), 77);
        let e = TrackEvent::Marker { tick: 5, kind: "section".to_string(), label: "A".to_string() };
        assert_eq!(e.tick(), 5);
    }

    #[test]
    fn test_midi_tracks_filter() {
        let mut song = SongIR::new(480);
        song.tracks.push(Track::Vocal(VocalTrack {
            id: "v".to_string(),
            name: "Lead".to_string(),
            phrases: vec![],
            events: vec![],
            vocaloid_params: None,
        }));
        song.tracks.push(Track::Midi(MidiTrack {
            id: "m".to_string(),
            name: "Bass".to_string(),
            channel: 1,
            program: 33,
            default_vel: 90,
            events: vec![],
        }));
        assert_eq!(song.midi_tracks().count(), 1);
    }
}
