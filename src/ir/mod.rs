//! Song intermediate representation and its invariants

pub mod types;
pub mod validate;

pub use types::{
    Articulation, CurvePoint, MidiTrack, ParamCurve, Phrase, PhraseNote, SongIR, SongMarker,
    TempoEvent, TimeSigEvent, Track, TrackEvent, VocalTrack, VocaloidParams, SCHEMA_VERSION,
};
pub use validate::validate;
