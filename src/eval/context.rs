//! Evaluation context and per-track state
//!
//! All evaluation state threads through one [`EvalContext`]: the Song-IR
//! under construction, the scope arena, the global/track phase, and the
//! per-track cursors and tuplet stacks. Built-ins receive the context and
//! mutate it; nothing about the current track is global.

use std::collections::HashMap;

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::scope::ScopeArena;
use crate::ir::{Articulation, SongIR, Track, TrackEvent};
use crate::models::{Duration, MeterMap, Position, PositionError};

/// User-function recursion ceiling
pub const MAX_CALL_DEPTH: u32 = 1000;
/// Per-loop iteration ceiling
pub const MAX_LOOP_ITERATIONS: u64 = 100_000;
/// Largest array any operation may allocate
pub const MAX_ALLOC_ELEMENTS: usize = 1_000_000;
/// Largest string any operation may build, in bytes
pub const MAX_STRING_BYTES: usize = 1 << 20;

/// Metric division used when the source does not override it
pub const DEFAULT_PPQ: u32 = 480;
/// Track velocity used until `velocity()` changes it
pub const DEFAULT_VELOCITY: u8 = 100;

/// Which part of the program is currently executing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Before any track is opened: tempo/meter mutations are legal
    Global,
    /// Inside a track body or placed clip: track mutations are legal
    Track,
}

/// An instrument definition registered by a `sound` score item
#[derive(Clone, Debug)]
pub struct SoundDef {
    pub kind: String,
    pub program: u8,
    pub channel: Option<u8>,
}

/// Mutable evaluation state for one track
#[derive(Debug)]
pub struct TrackState {
    /// Write position in ticks
    pub cursor: u64,
    /// Active `(actual, normal)` tuplet levels, innermost last
    pub tuplet_stack: Vec<(u32, u32)>,
    /// Default velocity for emitted notes
    pub velocity: u8,
    /// Open slur nesting depth
    pub slur_depth: u32,
    /// String count once `tablature()` declared it
    pub tablature_strings: Option<u32>,
    /// Lyric waiting to be attached to the next vocal note
    pub pending_lyric: Option<String>,
    /// Occupied `[start, end)` note ranges on vocal tracks, with the span
    /// that emitted them
    pub vocal_spans: Vec<(u64, u64, Span)>,
}

impl TrackState {
    pub fn new() -> TrackState {
        TrackState {
            cursor: 0,
            tuplet_stack: Vec::new(),
            velocity: DEFAULT_VELOCITY,
            slur_depth: 0,
            tablature_strings: None,
            pending_lyric: None,
            vocal_spans: Vec::new(),
        }
    }
}

/// Everything the evaluator threads through the walk
pub struct EvalContext {
    pub song: SongIR,
    pub meters: MeterMap,
    pub scopes: ScopeArena,
    pub phase: Phase,
    /// Index into `song.tracks` while in track phase
    pub current_track: Option<usize>,
    /// Parallel to `song.tracks`
    pub states: Vec<TrackState>,
    pub sounds: HashMap<String, SoundDef>,
    pub warnings: Vec<Diagnostic>,
    pub call_depth: u32,
    pub path: Option<String>,
}

impl EvalContext {
    pub fn new(scopes: ScopeArena, path: Option<&str>) -> EvalContext {
        EvalContext {
            song: SongIR::new(DEFAULT_PPQ),
            meters: MeterMap::new(DEFAULT_PPQ),
            scopes,
            phase: Phase::Global,
            current_track: None,
            states: Vec::new(),
            sounds: HashMap::new(),
            warnings: Vec::new(),
            call_depth: 0,
            path: path.map(String::from),
        }
    }

    pub fn ppq(&self) -> u32 {
        self.song.ppq
    }

    pub fn diag(&self, code: Code, message: impl Into<String>, span: Span) -> Diagnostic {
        let mut d = Diagnostic::error(code, message, span);
        if let Some(p) = &self.path {
            d = d.with_path(p.clone());
        }
        d
    }

    pub fn warn(&mut self, code: Code, message: impl Into<String>, span: Span) {
        let mut d = Diagnostic::warning(code, message, span);
        if let Some(p) = &self.path {
            d = d.with_path(p.clone());
        }
        self.warnings.push(d);
    }

    // --- phase discipline ---

    pub fn require_track(&self, what: &str, span: Span) -> Result<usize, Diagnostic> {
        match (self.phase, self.current_track) {
            (Phase::Track, Some(idx)) => Ok(idx),
            _ => Err(self.diag(
                Code::PhaseViolation,
                format!("`{}` is only available inside a track", what),
                span,
            )),
        }
    }

    pub fn require_global(&self, what: &str, span: Span) -> Result<(), Diagnostic> {
        match self.phase {
            Phase::Global => Ok(()),
            Phase::Track => Err(self.diag(
                Code::PhaseViolation,
                format!("`{}` mutates the song-global maps and cannot run inside a track", what),
                span,
            )),
        }
    }

    pub fn state(&mut self, what: &str, span: Span) -> Result<&mut TrackState, Diagnostic> {
        let idx = self.require_track(what, span)?;
        Ok(&mut self.states[idx])
    }

    pub fn is_vocal(&self) -> bool {
        matches!(
            self.current_track.map(|i| &self.song.tracks[i]),
            Some(Track::Vocal(_))
        )
    }

    // --- tick resolution ---

    /// Resolve a duration to ticks under the current track's tuplet stack
    pub fn resolve_dur(&self, dur: &Duration, span: Span) -> Result<u64, Diagnostic> {
        let empty: &[(u32, u32)] = &[];
        let tuplets = match self.current_track {
            Some(idx) => self.states[idx].tuplet_stack.as_slice(),
            None => empty,
        };
        dur.to_ticks(self.ppq(), tuplets).ok_or_else(|| {
            self.diag(
                Code::InvalidDuration,
                format!("duration {} resolves below one tick", dur),
                span,
            )
        })
    }

    /// Resolve a position against the meter map
    pub fn resolve_pos(&self, pos: Position, span: Span) -> Result<u64, Diagnostic> {
        self.meters.resolve(pos).map_err(|e| {
            let message = match e {
                PositionError::ZeroIndex => {
                    format!("position {} has a zero bar or beat (both are 1-based)", pos)
                }
                PositionError::BeatOutOfRange { beat, numerator } => format!(
                    "beat {} does not exist in a {}-beat bar",
                    beat, numerator
                ),
                PositionError::SubOutOfRange { sub, ticks_per_beat } => format!(
                    "sub-tick {} exceeds the beat length of {} ticks",
                    sub, ticks_per_beat
                ),
            };
            self.diag(Code::PositionOutOfRange, message, span)
        })
    }

    // --- event emission ---

    /// Append an event to the current track
    pub fn emit(&mut self, event: TrackEvent, span: Span) -> Result<(), Diagnostic> {
        let idx = self.require_track("event emission", span)?;
        self.song.tracks[idx].events_mut().push(event);
        Ok(())
    }

    /// Reject a vocal note overlapping an earlier one, then record it
    pub fn check_vocal_overlap(
        &mut self,
        tick: u64,
        dur: u64,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let idx = match self.current_track {
            Some(idx) if self.is_vocal() => idx,
            _ => return Ok(()),
        };
        let state = &self.states[idx];
        if let Some(&(start, end, first)) = state
            .vocal_spans
            .iter()
            .find(|(start, end, _)| tick < *end && *start < tick + dur)
        {
            return Err(self
                .diag(
                    Code::VocalOverlap,
                    format!(
                        "vocal note at tick {} overlaps the note occupying {}..{}",
                        tick, start, end
                    ),
                    span,
                )
                .with_label("this note overlaps")
                .with_related("earlier note emitted here", first));
        }
        self.states[idx].vocal_spans.push((tick, tick + dur, span));
        Ok(())
    }

    /// Emit one note at the cursor, applying articulation policy
    ///
    /// The articulation reshapes the *sounding* duration and velocity; the
    /// cursor always advances by the base duration when `advance` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_note(
        &mut self,
        tick: u64,
        base_ticks: u64,
        key: u8,
        vel: Option<i64>,
        articulation: Option<Articulation>,
        lyric: Option<String>,
        advance: bool,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let idx = self.require_track("note", span)?;

        let base_vel = match vel {
            Some(v) => {
                if !(1..=127).contains(&v) {
                    return Err(self.diag(
                        Code::PitchOutOfRange,
                        format!("velocity {} out of range 1..127", v),
                        span,
                    ));
                }
                v as i32
            }
            None => self.states[idx].velocity as i32,
        };
        let (sounding, vel_delta) = apply_articulation(base_ticks, articulation);
        let vel = (base_vel + vel_delta).clamp(1, 127) as u8;

        let lyric = if self.is_vocal() {
            match lyric.or_else(|| self.states[idx].pending_lyric.take()) {
                Some(text) => Some(text),
                None => {
                    return Err(self
                        .diag(Code::LyricRequired, "vocal note needs a lyric", span)
                        .with_help("attach one with `lyric(\"…\")` or use a phrase"));
                }
            }
        } else {
            lyric
        };

        self.check_vocal_overlap(tick, sounding, span)?;
        self.song.tracks[idx].events_mut().push(TrackEvent::Note {
            tick,
            dur: sounding,
            key,
            vel,
            lyric,
            articulation,
        });
        if advance {
            self.states[idx].cursor = tick + base_ticks;
        }
        Ok(())
    }
}

/// Articulation policy: sounding duration and velocity adjustment
///
/// | articulation | sounding duration      | velocity Δ |
/// |--------------|------------------------|------------|
/// | staccato     | max(1, ⌊base × 0.5⌋)   | 0          |
/// | legato       | base + ⌊base × 0.1⌋    | 0          |
/// | accent       | base                   | +20        |
/// | tenuto       | base                   | 0          |
/// | marcato      | ⌊base × 0.75⌋          | +25        |
pub fn apply_articulation(base: u64, articulation: Option<Articulation>) -> (u64, i32) {
    match articulation {
        None | Some(Articulation::Tenuto) => (base, 0),
        Some(Articulation::Staccato) => ((base / 2).max(1), 0),
        Some(Articulation::Legato) => (base + base / 10, 0),
        Some(Articulation::Accent) => (base, 20),
        Some(Articulation::Marcato) => (base * 3 / 4, 25),
    }
}

/// Parse an articulation name as used in note options
pub fn articulation_from_name(name: &str) -> Option<Articulation> {
    Some(match name {
        "staccato" => Articulation::Staccato,
        "legato" => Articulation::Legato,
        "accent" => Articulation::Accent,
        "tenuto" => Articulation::Tenuto,
        "marcato" => Articulation::Marcato,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::scope::ScopeArena;
    use crate::ir::MidiTrack;

    fn track_context() -> EvalContext {
        let (scopes, _) = ScopeArena::new();
        let mut ctx = EvalContext::new(scopes, None);
        ctx.song.tracks.push(Track::Midi(MidiTrack {
            id: "t1".to_string(),
            name: "T".to_string(),
            channel: 0,
            program: 0,
            default_vel: DEFAULT_VELOCITY,
            events: vec![],
        }));
        ctx.states.push(TrackState::new());
        ctx.current_track = Some(0);
        ctx.phase = Phase::Track;
        ctx
    }

    #[test]
    fn test_articulation_table() {
        assert_eq!(apply_articulation(480, Some(Articulation::Staccato)), (240, 0));
        assert_eq!(apply_articulation(480, Some(Articulation::Legato)), (528, 0));
        assert_eq!(apply_articulation(480, Some(Articulation::Accent)), (480, 20));
        assert_eq!(apply_articulation(480, Some(Articulation::Tenuto)), (480, 0));
        assert_eq!(apply_articulation(480, Some(Articulation::Marcato)), (360, 25));
        // staccato never collapses to zero
        assert_eq!(apply_articulation(1, Some(Articulation::Staccato)), (1, 0));
    }

    #[test]
    fn test_emit_note_advances_by_base_duration() {
        let mut ctx = track_context();
        ctx.emit_note(0, 480, 60, None, Some(Articulation::Staccato), None, true, Span::default())
            .unwrap();
        // sounding duration halves, cursor advances by the full base
        assert_eq!(ctx.states[0].cursor, 480);
        match &ctx.song.tracks[0].events()[0] {
            TrackEvent::Note { dur, vel, .. } => {
                assert_eq!(*dur, 240);
                assert_eq!(*vel, DEFAULT_VELOCITY);
            }
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn test_velocity_clamped() {
        let mut ctx = track_context();
        ctx.emit_note(0, 480, 60, Some(120), Some(Articulation::Marcato), None, true, Span::default())
            .unwrap();
        match &ctx.song.tracks[0].events()[0] {
            TrackEvent::Note { vel, .. } => assert_eq!(*vel, 127),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn test_phase_violation() {
        let (scopes, _) = ScopeArena::new();
        let ctx = EvalContext::new(scopes, None);
        let err = ctx.require_track("note", Span::default()).unwrap_err();
        assert_eq!(err.code, Code::PhaseViolation);
    }

    #[test]
    fn test_tuplet_stack_shrinks_durations() {
        let mut ctx = track_context();
        ctx.states[0].tuplet_stack.push((3, 2));
        let q = Duration::quarter();
        assert_eq!(ctx.resolve_dur(&q, Span::default()).unwrap(), 320);
    }
}
