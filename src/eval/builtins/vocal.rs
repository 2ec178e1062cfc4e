//! Vocal built-ins: phrases, lyrics, and synthesis parameter curves

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::EvalContext;
use crate::eval::value::Value;
use crate::ir::{CurvePoint, ParamCurve, Phrase, PhraseNote, Track, TrackEvent, VocaloidParams};

/// Lyric token that stretches the previous syllable over this note
const MELISMA: &str = "-";

pub fn register(registry: &mut Registry) {
    add(registry, "phrase", 2, Some(2), PhaseReq::Vocal, phrase);
    add(registry, "lyric", 1, Some(1), PhaseReq::Vocal, lyric);
    add(registry, "vibrato", 1, Some(3), PhaseReq::Vocal, vibrato);
    add(registry, "dynamicsCurve", 1, Some(1), PhaseReq::Vocal, dynamics_curve);
    add(registry, "growl", 1, Some(1), PhaseReq::Vocal, growl);
    add(registry, "breathiness", 1, Some(1), PhaseReq::Vocal, breathiness);
    add(registry, "brightness", 1, Some(1), PhaseReq::Vocal, brightness);
}

struct ParsedNote {
    key: u8,
    ticks: u64,
    continuation: bool,
}

/// A phrase: pitched durations aligned to a lyric list
///
/// Each note entry is `[pitch, dur]` or `[pitch, dur, true]`, the flag
/// marking a tied continuation of the previous note. Lyrics align
/// one-to-one with non-continuation notes; the `-` token is a melisma
/// stretching the previous syllable. A count mismatch warns (`W001`)
/// without failing the phrase.
fn phrase(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let lyric_values = expect_array(ctx, args.remove(1), "phrase lyrics", span)?;
    let note_values = expect_array(ctx, args.remove(0), "phrase notes", span)?;
    if note_values.is_empty() {
        return Err(ctx.diag(Code::BadArgument, "phrase needs at least one note", span));
    }

    let mut lyrics = Vec::with_capacity(lyric_values.len());
    for value in lyric_values {
        lyrics.push(expect_str_value(ctx, value, "phrase lyric", span)?);
    }

    let mut parsed: Vec<ParsedNote> = Vec::with_capacity(note_values.len());
    for value in note_values {
        let entry = expect_array(ctx, value, "phrase note entry", span)?;
        if !(2..=3).contains(&entry.len()) {
            return Err(ctx.diag(
                Code::BadArgument,
                "phrase note entries are [pitch, dur] or [pitch, dur, true]",
                span,
            ));
        }
        let mut entry = entry.into_iter();
        let pitch = expect_pitch(ctx, entry.next().expect("length checked"), "phrase pitch", span)?;
        let dur = expect_dur(ctx, entry.next().expect("length checked"), "phrase duration", span)?;
        let continuation = match entry.next() {
            None => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!("phrase tie flag must be a bool, found {}", other.kind_name()),
                    span,
                ));
            }
        };
        if continuation {
            match parsed.last() {
                Some(prev) if prev.key == pitch.key() => {}
                _ => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        "a tied continuation must repeat the previous pitch",
                        span,
                    ));
                }
            }
        }
        let ticks = ctx.resolve_dur(&dur, span)?;
        parsed.push(ParsedNote { key: pitch.key(), ticks, continuation });
    }

    let plain_count = parsed.iter().filter(|n| !n.continuation).count();
    if plain_count != lyrics.len() {
        ctx.warn(
            Code::LyricCountMismatch,
            format!(
                "phrase has {} singable note(s) but {} lyric token(s)",
                plain_count,
                lyrics.len()
            ),
            span,
        );
    }

    let idx = ctx.require_track("phrase", span)?;
    let vel = ctx.states[idx].velocity;
    let phrase_start = ctx.states[idx].cursor;
    let mut tick = phrase_start;
    let mut lyric_iter = lyrics.into_iter();
    let mut notes = Vec::with_capacity(parsed.len());

    for note in &parsed {
        let (lyric, extend) = if note.continuation {
            (None, false)
        } else {
            match lyric_iter.next() {
                Some(token) if token == MELISMA => (None, true),
                Some(token) => (Some(token), false),
                None => (None, false),
            }
        };
        ctx.check_vocal_overlap(tick, note.ticks, span)?;
        notes.push(PhraseNote {
            tick,
            dur: note.ticks,
            key: note.key,
            vel,
            lyric: lyric.clone(),
            continuation: note.continuation,
            extend,
        });
        ctx.song.tracks[idx].events_mut().push(TrackEvent::Note {
            tick,
            dur: note.ticks,
            key: note.key,
            vel,
            lyric,
            articulation: None,
        });
        tick += note.ticks;
    }
    ctx.states[idx].cursor = tick;

    match &mut ctx.song.tracks[idx] {
        Track::Vocal(track) => track.phrases.push(Phrase { tick: phrase_start, notes }),
        Track::Midi(_) => unreachable!("phrase is registered vocal-only"),
    }
    Ok(Value::Null)
}

fn lyric(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let text = expect_str_value(ctx, args.remove(0), "lyric", span)?;
    let state = ctx.state("lyric", span)?;
    state.pending_lyric = Some(text);
    Ok(Value::Null)
}

fn vibrato(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "vibrato duration", span)?;
    let depth = match args.next() {
        Some(v) => expect_number(ctx, v, "vibrato depth", span)?,
        None => 0.5,
    };
    let rate = match args.next() {
        Some(v) => expect_number(ctx, v, "vibrato rate", span)?,
        None => 5.5,
    };
    if !(0.0..=1.0).contains(&depth) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("vibrato depth {} out of range 0..1", depth),
            span,
        ));
    }
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("vibrato", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::Vibrato { tick, dur: ticks, depth, rate }, span)?;
    Ok(Value::Null)
}

/// Append a point to a named synthesis curve on the current vocal track
fn add_curve_point(
    ctx: &mut EvalContext,
    param: &str,
    tick: u64,
    value: f64,
    span: Span,
) -> Result<(), Diagnostic> {
    let idx = ctx.require_track(param, span)?;
    match &mut ctx.song.tracks[idx] {
        Track::Vocal(track) => {
            let params = track.vocaloid_params.get_or_insert_with(VocaloidParams::default);
            let curve = match params.curves.iter_mut().find(|c| c.param == param) {
                Some(curve) => curve,
                None => {
                    params.curves.push(ParamCurve { param: param.to_string(), points: Vec::new() });
                    params.curves.last_mut().expect("just pushed")
                }
            };
            curve.points.push(CurvePoint { tick, value });
            Ok(())
        }
        Track::Midi(_) => unreachable!("vocal builtins are registered vocal-only"),
    }
}

fn dynamics_curve(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let points = expect_array(ctx, args.remove(0), "dynamicsCurve points", span)?;
    for point in points {
        let entry = expect_array(ctx, point, "dynamicsCurve point", span)?;
        if entry.len() != 2 {
            return Err(ctx.diag(
                Code::BadArgument,
                "dynamicsCurve points are [position, value] pairs",
                span,
            ));
        }
        let mut entry = entry.into_iter();
        let tick = match entry.next().expect("length checked") {
            Value::Int(t) if t >= 0 => t as u64,
            Value::Time(pos) => ctx.resolve_pos(pos, span)?,
            other => {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!("curve point position must be a position or tick, found {}", other.kind_name()),
                    span,
                ));
            }
        };
        let value = expect_number(ctx, entry.next().expect("length checked"), "curve value", span)?;
        curve_value_in_range(ctx, value, span)?;
        add_curve_point(ctx, "dynamics", tick, value, span)?;
    }
    Ok(Value::Null)
}

fn curve_value_in_range(ctx: &EvalContext, value: f64, span: Span) -> Result<(), Diagnostic> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("curve value {} out of range 0..1", value),
            span,
        ));
    }
    Ok(())
}

fn single_point(
    ctx: &mut EvalContext,
    param: &'static str,
    mut args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    let value = expect_number(ctx, args.remove(0), param, span)?;
    curve_value_in_range(ctx, value, span)?;
    let idx = ctx.require_track(param, span)?;
    let tick = ctx.states[idx].cursor;
    add_curve_point(ctx, param, tick, value, span)?;
    Ok(Value::Null)
}

fn growl(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    single_point(ctx, "growl", args, span)
}

fn breathiness(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    single_point(ctx, "breathiness", args, span)
}

fn brightness(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    single_point(ctx, "brightness", args, span)
}
