//! Ornament built-ins
//!
//! Every ornament expands into plain note events at evaluation time and
//! advances the cursor by the *base* duration, so downstream backends see
//! nothing but notes. The written unit for the fast notes is the 32nd
//! (`PPQ / 8` ticks).

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::EvalContext;
use crate::eval::value::Value;
use crate::models::Pitch;

pub fn register(registry: &mut Registry) {
    add(registry, "trill", 2, Some(3), PhaseReq::Track, trill);
    add(registry, "mordent", 2, Some(3), PhaseReq::Track, mordent);
    add(registry, "turn", 2, Some(2), PhaseReq::Track, turn);
    add(registry, "arpeggio", 2, Some(3), PhaseReq::Track, arpeggio);
    add(registry, "glissando", 3, Some(3), PhaseReq::Track, glissando);
    add(registry, "tremolo", 2, Some(3), PhaseReq::Track, tremolo);
    add(registry, "grace", 3, Some(3), PhaseReq::Track, grace);
}

/// One 32nd note in ticks
fn step_ticks(ctx: &EvalContext) -> u64 {
    (ctx.ppq() / 8).max(1) as u64
}

fn transposed(ctx: &EvalContext, pitch: Pitch, semitones: i64, span: Span) -> Result<u8, Diagnostic> {
    pitch
        .transpose(semitones as i32)
        .map(|p| p.key())
        .ok_or_else(|| {
            ctx.diag(
                Code::PitchOutOfRange,
                format!("pitch {} out of range 0..127", pitch.key() as i64 + semitones),
                span,
            )
        })
}

/// Alternates the main note and its upper auxiliary in 32nds across the
/// base duration; the last note is clipped to the boundary
fn trill(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "trill pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "trill duration", span)?;
    let interval = match args.next() {
        Some(v) => expect_int(ctx, v, "trill interval", span)?,
        None => 2,
    };
    let main = pitch.key();
    let aux = transposed(ctx, pitch, interval, span)?;

    let base = ctx.resolve_dur(&dur, span)?;
    let step = step_ticks(ctx);
    let idx = ctx.require_track("trill", span)?;
    let start = ctx.states[idx].cursor;

    let mut offset = 0u64;
    let mut upper = false;
    while offset < base {
        let note_dur = step.min(base - offset);
        let key = if upper { aux } else { main };
        ctx.emit_note(start + offset, note_dur, key, None, None, None, false, span)?;
        offset += note_dur;
        upper = !upper;
    }
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// `[main, aux, main]`: two 32nds then the remainder
fn mordent(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "mordent pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "mordent duration", span)?;
    let upper = match args.next() {
        Some(Value::Bool(b)) => b,
        None => true,
        Some(other) => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("mordent direction must be a bool, found {}", other.kind_name()),
                span,
            ));
        }
    };
    let main = pitch.key();
    let aux = transposed(ctx, pitch, if upper { 2 } else { -2 }, span)?;

    let base = ctx.resolve_dur(&dur, span)?;
    let step = step_ticks(ctx);
    if base <= 2 * step {
        return Err(ctx.diag(
            Code::InvalidDuration,
            "mordent needs a duration longer than two 32nd notes",
            span,
        ));
    }
    let idx = ctx.require_track("mordent", span)?;
    let start = ctx.states[idx].cursor;
    ctx.emit_note(start, step, main, None, None, None, false, span)?;
    ctx.emit_note(start + step, step, aux, None, None, None, false, span)?;
    ctx.emit_note(start + 2 * step, base - 2 * step, main, None, None, None, false, span)?;
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// `[upper, main, lower, main]` in four equal parts
fn turn(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "turn pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "turn duration", span)?;
    let main = pitch.key();
    let upper = transposed(ctx, pitch, 2, span)?;
    let lower = transposed(ctx, pitch, -2, span)?;

    let base = ctx.resolve_dur(&dur, span)?;
    let quarter = base / 4;
    if quarter == 0 {
        return Err(ctx.diag(
            Code::InvalidDuration,
            "turn needs a duration of at least four ticks",
            span,
        ));
    }
    let idx = ctx.require_track("turn", span)?;
    let start = ctx.states[idx].cursor;
    let keys = [upper, main, lower, main];
    for (i, key) in keys.iter().enumerate() {
        let offset = quarter * i as u64;
        // the final part absorbs the rounding remainder
        let note_dur = if i == 3 { base - offset } else { quarter };
        ctx.emit_note(start + offset, note_dur, *key, None, None, None, false, span)?;
    }
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// Chord tones enter one by one, offset by the spread, each held to the
/// end of the base duration
fn arpeggio(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pitches = expect_array(ctx, args.next().expect("arity checked"), "arpeggio pitches", span)?;
    if pitches.is_empty() {
        return Err(ctx.diag(Code::BadArgument, "arpeggio needs at least one pitch", span));
    }
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "arpeggio duration", span)?;
    let spread = match args.next() {
        Some(v) => {
            let v = expect_int(ctx, v, "arpeggio spread", span)?;
            if v < 1 {
                return Err(ctx.diag(Code::BadArgument, "arpeggio spread must be positive", span));
            }
            v as u64
        }
        None => step_ticks(ctx),
    };

    let base = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("arpeggio", span)?;
    let start = ctx.states[idx].cursor;
    for (i, value) in pitches.into_iter().enumerate() {
        let key = expect_pitch(ctx, value, "arpeggio pitch", span)?.key();
        let offset = spread * i as u64;
        if offset >= base {
            return Err(ctx.diag(
                Code::InvalidDuration,
                "arpeggio spread leaves no room for every chord tone",
                span,
            ));
        }
        ctx.emit_note(start + offset, base - offset, key, None, None, None, false, span)?;
    }
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// One note per chromatic semitone from start to end
fn glissando(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let from = expect_pitch(ctx, args.next().expect("arity checked"), "glissando start", span)?;
    let to = expect_pitch(ctx, args.next().expect("arity checked"), "glissando end", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "glissando duration", span)?;

    let base = ctx.resolve_dur(&dur, span)?;
    let count = (from.key() as i64 - to.key() as i64).unsigned_abs() + 1;
    let note_dur = base / count;
    if note_dur == 0 {
        return Err(ctx.diag(
            Code::InvalidDuration,
            format!("glissando over {} semitones does not fit the duration", count),
            span,
        ));
    }
    let idx = ctx.require_track("glissando", span)?;
    let start = ctx.states[idx].cursor;
    let ascending = to.key() >= from.key();
    for i in 0..count {
        let key = if ascending {
            from.key() + i as u8
        } else {
            from.key() - i as u8
        };
        ctx.emit_note(start + note_dur * i, note_dur, key, None, None, None, false, span)?;
    }
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// Repeats the main note at `PPQ × 4 / speed` intervals across the base
fn tremolo(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "tremolo pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "tremolo duration", span)?;
    let speed = match args.next() {
        Some(v) => {
            let v = expect_int(ctx, v, "tremolo speed", span)?;
            if !(1..=64).contains(&v) {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!("tremolo speed {} out of range 1..64", v),
                    span,
                ));
            }
            v as u64
        }
        None => 16,
    };

    let base = ctx.resolve_dur(&dur, span)?;
    let interval = ((ctx.ppq() as u64 * 4) / speed).max(1);
    let idx = ctx.require_track("tremolo", span)?;
    let start = ctx.states[idx].cursor;
    let mut offset = 0u64;
    while offset < base {
        let note_dur = interval.min(base - offset);
        ctx.emit_note(start + offset, note_dur, pitch.key(), None, None, None, false, span)?;
        offset += interval;
    }
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}

/// A short grace note stealing one 32nd from the main note
fn grace(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let grace_pitch = expect_pitch(ctx, args.next().expect("arity checked"), "grace pitch", span)?;
    let main_pitch = expect_pitch(ctx, args.next().expect("arity checked"), "main pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "grace duration", span)?;

    let base = ctx.resolve_dur(&dur, span)?;
    let step = step_ticks(ctx);
    if base <= step {
        return Err(ctx.diag(
            Code::InvalidDuration,
            "grace needs a duration longer than one 32nd note",
            span,
        ));
    }
    let idx = ctx.require_track("grace", span)?;
    let start = ctx.states[idx].cursor;
    ctx.emit_note(start, step, grace_pitch.key(), None, None, None, false, span)?;
    ctx.emit_note(start + step, base - step, main_pitch.key(), None, None, None, false, span)?;
    ctx.states[idx].cursor = start + base;
    Ok(Value::Null)
}
