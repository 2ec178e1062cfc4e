//! Notation built-ins: marks preserved in Song-IR but invisible to SMF

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::EvalContext;
use crate::eval::value::Value;
use crate::ir::TrackEvent;

pub fn register(registry: &mut Registry) {
    add(registry, "marker", 2, Some(2), PhaseReq::Track, marker);
    add(registry, "slurStart", 0, Some(0), PhaseReq::Track, slur_start);
    add(registry, "slurEnd", 0, Some(0), PhaseReq::Track, slur_end);
    add(registry, "crescendo", 1, Some(1), PhaseReq::Track, crescendo);
    add(registry, "diminuendo", 1, Some(1), PhaseReq::Track, diminuendo);
    add(registry, "dynamics", 1, Some(1), PhaseReq::Track, dynamics);
    add(registry, "notehead", 1, Some(1), PhaseReq::Track, notehead);
    add(registry, "tablature", 2, Some(2), PhaseReq::Track, tablature);
    add(registry, "tabNote", 3, Some(3), PhaseReq::Track, tab_note);
    add(registry, "fermata", 0, Some(0), PhaseReq::Track, fermata);
    add(registry, "breath", 0, Some(0), PhaseReq::Track, breath);
}

fn cursor(ctx: &mut EvalContext, what: &str, span: Span) -> Result<u64, Diagnostic> {
    let idx = ctx.require_track(what, span)?;
    Ok(ctx.states[idx].cursor)
}

fn marker(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let label = expect_str_value(ctx, args.remove(1), "marker label", span)?;
    let kind = expect_str_value(ctx, args.remove(0), "marker kind", span)?;
    let tick = cursor(ctx, "marker", span)?;
    ctx.emit(TrackEvent::Marker { tick, kind, label }, span)?;
    Ok(Value::Null)
}

fn slur_start(ctx: &mut EvalContext, _args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let tick = cursor(ctx, "slurStart", span)?;
    ctx.emit(TrackEvent::SlurStart { tick }, span)?;
    let state = ctx.state("slurStart", span)?;
    state.slur_depth += 1;
    Ok(Value::Null)
}

fn slur_end(ctx: &mut EvalContext, _args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let depth = ctx.state("slurEnd", span)?.slur_depth;
    if depth == 0 {
        return Err(ctx.diag(
            Code::PhaseViolation,
            "slurEnd without a matching slurStart",
            span,
        ));
    }
    ctx.state("slurEnd", span)?.slur_depth = depth - 1;
    let tick = cursor(ctx, "slurEnd", span)?;
    ctx.emit(TrackEvent::SlurEnd { tick }, span)?;
    Ok(Value::Null)
}

fn hairpin(
    ctx: &mut EvalContext,
    mut args: Vec<Value>,
    crescendo: bool,
    span: Span,
) -> Result<Value, Diagnostic> {
    let name = if crescendo { "crescendo" } else { "diminuendo" };
    let dur = expect_dur(ctx, args.remove(0), "hairpin length", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let tick = cursor(ctx, name, span)?;
    ctx.emit(TrackEvent::Hairpin { tick, end_tick: tick + ticks, crescendo }, span)?;
    Ok(Value::Null)
}

fn crescendo(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    hairpin(ctx, args, true, span)
}

fn diminuendo(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    hairpin(ctx, args, false, span)
}

fn dynamics(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let marking = expect_str_value(ctx, args.remove(0), "dynamics marking", span)?;
    if !matches!(
        marking.as_str(),
        "ppp" | "pp" | "p" | "mp" | "mf" | "f" | "ff" | "fff" | "sfz" | "fp"
    ) {
        return Err(ctx
            .diag(Code::BadArgument, format!("unknown dynamics marking `{}`", marking), span)
            .with_help("one of: ppp, pp, p, mp, mf, f, ff, fff, sfz, fp"));
    }
    let tick = cursor(ctx, "dynamics", span)?;
    ctx.emit(TrackEvent::Dynamics { tick, marking }, span)?;
    Ok(Value::Null)
}

fn notehead(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let shape = expect_str_value(ctx, args.remove(0), "notehead shape", span)?;
    let tick = cursor(ctx, "notehead", span)?;
    ctx.emit(TrackEvent::Notehead { tick, shape }, span)?;
    Ok(Value::Null)
}

fn tablature(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let tuning_values = expect_array(ctx, args.remove(1), "tablature tuning", span)?;
    let strings = expect_int(ctx, args.remove(0), "tablature string count", span)?;
    if !(1..=12).contains(&strings) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("tablature string count {} out of range 1..12", strings),
            span,
        ));
    }
    if tuning_values.len() != strings as usize {
        return Err(ctx.diag(
            Code::BadArgument,
            format!(
                "tablature tuning lists {} pitches for {} strings",
                tuning_values.len(),
                strings
            ),
            span,
        ));
    }
    let mut tuning = Vec::with_capacity(tuning_values.len());
    for value in tuning_values {
        tuning.push(expect_pitch(ctx, value, "tablature tuning pitch", span)?.key());
    }
    let tick = cursor(ctx, "tablature", span)?;
    ctx.emit(TrackEvent::Tablature { tick, strings: strings as u32, tuning }, span)?;
    let state = ctx.state("tablature", span)?;
    state.tablature_strings = Some(strings as u32);
    Ok(Value::Null)
}

fn tab_note(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let string = expect_int(ctx, args.next().expect("arity checked"), "tab string", span)?;
    let fret = expect_int(ctx, args.next().expect("arity checked"), "tab fret", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "tab duration", span)?;

    let idx = ctx.require_track("tabNote", span)?;
    let strings = ctx.states[idx].tablature_strings.ok_or_else(|| {
        ctx.diag(Code::PhaseViolation, "tabNote before tablature was declared", span)
            .with_help("declare strings and tuning first, e.g. `tablature(6, [E2, A2, D3, G3, B3, E4]);`")
    })?;
    if string < 1 || string as u32 > strings {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("tab string {} out of range 1..{}", string, strings),
            span,
        ));
    }
    if !(0..=30).contains(&fret) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("tab fret {} out of range 0..30", fret),
            span,
        ));
    }
    let ticks = ctx.resolve_dur(&dur, span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::TabNote { tick, string: string as u32, fret: fret as u32 }, span)?;
    ctx.states[idx].cursor = tick + ticks;
    Ok(Value::Null)
}

fn fermata(ctx: &mut EvalContext, _args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let tick = cursor(ctx, "fermata", span)?;
    ctx.emit(TrackEvent::Fermata { tick }, span)?;
    Ok(Value::Null)
}

fn breath(ctx: &mut EvalContext, _args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let tick = cursor(ctx, "breath", span)?;
    ctx.emit(TrackEvent::Breath { tick }, span)?;
    Ok(Value::Null)
}
