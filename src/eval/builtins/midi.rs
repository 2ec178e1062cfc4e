//! Track-mutating MIDI built-ins and the song-map (global) built-ins

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::EvalContext;
use crate::ir::{TempoEvent, TimeSigEvent, Track, TrackEvent};
use crate::eval::value::Value;

pub fn register(registry: &mut Registry) {
    add(registry, "note", 2, Some(3), PhaseReq::Track, note);
    add(registry, "noteAt", 3, Some(4), PhaseReq::Track, note_at);
    add(registry, "chord", 2, Some(3), PhaseReq::Track, chord);
    add(registry, "rest", 1, Some(1), PhaseReq::Track, rest);
    add(registry, "at", 1, Some(1), PhaseReq::Track, at);
    add(registry, "atTick", 1, Some(1), PhaseReq::Track, at_tick);
    add(registry, "cc", 2, Some(2), PhaseReq::Track, cc);
    add(registry, "pitchBend", 1, Some(1), PhaseReq::Track, pitch_bend);
    add(registry, "program", 1, Some(1), PhaseReq::Track, program);
    add(registry, "velocity", 1, Some(1), PhaseReq::Track, velocity);
    add(registry, "channel", 1, Some(1), PhaseReq::Track, channel);
    add(registry, "transpose", 2, Some(2), PhaseReq::Any, transpose);
    add(registry, "hit", 2, Some(3), PhaseReq::Track, hit);
    add(registry, "drum", 2, Some(3), PhaseReq::Track, drum);
    add(registry, "arp", 3, Some(4), PhaseReq::Track, arp);
    add(registry, "automation", 4, Some(5), PhaseReq::Track, automation);

    add(registry, "tempo", 2, Some(2), PhaseReq::Global, tempo);
    add(registry, "meter", 3, Some(3), PhaseReq::Global, meter);
    add(registry, "title", 1, Some(1), PhaseReq::Global, title);
    add(registry, "ppq", 1, Some(1), PhaseReq::Global, ppq);
}

fn note(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(2), span)?;
    let mut args = args.into_iter();
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "note pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "note duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("note", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit_note(tick, ticks, pitch.key(), opts.vel, opts.articulation, opts.lyric, true, span)?;
    Ok(Value::Null)
}

fn note_at(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(3), span)?;
    let mut args = args.into_iter();
    let tick = expect_int(ctx, args.next().expect("arity checked"), "noteAt tick", span)?;
    if tick < 0 {
        return Err(ctx.diag(Code::BadArgument, "noteAt tick cannot be negative", span));
    }
    let pitch = expect_pitch(ctx, args.next().expect("arity checked"), "noteAt pitch", span)?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "noteAt duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    // emits in place: the cursor does not move
    ctx.emit_note(tick as u64, ticks, pitch.key(), opts.vel, opts.articulation, opts.lyric, false, span)?;
    Ok(Value::Null)
}

fn chord(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(2), span)?;
    let mut args = args.into_iter();
    let pitches = expect_array(ctx, args.next().expect("arity checked"), "chord pitches", span)?;
    if pitches.is_empty() {
        return Err(ctx.diag(Code::BadArgument, "chord needs at least one pitch", span));
    }
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "chord duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("chord", span)?;
    let tick = ctx.states[idx].cursor;
    for value in pitches {
        let pitch = expect_pitch(ctx, value, "chord pitch", span)?;
        ctx.emit_note(
            tick,
            ticks,
            pitch.key(),
            opts.vel,
            opts.articulation,
            opts.lyric.clone(),
            false,
            span,
        )?;
    }
    ctx.states[idx].cursor = tick + ticks;
    Ok(Value::Null)
}

fn rest(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let dur = expect_dur(ctx, args.remove(0), "rest duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("rest", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::Rest { tick, dur: ticks }, span)?;
    ctx.states[idx].cursor = tick + ticks;
    Ok(Value::Null)
}

fn at(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let pos = expect_time(ctx, args.remove(0), "at position", span)?;
    let tick = ctx.resolve_pos(pos, span)?;
    let idx = ctx.require_track("at", span)?;
    ctx.states[idx].cursor = tick;
    Ok(Value::Null)
}

fn at_tick(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let tick = expect_int(ctx, args.remove(0), "atTick tick", span)?;
    if tick < 0 {
        return Err(ctx.diag(Code::BadArgument, "atTick tick cannot be negative", span));
    }
    let idx = ctx.require_track("atTick", span)?;
    ctx.states[idx].cursor = tick as u64;
    Ok(Value::Null)
}

fn cc(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_data_byte(ctx, args.remove(1), "controller value", span)?;
    let controller = expect_data_byte(ctx, args.remove(0), "controller number", span)?;
    let idx = ctx.require_track("cc", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::Cc { tick, controller, value }, span)?;
    Ok(Value::Null)
}

fn pitch_bend(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_int(ctx, args.remove(0), "pitch bend value", span)?;
    if !(-8192..=8191).contains(&value) {
        return Err(ctx.diag(
            Code::ControllerOutOfRange,
            format!("pitch bend {} out of range -8192..8191", value),
            span,
        ));
    }
    let idx = ctx.require_track("pitchBend", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::PitchBend { tick, value: value as i16 }, span)?;
    Ok(Value::Null)
}

fn program(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_data_byte(ctx, args.remove(0), "program", span)?;
    let idx = ctx.require_track("program", span)?;
    match &mut ctx.song.tracks[idx] {
        Track::Midi(track) => {
            track.program = value;
            Ok(Value::Null)
        }
        Track::Vocal(_) => Err(ctx.diag(
            Code::PhaseViolation,
            "`program` applies to MIDI tracks only",
            span,
        )),
    }
}

fn velocity(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_int(ctx, args.remove(0), "velocity", span)?;
    if !(1..=127).contains(&value) {
        return Err(ctx.diag(
            Code::PitchOutOfRange,
            format!("velocity {} out of range 1..127", value),
            span,
        ));
    }
    let state = ctx.state("velocity", span)?;
    state.velocity = value as u8;
    Ok(Value::Null)
}

fn channel(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_int(ctx, args.remove(0), "channel", span)?;
    if !(0..=15).contains(&value) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("channel {} out of range 0..15", value),
            span,
        ));
    }
    let idx = ctx.require_track("channel", span)?;
    match &mut ctx.song.tracks[idx] {
        Track::Midi(track) => {
            track.channel = value as u8;
            Ok(Value::Null)
        }
        Track::Vocal(_) => Err(ctx.diag(
            Code::PhaseViolation,
            "`channel` applies to MIDI tracks only",
            span,
        )),
    }
}

fn transpose(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let amount = expect_int(ctx, args.remove(1), "transpose amount", span)?;
    let pitch = expect_pitch(ctx, args.remove(0), "transpose pitch", span)?;
    pitch
        .transpose(amount as i32)
        .map(Value::Pitch)
        .ok_or_else(|| {
            ctx.diag(
                Code::PitchOutOfRange,
                format!("pitch {} out of range 0..127", pitch.key() as i64 + amount),
                span,
            )
        })
}

fn hit(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(2), span)?;
    let mut args = args.into_iter();
    let key = expect_pitch(ctx, args.next().expect("arity checked"), "hit key", span)?.key();
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "hit duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("hit", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit_note(tick, ticks, key, opts.vel, opts.articulation, None, true, span)?;
    Ok(Value::Null)
}

/// General MIDI percussion map (channel 10)
pub fn drum_key(name: &str) -> Option<u8> {
    Some(match name {
        "kick" | "bass" => 36,
        "kick2" => 35,
        "rimshot" => 37,
        "snare" => 38,
        "clap" => 39,
        "snare2" => 40,
        "lowTom2" => 41,
        "hihatClosed" | "hihat" => 42,
        "lowTom" => 43,
        "hihatPedal" => 44,
        "midTom2" => 45,
        "hihatOpen" => 46,
        "midTom" => 47,
        "highTom2" => 48,
        "crash" => 49,
        "highTom" => 50,
        "ride" => 51,
        "china" => 52,
        "rideBell" => 53,
        "tambourine" => 54,
        "splash" => 55,
        "cowbell" => 56,
        "crash2" => 57,
        "vibraslap" => 58,
        "ride2" => 59,
        "bongoHigh" => 60,
        "bongoLow" => 61,
        "congaMute" => 62,
        "congaHigh" => 63,
        "congaLow" => 64,
        "timbaleHigh" => 65,
        "timbaleLow" => 66,
        "agogoHigh" => 67,
        "agogoLow" => 68,
        "cabasa" => 69,
        "maracas" => 70,
        "whistleShort" => 71,
        "whistleLong" => 72,
        "guiroShort" => 73,
        "guiroLong" => 74,
        "claves" => 75,
        "woodblockHigh" => 76,
        "woodblockLow" => 77,
        "cuicaMute" => 78,
        "cuicaOpen" => 79,
        "triangleMute" => 80,
        "triangleOpen" => 81,
        _ => return None,
    })
}

fn drum(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(2), span)?;
    let mut args = args.into_iter();
    let name = expect_str_value(ctx, args.next().expect("arity checked"), "drum name", span)?;
    let key = drum_key(&name).ok_or_else(|| {
        ctx.diag(Code::BadArgument, format!("unknown drum `{}`", name), span)
            .with_help("names follow the General MIDI percussion map, e.g. kick, snare, hihatClosed")
    })?;
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "drum duration", span)?;
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("drum", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit_note(tick, ticks, key, opts.vel, opts.articulation, None, true, span)?;
    Ok(Value::Null)
}

fn arp(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let opts = parse_note_opts(ctx, args.get(3), span)?;
    let mut args = args.into_iter();
    let pitches = expect_array(ctx, args.next().expect("arity checked"), "arp pitches", span)?;
    if pitches.is_empty() {
        return Err(ctx.diag(Code::BadArgument, "arp needs at least one pitch", span));
    }
    let dur = expect_dur(ctx, args.next().expect("arity checked"), "arp note duration", span)?;
    let dir = expect_str_value(ctx, args.next().expect("arity checked"), "arp direction", span)?;

    let mut keys = Vec::with_capacity(pitches.len());
    for value in pitches {
        keys.push(expect_pitch(ctx, value, "arp pitch", span)?.key());
    }
    let keys: Vec<u8> = match dir.as_str() {
        "up" => keys,
        "down" => keys.into_iter().rev().collect(),
        "updown" => {
            let mut out = keys.clone();
            out.extend(keys.into_iter().rev().skip(1));
            out
        }
        other => {
            return Err(ctx
                .diag(Code::BadArgument, format!("unknown arp direction `{}`", other), span)
                .with_help("one of: up, down, updown"));
        }
    };

    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("arp", span)?;
    let mut tick = ctx.states[idx].cursor;
    for key in keys {
        ctx.emit_note(tick, ticks, key, opts.vel, opts.articulation, None, false, span)?;
        tick += ticks;
    }
    ctx.states[idx].cursor = tick;
    Ok(Value::Null)
}

fn automation(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let param = expect_str_value(ctx, args.next().expect("arity checked"), "automation parameter", span)?;
    let from = expect_number(ctx, args.next().expect("arity checked"), "automation start value", span)?;
    let to = expect_number(ctx, args.next().expect("arity checked"), "automation end value", span)?;
    let curve = expect_str_value(ctx, args.next().expect("arity checked"), "automation curve", span)?;
    if !matches!(curve.as_str(), "linear" | "ease" | "hold") {
        return Err(ctx
            .diag(Code::BadArgument, format!("unknown automation curve `{}`", curve), span)
            .with_help("one of: linear, ease, hold"));
    }
    // optional span; defaults to one whole note from the cursor
    let dur = match args.next() {
        Some(v) => expect_dur(ctx, v, "automation span", span)?,
        None => crate::models::Duration::fraction(1, 1, 0).expect("static literal"),
    };
    let ticks = ctx.resolve_dur(&dur, span)?;
    let idx = ctx.require_track("automation", span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(
        TrackEvent::Automation { tick, end_tick: tick + ticks, param, from, to, curve },
        span,
    )?;
    Ok(Value::Null)
}

// --- song-map built-ins (global phase) ---

fn tempo(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let bpm = match args.remove(1) {
        Value::Int(v) if v > 0 => v as f64,
        Value::Float(v) if v > 0.0 => v,
        other => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("tempo must be a positive number, found {}", other.to_display_string()),
                span,
            ));
        }
    };
    let tick = match args.remove(0) {
        Value::Int(tick) if tick >= 0 => tick as u64,
        Value::Time(pos) => ctx.resolve_pos(pos, span)?,
        other => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("tempo position must be a position or tick, found {}", other.kind_name()),
                span,
            ));
        }
    };
    ctx.song.tempos.push(TempoEvent { tick, bpm });
    Ok(Value::Null)
}

fn meter(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let pos = expect_time(ctx, args.next().expect("arity checked"), "meter position", span)?;
    let numerator = expect_int(ctx, args.next().expect("arity checked"), "meter numerator", span)?;
    let denominator = expect_int(ctx, args.next().expect("arity checked"), "meter denominator", span)?;
    if pos.beat != 1 || pos.sub != 0 {
        return Err(ctx.diag(
            Code::PositionOutOfRange,
            format!("meter change at {} is not on a bar boundary", pos),
            span,
        ));
    }
    if numerator < 1 || numerator > 64 {
        return Err(ctx.diag(
            Code::BadTimeSignature,
            format!("meter numerator {} out of range 1..64", numerator),
            span,
        ));
    }
    if !crate::models::duration::LEGAL_DENOMINATORS.contains(&(denominator as u32)) {
        return Err(ctx.diag(
            Code::BadTimeSignature,
            format!("meter denominator {} is not a power of two up to 64", denominator),
            span,
        ));
    }
    ctx.meters.set(pos.bar, numerator as u32, denominator as u32);
    let tick = ctx.meters.bar_start_tick(pos.bar);
    ctx.song.time_sigs.push(TimeSigEvent {
        tick,
        numerator: numerator as u32,
        denominator: denominator as u32,
    });
    Ok(Value::Null)
}

fn title(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let text = expect_str_value(ctx, args.remove(0), "title", span)?;
    ctx.song.title = Some(text);
    Ok(Value::Null)
}

fn ppq(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = expect_int(ctx, args.remove(0), "ppq", span)?;
    if value < 1 || value > u16::MAX as i64 {
        return Err(ctx.diag(
            Code::InvalidPpq,
            format!("ppq must be in 1..{}, found {}", u16::MAX, value),
            span,
        ));
    }
    ctx.song.ppq = value as u32;
    ctx.meters = ctx.meters.clone_with_ppq(value as u32);
    Ok(Value::Null)
}
