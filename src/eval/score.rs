//! Score and track evaluation
//!
//! A `score { … }` expression populates the song under construction. Meta
//! and meter items are processed first so the PPQ and meter map are fixed
//! before any position resolves to ticks; tempo, sound, track, and marker
//! items then run in declaration order. Opening a track switches the
//! context into track phase for the duration of its body.

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::{expect_dur, expect_str_value, expect_time};
use crate::eval::context::{EvalContext, Phase, SoundDef, TrackState, DEFAULT_VELOCITY};
use crate::eval::exec::{call_value, eval_expr, exec_stmt};
use crate::eval::scope::ScopeId;
use crate::eval::value::Value;
use crate::ir::{MidiTrack, SongMarker, TempoEvent, Track, VocalTrack};
use crate::parse::ast::*;

/// Tempo assumed before the first declaration, used as ramp baseline
const FALLBACK_BPM: f64 = 120.0;

pub fn eval_score(
    ctx: &mut EvalContext,
    items: &[ScoreItem],
    scope: ScopeId,
    span: Span,
) -> Result<Value, Diagnostic> {
    ctx.require_global("score", span)?;

    // Fix ppq and the meter map before anything resolves positions.
    for item in items {
        if let ScoreItemKind::Meta(fields) = &item.kind {
            eval_meta(ctx, fields, scope)?;
        }
    }
    // keep any meters declared by earlier global `meter()` calls
    ctx.meters = ctx.meters.clone_with_ppq(ctx.ppq());
    for item in items {
        if let ScoreItemKind::Meter(specs) = &item.kind {
            for spec in specs {
                eval_meter_spec(ctx, spec, scope)?;
            }
        }
    }
    for (tick, numerator, denominator) in ctx.meters.changes() {
        ctx.song.time_sigs.push(crate::ir::TimeSigEvent { tick, numerator, denominator });
    }

    for item in items {
        match &item.kind {
            ScoreItemKind::Meta(_) | ScoreItemKind::Meter(_) => {}
            ScoreItemKind::Tempo(specs) => {
                for spec in specs {
                    eval_tempo_spec(ctx, spec, scope)?;
                }
            }
            ScoreItemKind::Sound { id, kind, fields } => {
                eval_sound(ctx, id, kind, fields, scope, item.span)?;
            }
            ScoreItemKind::Track { name, role, sound, body } => {
                eval_track(ctx, name, role, sound, body, scope, item.span)?;
            }
            ScoreItemKind::Marker { args } => {
                eval_score_marker(ctx, args, scope, item.span)?;
            }
        }
    }

    log::debug!(
        "score evaluated: {} track(s), {} tempo event(s)",
        ctx.song.tracks.len(),
        ctx.song.tempos.len()
    );
    Ok(Value::Null)
}

fn eval_meta(
    ctx: &mut EvalContext,
    fields: &[(String, Expr)],
    scope: ScopeId,
) -> Result<(), Diagnostic> {
    for (key, expr) in fields {
        let value = eval_expr(ctx, expr, scope)?;
        match key.as_str() {
            "title" => {
                ctx.song.title = Some(expect_str_value(ctx, value, "meta title", expr.span)?);
            }
            "ppq" => match value {
                Value::Int(v) if v >= 1 && v <= u16::MAX as i64 => {
                    ctx.song.ppq = v as u32;
                }
                other => {
                    return Err(ctx.diag(
                        Code::InvalidPpq,
                        format!("ppq must be an int in 1..{}, found {}", u16::MAX, other.to_display_string()),
                        expr.span,
                    ));
                }
            },
            // free-form metadata (composer, copyright, …) is accepted and
            // ignored by the MIDI backend
            _ => {}
        }
    }
    Ok(())
}

fn eval_meter_spec(
    ctx: &mut EvalContext,
    spec: &MeterSpec,
    scope: ScopeId,
) -> Result<(), Diagnostic> {
    let at = eval_expr(ctx, &spec.at, scope)?;
    let pos = expect_time(ctx, at, "meter position", spec.at.span)?;
    if pos.beat != 1 || pos.sub != 0 {
        return Err(ctx
            .diag(
                Code::PositionOutOfRange,
                format!("meter change at {} is not on a bar boundary", pos),
                spec.at.span,
            )
            .with_help("meter changes take effect at the start of a bar, e.g. `5:1`"));
    }
    if !crate::models::duration::LEGAL_DENOMINATORS.contains(&spec.denominator) {
        return Err(ctx.diag(
            Code::BadTimeSignature,
            format!("meter denominator {} is not a power of two up to 64", spec.denominator),
            spec.span,
        ));
    }
    if spec.numerator == 0 || spec.numerator > 64 {
        return Err(ctx.diag(
            Code::BadTimeSignature,
            format!("meter numerator {} out of range 1..64", spec.numerator),
            spec.span,
        ));
    }
    ctx.meters.set(pos.bar, spec.numerator, spec.denominator);
    Ok(())
}

fn eval_tempo_spec(
    ctx: &mut EvalContext,
    spec: &TempoSpec,
    scope: ScopeId,
) -> Result<(), Diagnostic> {
    let at = eval_expr(ctx, &spec.at, scope)?;
    let start = match at {
        Value::Int(tick) if tick >= 0 => tick as u64,
        other => {
            let pos = expect_time(ctx, other, "tempo position", spec.at.span)?;
            ctx.resolve_pos(pos, spec.at.span)?
        }
    };
    match &spec.target {
        TempoTarget::Set { bpm, unit } => {
            let mut value = eval_bpm(ctx, bpm, scope)?;
            if let Some(unit) = unit {
                // `60bpm at h` counts half notes: rescale to quarter bpm
                let unit_value = eval_expr(ctx, unit, scope)?;
                let dur = expect_dur(ctx, unit_value, "tempo unit", unit.span)?;
                let unit_ticks = dur.to_ticks(ctx.ppq(), &[]).ok_or_else(|| {
                    ctx.diag(Code::InvalidDuration, "tempo unit resolves below one tick", unit.span)
                })?;
                value *= unit_ticks as f64 / ctx.ppq() as f64;
            }
            ctx.song.tempos.push(TempoEvent { tick: start, bpm: value });
        }
        TempoTarget::Ramp { end, curve, bpm } => {
            let end_value = eval_expr(ctx, end, scope)?;
            let end_tick = {
                let pos = expect_time(ctx, end_value, "ramp end position", end.span)?;
                ctx.resolve_pos(pos, end.span)?
            };
            if end_tick <= start {
                return Err(ctx.diag(
                    Code::BadArgument,
                    "tempo ramp must end after it starts",
                    spec.span,
                ));
            }
            let from = tempo_in_effect(&ctx.song.tempos, start);
            let to = eval_bpm(ctx, bpm, scope)?;
            // one sample per quarter note, then the exact target at the end
            let step = ctx.ppq() as u64;
            let mut tick = start;
            while tick < end_tick {
                let frac = (tick - start) as f64 / (end_tick - start) as f64;
                let frac = match curve {
                    RampCurve::Ramp => frac,
                    RampCurve::Ease => (1.0 - (std::f64::consts::PI * frac).cos()) / 2.0,
                };
                ctx.song.tempos.push(TempoEvent { tick, bpm: from + (to - from) * frac });
                tick += step;
            }
            ctx.song.tempos.push(TempoEvent { tick: end_tick, bpm: to });
        }
    }
    Ok(())
}

fn eval_bpm(ctx: &mut EvalContext, expr: &Expr, scope: ScopeId) -> Result<f64, Diagnostic> {
    match eval_expr(ctx, expr, scope)? {
        Value::Int(v) if v > 0 => Ok(v as f64),
        Value::Float(v) if v > 0.0 => Ok(v),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("tempo must be a positive number, found {}", other.to_display_string()),
            expr.span,
        )),
    }
}

/// The last declared tempo at or before `tick`
fn tempo_in_effect(tempos: &[TempoEvent], tick: u64) -> f64 {
    tempos
        .iter()
        .filter(|t| t.tick <= tick)
        .max_by_key(|t| t.tick)
        .map(|t| t.bpm)
        .unwrap_or(FALLBACK_BPM)
}

fn eval_sound(
    ctx: &mut EvalContext,
    id: &str,
    kind: &str,
    fields: &[(String, Expr)],
    scope: ScopeId,
    span: Span,
) -> Result<(), Diagnostic> {
    let mut def = SoundDef { kind: kind.to_string(), program: 0, channel: None };
    for (key, expr) in fields {
        let value = eval_expr(ctx, expr, scope)?;
        match key.as_str() {
            "program" => match value {
                Value::Int(v) if (0..=127).contains(&v) => def.program = v as u8,
                other => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!("sound program must be 0..127, found {}", other.to_display_string()),
                        expr.span,
                    ));
                }
            },
            "channel" => match value {
                Value::Int(v) if (0..=15).contains(&v) => def.channel = Some(v as u8),
                other => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!("sound channel must be 0..15, found {}", other.to_display_string()),
                        expr.span,
                    ));
                }
            },
            _ => {}
        }
    }
    if ctx.sounds.insert(id.to_string(), def).is_some() {
        return Err(ctx.diag(
            Code::Redeclaration,
            format!("sound \"{}\" is already declared", id),
            span,
        ));
    }
    Ok(())
}

fn eval_track(
    ctx: &mut EvalContext,
    name: &str,
    role: &str,
    sound: &str,
    body: &[TrackItem],
    scope: ScopeId,
    span: Span,
) -> Result<(), Diagnostic> {
    let sound_def = ctx.sounds.get(sound).cloned().ok_or_else(|| {
        ctx.diag(
            Code::UndefinedName,
            format!("track \"{}\" references undeclared sound \"{}\"", name, sound),
            span,
        )
        .with_help("declare it with `sound \"…\" kind … { … }` before the track")
    })?;

    let idx = ctx.song.tracks.len();
    let id = format!("t{}", idx + 1);
    let track = if role == "vocal" {
        Track::Vocal(VocalTrack {
            id,
            name: name.to_string(),
            phrases: Vec::new(),
            events: Vec::new(),
            vocaloid_params: None,
        })
    } else {
        let channel = sound_def
            .channel
            .unwrap_or_else(|| next_channel(&ctx.song, sound_def.kind == "drumkit"));
        Track::Midi(MidiTrack {
            id,
            name: name.to_string(),
            channel,
            program: sound_def.program,
            default_vel: DEFAULT_VELOCITY,
            events: Vec::new(),
        })
    };
    ctx.song.tracks.push(track);
    ctx.states.push(TrackState::new());

    ctx.phase = Phase::Track;
    ctx.current_track = Some(idx);
    let track_scope = ctx.scopes.push(scope);
    let result = exec_track_body(ctx, body, track_scope);
    ctx.phase = Phase::Global;
    ctx.current_track = None;
    result
}

fn exec_track_body(
    ctx: &mut EvalContext,
    body: &[TrackItem],
    scope: ScopeId,
) -> Result<(), Diagnostic> {
    for item in body {
        match item {
            TrackItem::Place { at, clip, span } => {
                let at_value = eval_expr(ctx, at, scope)?;
                let pos = expect_time(ctx, at_value, "place position", at.span)?;
                let tick = ctx.resolve_pos(pos, at.span)?;
                let idx = ctx.current_track.expect("in track phase");
                ctx.states[idx].cursor = tick;
                let clip_value = eval_expr(ctx, clip, scope)?;
                call_value(ctx, clip_value, Vec::new(), *span)?;
            }
            TrackItem::Stmt(stmt) => {
                exec_stmt(ctx, stmt, scope)?;
            }
        }
    }
    Ok(())
}

/// Channels assign in declaration order, skipping 10 (index 9) for
/// everything except drum kits
fn next_channel(song: &crate::ir::SongIR, drums: bool) -> u8 {
    if drums {
        return 9;
    }
    let used: Vec<u8> = song.midi_tracks().map(|t| t.channel).collect();
    (0..=15u8)
        .filter(|c| *c != 9)
        .find(|c| !used.contains(c))
        .unwrap_or(15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SongIR;

    #[test]
    fn test_tempo_in_effect_picks_latest_at_or_before() {
        let tempos = vec![
            TempoEvent { tick: 0, bpm: 120.0 },
            TempoEvent { tick: 1920, bpm: 90.0 },
        ];
        assert_eq!(tempo_in_effect(&tempos, 0), 120.0);
        assert_eq!(tempo_in_effect(&tempos, 1919), 120.0);
        assert_eq!(tempo_in_effect(&tempos, 1920), 90.0);
        assert_eq!(tempo_in_effect(&tempos, 9999), 90.0);
        assert_eq!(tempo_in_effect(&[], 0), FALLBACK_BPM);
    }

    #[test]
    fn test_next_channel_skips_percussion() {
        let mut song = SongIR::new(480);
        assert_eq!(next_channel(&song, false), 0);
        assert_eq!(next_channel(&song, true), 9);
        for channel in [0u8, 1, 2, 3, 4, 5, 6, 7, 8] {
            song.tracks.push(Track::Midi(MidiTrack {
                id: format!("t{}", channel),
                name: String::new(),
                channel,
                program: 0,
                default_vel: 100,
                events: vec![],
            }));
        }
        // channels 0..=8 taken: the next free non-percussion channel is 10
        assert_eq!(next_channel(&song, false), 10);
    }
}

fn eval_score_marker(
    ctx: &mut EvalContext,
    args: &[Expr],
    scope: ScopeId,
    span: Span,
) -> Result<(), Diagnostic> {
    if args.len() != 3 {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("marker takes (position, kind, label), got {} argument(s)", args.len()),
            span,
        ));
    }
    let pos_value = eval_expr(ctx, &args[0], scope)?;
    let pos = expect_time(ctx, pos_value, "marker position", args[0].span)?;
    let tick = ctx.resolve_pos(pos, args[0].span)?;
    let kind_value = eval_expr(ctx, &args[1], scope)?;
    let kind = expect_str_value(ctx, kind_value, "marker kind", args[1].span)?;
    let label_value = eval_expr(ctx, &args[2], scope)?;
    let label = expect_str_value(ctx, label_value, "marker label", args[2].span)?;
    ctx.song.markers.push(SongMarker { tick, kind, label });
    Ok(())
}
