//! Shared argument conversion helpers for built-in handlers
//!
//! Handlers receive evaluated values; these helpers turn them into the
//! kinds a signature expects, producing uniform `E2xx` diagnostics (and
//! `E110`/`E121` for the musical ranges).

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::context::{articulation_from_name, EvalContext};
use crate::eval::value::{ObjectMap, Value};
use crate::ir::Articulation;
use crate::models::{Duration, Pitch, Position};

pub fn expect_int(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<i64, Diagnostic> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be an int, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_number(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<f64, Diagnostic> {
    match value {
        Value::Int(v) => Ok(v as f64),
        Value::Float(v) => Ok(v),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be a number, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_str_value(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<String, Diagnostic> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be a string, found {}", what, other.kind_name()),
            span,
        )),
    }
}

/// A pitch argument: a pitch value, or an int already in MIDI range
pub fn expect_pitch(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<Pitch, Diagnostic> {
    match value {
        Value::Pitch(p) => Ok(p),
        Value::Int(v) => Pitch::from_key(v as i32).ok_or_else(|| {
            ctx.diag(
                Code::PitchOutOfRange,
                format!("pitch {} out of range 0..127", v),
                span,
            )
        }),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be a pitch, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_dur(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<Duration, Diagnostic> {
    match value {
        Value::Dur(d) => Ok(d),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be a duration, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_time(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<Position, Diagnostic> {
    match value {
        Value::Time(t) => Ok(t),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be a position, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_array(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<Vec<Value>, Diagnostic> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be an array, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_object(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<ObjectMap, Diagnostic> {
    match value {
        Value::Object(map) => Ok(map.borrow().clone()),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("{} must be an object, found {}", what, other.kind_name()),
            span,
        )),
    }
}

/// A MIDI data byte (controller number, controller value)
pub fn expect_data_byte(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<u8, Diagnostic> {
    let v = expect_int(ctx, value, what, span)?;
    if !(0..=127).contains(&v) {
        return Err(ctx.diag(
            Code::ControllerOutOfRange,
            format!("{} {} out of range 0..127", what, v),
            span,
        ));
    }
    Ok(v as u8)
}

/// Options accepted by the note-emitting built-ins
#[derive(Default)]
pub struct NoteOpts {
    pub vel: Option<i64>,
    pub articulation: Option<Articulation>,
    pub lyric: Option<String>,
}

/// Parse a trailing `{vel: …, art: …, lyric: …}` options object
pub fn parse_note_opts(
    ctx: &EvalContext,
    value: Option<&Value>,
    span: Span,
) -> Result<NoteOpts, Diagnostic> {
    let mut opts = NoteOpts::default();
    let map = match value {
        None => return Ok(opts),
        Some(Value::Object(map)) => map.borrow().clone(),
        Some(other) => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("note options must be an object, found {}", other.kind_name()),
                span,
            ));
        }
    };
    for key in map.keys() {
        match key {
            "vel" => match map.get(key) {
                Some(Value::Int(v)) => opts.vel = Some(*v),
                other => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!(
                            "note option `vel` must be an int, found {}",
                            other.map_or("nothing", |v| v.kind_name())
                        ),
                        span,
                    ));
                }
            },
            "art" => match map.get(key) {
                Some(Value::Str(name)) => {
                    opts.articulation = Some(articulation_from_name(name).ok_or_else(|| {
                        ctx.diag(
                            Code::BadArgument,
                            format!("unknown articulation `{}`", name),
                            span,
                        )
                        .with_help("one of: staccato, legato, accent, tenuto, marcato")
                    })?);
                }
                other => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!(
                            "note option `art` must be a string, found {}",
                            other.map_or("nothing", |v| v.kind_name())
                        ),
                        span,
                    ));
                }
            },
            "lyric" => match map.get(key) {
                Some(Value::Str(text)) => opts.lyric = Some(text.clone()),
                other => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!(
                            "note option `lyric` must be a string, found {}",
                            other.map_or("nothing", |v| v.kind_name())
                        ),
                        span,
                    ));
                }
            },
            unknown => {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!("unknown note option `{}`", unknown),
                    span,
                ));
            }
        }
    }
    Ok(opts)
}
