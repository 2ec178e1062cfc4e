//! Effect and performance-annotation built-ins
//!
//! These emit named annotation events with free-form parameter payloads.
//! They never influence SMF output; downstream synthesis backends read
//! them from the Song-IR.

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::EvalContext;
use crate::eval::value::Value;
use crate::ir::TrackEvent;

pub fn register(registry: &mut Registry) {
    add(registry, "vocoder", 0, Some(1), PhaseReq::Track, vocoder);
    add(registry, "convolutionReverb", 0, Some(1), PhaseReq::Track, convolution_reverb);
    add(registry, "ampSim", 0, Some(1), PhaseReq::Track, amp_sim);
    add(registry, "cabinetSim", 0, Some(1), PhaseReq::Track, cabinet_sim);
    add(registry, "probability", 1, Some(1), PhaseReq::Track, probability);
    add(registry, "swing", 1, Some(1), PhaseReq::Track, swing);
    add(registry, "humanize", 1, Some(1), PhaseReq::Track, humanize);
}

fn named_effect(
    ctx: &mut EvalContext,
    name: &'static str,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    let params = match args.into_iter().next() {
        None => serde_json::Value::Null,
        Some(value @ Value::Object(_)) => value.to_json(),
        Some(other) => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("`{}` options must be an object, found {}", name, other.kind_name()),
                span,
            ));
        }
    };
    let idx = ctx.require_track(name, span)?;
    let tick = ctx.states[idx].cursor;
    ctx.emit(TrackEvent::Effect { tick, name: name.to_string(), params }, span)?;
    Ok(Value::Null)
}

fn vocoder(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    named_effect(ctx, "vocoder", args, span)
}

fn convolution_reverb(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    named_effect(ctx, "convolutionReverb", args, span)
}

fn amp_sim(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    named_effect(ctx, "ampSim", args, span)
}

fn cabinet_sim(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    named_effect(ctx, "cabinetSim", args, span)
}

/// Annotation with a single normalized amount in 0..=1
fn amount_effect(
    ctx: &mut EvalContext,
    name: &'static str,
    mut args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    let amount = expect_number(ctx, args.remove(0), name, span)?;
    if !(0.0..=1.0).contains(&amount) {
        return Err(ctx.diag(
            Code::BadArgument,
            format!("{} amount {} out of range 0..1", name, amount),
            span,
        ));
    }
    let idx = ctx.require_track(name, span)?;
    let tick = ctx.states[idx].cursor;
    let params = serde_json::json!({ "amount": amount });
    ctx.emit(TrackEvent::Effect { tick, name: name.to_string(), params }, span)?;
    Ok(Value::Null)
}

fn probability(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    amount_effect(ctx, "probability", args, span)
}

fn swing(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    amount_effect(ctx, "swing", args, span)
}

fn humanize(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    amount_effect(ctx, "humanize", args, span)
}
