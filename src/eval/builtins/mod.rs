//! Built-in function registry
//!
//! Built-ins are registered once per process in a name → entry map. Each
//! entry declares arity bounds and the phase it may run in, so dispatch
//! checks those uniformly and produces consistent diagnostics before the
//! handler sees the arguments. User definitions shadow built-ins: dispatch
//! only happens after scope lookup fails.

pub mod args;
mod core;
mod effects;
mod midi;
mod notation;
mod ornaments;
mod vocal;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::context::EvalContext;
use crate::eval::value::Value;

/// Where a built-in is allowed to run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseReq {
    /// Anywhere
    Any,
    /// Only before any track is opened
    Global,
    /// Only inside a track body or placed clip
    Track,
    /// Only inside a vocal track
    Vocal,
}

pub type Handler = fn(&mut EvalContext, Vec<Value>, Span) -> Result<Value, Diagnostic>;

pub struct Builtin {
    pub min_args: usize,
    /// `None` means variadic
    pub max_args: Option<usize>,
    pub phase: PhaseReq,
    pub handler: Handler,
}

pub type Registry = HashMap<&'static str, Builtin>;

/// Register one entry; a name may only be registered once
pub(crate) fn add(
    registry: &mut Registry,
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    phase: PhaseReq,
    handler: Handler,
) {
    let previous = registry.insert(name, Builtin { min_args, max_args, phase, handler });
    debug_assert!(previous.is_none(), "duplicate builtin registration: {}", name);
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::new();
    core::register(&mut registry);
    midi::register(&mut registry);
    notation::register(&mut registry);
    ornaments::register(&mut registry);
    vocal::register(&mut registry);
    effects::register(&mut registry);
    log::debug!("registered {} builtin(s)", registry.len());
    registry
});

pub fn is_builtin(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

/// Dispatch `name(args)`; `None` when no such built-in exists
pub fn dispatch(
    ctx: &mut EvalContext,
    name: &str,
    args: Vec<Value>,
    span: Span,
) -> Option<Result<Value, Diagnostic>> {
    let builtin = REGISTRY.get(name)?;
    Some(invoke(ctx, name, builtin, args, span))
}

fn invoke(
    ctx: &mut EvalContext,
    name: &str,
    builtin: &Builtin,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    if args.len() < builtin.min_args || builtin.max_args.is_some_and(|max| args.len() > max) {
        let arity = match (builtin.min_args, builtin.max_args) {
            (min, Some(max)) if min == max => format!("{}", min),
            (min, Some(max)) => format!("{}..{}", min, max),
            (min, None) => format!("at least {}", min),
        };
        return Err(ctx.diag(
            Code::BadArgument,
            format!("`{}` takes {} argument(s), got {}", name, arity, args.len()),
            span,
        ));
    }
    match builtin.phase {
        PhaseReq::Any => {}
        PhaseReq::Global => ctx.require_global(name, span)?,
        PhaseReq::Track => {
            ctx.require_track(name, span)?;
        }
        PhaseReq::Vocal => {
            ctx.require_track(name, span)?;
            if !ctx.is_vocal() {
                return Err(ctx.diag(
                    Code::PhaseViolation,
                    format!("`{}` is only available inside a vocal track", name),
                    span,
                ));
            }
        }
    }
    (builtin.handler)(ctx, args, span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::Phase;
    use crate::eval::scope::ScopeArena;

    fn global_context() -> EvalContext {
        let (scopes, _) = ScopeArena::new();
        EvalContext::new(scopes, None)
    }

    #[test]
    fn test_registry_has_canonical_names() {
        for name in [
            "len", "copy", "fill", "range", "note", "chord", "rest", "cc", "at", "transpose",
            "trill", "mordent", "glissando", "tremolo", "phrase", "lyric", "vocoder",
            "convolutionReverb", "ampSim", "cabinetSim", "probability", "swing", "slurStart",
            "drum", "tempo", "meter",
        ] {
            assert!(is_builtin(name), "missing builtin `{}`", name);
        }
    }

    #[test]
    fn test_unknown_name_is_none() {
        let mut ctx = global_context();
        assert!(dispatch(&mut ctx, "definitelyNotABuiltin", vec![], Span::default()).is_none());
    }

    #[test]
    fn test_arity_error() {
        let mut ctx = global_context();
        let err = dispatch(&mut ctx, "len", vec![], Span::default())
            .expect("len exists")
            .unwrap_err();
        assert_eq!(err.code, Code::BadArgument);
        assert!(err.message.contains("`len`"));
    }

    #[test]
    fn test_track_builtin_in_global_phase_is_phase_violation() {
        let mut ctx = global_context();
        let err = dispatch(
            &mut ctx,
            "rest",
            vec![Value::Dur(crate::models::Duration::quarter())],
            Span::default(),
        )
        .expect("rest exists")
        .unwrap_err();
        assert_eq!(err.code, Code::PhaseViolation);
    }

    #[test]
    fn test_global_builtin_phase_requirement() {
        let mut ctx = global_context();
        ctx.phase = Phase::Track;
        let err = dispatch(&mut ctx, "tempo", vec![Value::Int(0), Value::Int(120)], Span::default())
            .expect("tempo exists")
            .unwrap_err();
        assert_eq!(err.code, Code::PhaseViolation);
    }
}
