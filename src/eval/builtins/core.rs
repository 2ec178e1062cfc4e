//! General-purpose built-ins: collections, strings, numbers, conversions

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins::args::*;
use crate::eval::builtins::{add, PhaseReq, Registry};
use crate::eval::context::{EvalContext, MAX_ALLOC_ELEMENTS, MAX_STRING_BYTES};
use crate::eval::value::Value;
use crate::models::Position;

pub fn register(registry: &mut Registry) {
    add(registry, "print", 0, None, PhaseReq::Any, print);
    add(registry, "len", 1, Some(1), PhaseReq::Any, len);
    add(registry, "copy", 1, Some(1), PhaseReq::Any, copy);
    add(registry, "fill", 2, Some(2), PhaseReq::Any, fill);
    add(registry, "range", 2, Some(3), PhaseReq::Any, range);
    add(registry, "repeat", 2, Some(2), PhaseReq::Any, repeat);
    add(registry, "join", 2, Some(2), PhaseReq::Any, join);
    add(registry, "split", 2, Some(2), PhaseReq::Any, split);
    add(registry, "upper", 1, Some(1), PhaseReq::Any, upper);
    add(registry, "lower", 1, Some(1), PhaseReq::Any, lower);
    add(registry, "abs", 1, Some(1), PhaseReq::Any, abs);
    add(registry, "min", 2, None, PhaseReq::Any, min);
    add(registry, "max", 2, None, PhaseReq::Any, max);
    add(registry, "floor", 1, Some(1), PhaseReq::Any, floor);
    add(registry, "ceil", 1, Some(1), PhaseReq::Any, ceil);
    add(registry, "round", 1, Some(1), PhaseReq::Any, round);
    add(registry, "keys", 1, Some(1), PhaseReq::Any, keys);
    add(registry, "values", 1, Some(1), PhaseReq::Any, values);
    add(registry, "push", 2, Some(2), PhaseReq::Any, push);
    add(registry, "pop", 1, Some(1), PhaseReq::Any, pop);
    add(registry, "contains", 2, Some(2), PhaseReq::Any, contains);
    add(registry, "indexOf", 2, Some(2), PhaseReq::Any, index_of);
    add(registry, "slice", 2, Some(3), PhaseReq::Any, slice);
    add(registry, "str", 1, Some(1), PhaseReq::Any, to_str);
    add(registry, "int", 1, Some(1), PhaseReq::Any, to_int);
    add(registry, "float", 1, Some(1), PhaseReq::Any, to_float);
    add(registry, "typeOf", 1, Some(1), PhaseReq::Any, type_of);
    add(registry, "time", 2, Some(3), PhaseReq::Any, time);
}

fn print(_ctx: &mut EvalContext, args: Vec<Value>, _span: Span) -> Result<Value, Diagnostic> {
    let text: Vec<String> = args.iter().map(|v| v.to_display_string()).collect();
    log::info!(target: "melos::print", "{}", text.join(" "));
    Ok(Value::Null)
}

fn len(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = args.remove(0);
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Object(map) => map.borrow().len(),
        other => {
            return Err(ctx.diag(
                Code::BadArgument,
                format!("len expects a string, array, or object, found {}", other.kind_name()),
                span,
            ));
        }
    };
    Ok(Value::Int(len as i64))
}

fn copy(_ctx: &mut EvalContext, mut args: Vec<Value>, _span: Span) -> Result<Value, Diagnostic> {
    Ok(args.remove(0).shallow_clone())
}

fn fill(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let count = expect_int(ctx, args.remove(1), "fill count", span)?;
    let value = args.remove(0);
    if count < 0 || count as usize > MAX_ALLOC_ELEMENTS {
        return Err(ctx.diag(
            Code::AllocationLimit,
            format!("fill of {} elements exceeds the allocation cap", count),
            span,
        ));
    }
    // each slot gets its own deep copy of the fill value
    let items = (0..count).map(|_| value.deep_clone()).collect();
    Ok(Value::array(items))
}

fn range(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let start = expect_int(ctx, args.next().expect("arity checked"), "range start", span)?;
    let end = expect_int(ctx, args.next().expect("arity checked"), "range end", span)?;
    let step = match args.next() {
        Some(v) => expect_int(ctx, v, "range step", span)?,
        None => 1,
    };
    if step == 0 {
        return Err(ctx.diag(Code::BadArgument, "range step cannot be zero", span));
    }
    let count = if step > 0 {
        ((end - start).max(0) as u64).div_ceil(step as u64)
    } else {
        ((start - end).max(0) as u64).div_ceil(step.unsigned_abs())
    };
    if count as usize > MAX_ALLOC_ELEMENTS {
        return Err(ctx.diag(
            Code::AllocationLimit,
            format!("range of {} elements exceeds the allocation cap", count),
            span,
        ));
    }
    let mut items = Vec::with_capacity(count as usize);
    let mut v = start;
    while (step > 0 && v < end) || (step < 0 && v > end) {
        items.push(Value::Int(v));
        v += step;
    }
    Ok(Value::array(items))
}

fn repeat(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let count = expect_int(ctx, args.remove(1), "repeat count", span)?;
    if count < 0 {
        return Err(ctx.diag(Code::BadArgument, "repeat count cannot be negative", span));
    }
    match args.remove(0) {
        Value::Str(s) => {
            let total = s.len().saturating_mul(count as usize);
            if total > MAX_STRING_BYTES {
                return Err(ctx.diag(
                    Code::AllocationLimit,
                    "repeated string exceeds the size cap",
                    span,
                ));
            }
            Ok(Value::Str(s.repeat(count as usize)))
        }
        Value::Array(items) => {
            let items = items.borrow();
            let total = items.len().saturating_mul(count as usize);
            if total > MAX_ALLOC_ELEMENTS {
                return Err(ctx.diag(
                    Code::AllocationLimit,
                    "repeated array exceeds the element cap",
                    span,
                ));
            }
            let mut out = Vec::with_capacity(total);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::array(out))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("repeat expects a string or array, found {}", other.kind_name()),
            span,
        )),
    }
}

fn join(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let sep = expect_str_value(ctx, args.remove(1), "join separator", span)?;
    let items = expect_array(ctx, args.remove(0), "join array", span)?;
    let parts: Vec<String> = items.iter().map(|v| v.to_display_string()).collect();
    let joined = parts.join(&sep);
    if joined.len() > MAX_STRING_BYTES {
        return Err(ctx.diag(Code::AllocationLimit, "joined string exceeds the size cap", span));
    }
    Ok(Value::Str(joined))
}

fn split(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let sep = expect_str_value(ctx, args.remove(1), "split separator", span)?;
    let text = expect_str_value(ctx, args.remove(0), "split string", span)?;
    let parts: Vec<Value> = if sep.is_empty() {
        text.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        text.split(&sep).map(|s| Value::Str(s.to_string())).collect()
    };
    Ok(Value::array(parts))
}

fn upper(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let text = expect_str_value(ctx, args.remove(0), "upper argument", span)?;
    Ok(Value::Str(text.to_uppercase()))
}

fn lower(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let text = expect_str_value(ctx, args.remove(0), "lower argument", span)?;
    Ok(Value::Str(text.to_lowercase()))
}

fn abs(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    match args.remove(0) {
        Value::Int(v) => Ok(Value::Int(v.abs())),
        Value::Float(v) => Ok(Value::Float(v.abs())),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("abs expects a number, found {}", other.kind_name()),
            span,
        )),
    }
}

fn fold_numbers(
    ctx: &EvalContext,
    args: Vec<Value>,
    span: Span,
    pick_first: impl Fn(f64, f64) -> bool,
) -> Result<Value, Diagnostic> {
    let mut best: Option<Value> = None;
    for arg in args {
        let candidate = expect_number(ctx, arg.clone(), "numeric argument", span)?;
        let replace = match &best {
            None => true,
            Some(current) => {
                let current = expect_number(ctx, current.clone(), "numeric argument", span)?;
                pick_first(candidate, current)
            }
        };
        if replace {
            best = Some(arg);
        }
    }
    Ok(best.expect("arity checked"))
}

fn min(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    fold_numbers(ctx, args, span, |candidate, current| candidate < current)
}

fn max(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    fold_numbers(ctx, args, span, |candidate, current| candidate > current)
}

fn floor(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let v = expect_number(ctx, args.remove(0), "floor argument", span)?;
    Ok(Value::Int(v.floor() as i64))
}

fn ceil(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let v = expect_number(ctx, args.remove(0), "ceil argument", span)?;
    Ok(Value::Int(v.ceil() as i64))
}

fn round(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let v = expect_number(ctx, args.remove(0), "round argument", span)?;
    Ok(Value::Int(v.round() as i64))
}

fn keys(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let map = expect_object(ctx, args.remove(0), "keys argument", span)?;
    Ok(Value::array(map.keys().map(|k| Value::Str(k.to_string())).collect()))
}

fn values(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let map = expect_object(ctx, args.remove(0), "values argument", span)?;
    Ok(Value::array(map.values().cloned().collect()))
}

fn push(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let value = args.remove(1);
    match args.remove(0) {
        Value::Array(items) => {
            if items.borrow().len() >= MAX_ALLOC_ELEMENTS {
                return Err(ctx.diag(
                    Code::AllocationLimit,
                    "array exceeds the element cap",
                    span,
                ));
            }
            items.borrow_mut().push(value);
            Ok(Value::Array(items))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("push expects an array, found {}", other.kind_name()),
            span,
        )),
    }
}

fn pop(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    match args.remove(0) {
        Value::Array(items) => {
            let popped = items.borrow_mut().pop();
            Ok(popped.unwrap_or(Value::Null))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("pop expects an array, found {}", other.kind_name()),
            span,
        )),
    }
}

fn contains(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let needle = args.remove(1);
    match args.remove(0) {
        Value::Array(items) => {
            Ok(Value::Bool(items.borrow().iter().any(|v| v.value_eq(&needle))))
        }
        Value::Str(text) => {
            let needle = expect_str_value(ctx, needle, "contains needle", span)?;
            Ok(Value::Bool(text.contains(&needle)))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("contains expects an array or string, found {}", other.kind_name()),
            span,
        )),
    }
}

fn index_of(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let needle = args.remove(1);
    match args.remove(0) {
        Value::Array(items) => {
            let index = items.borrow().iter().position(|v| v.value_eq(&needle));
            Ok(Value::Int(index.map_or(-1, |i| i as i64)))
        }
        Value::Str(text) => {
            let needle = expect_str_value(ctx, needle, "indexOf needle", span)?;
            let index = text.find(&needle).map(|byte| text[..byte].chars().count());
            Ok(Value::Int(index.map_or(-1, |i| i as i64)))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("indexOf expects an array or string, found {}", other.kind_name()),
            span,
        )),
    }
}

fn slice(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let target = args.next().expect("arity checked");
    let start = expect_int(ctx, args.next().expect("arity checked"), "slice start", span)?.max(0) as usize;
    let end = match args.next() {
        Some(v) => Some(expect_int(ctx, v, "slice end", span)?.max(0) as usize),
        None => None,
    };
    match target {
        Value::Array(items) => {
            let items = items.borrow();
            let end = end.unwrap_or(items.len()).min(items.len());
            let start = start.min(end);
            Ok(Value::array(items[start..end].to_vec()))
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let end = end.unwrap_or(chars.len()).min(chars.len());
            let start = start.min(end);
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("slice expects an array or string, found {}", other.kind_name()),
            span,
        )),
    }
}

fn to_str(_ctx: &mut EvalContext, mut args: Vec<Value>, _span: Span) -> Result<Value, Diagnostic> {
    Ok(Value::Str(args.remove(0).to_display_string()))
}

fn to_int(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    match args.remove(0) {
        Value::Int(v) => Ok(Value::Int(v)),
        Value::Float(v) => Ok(Value::Int(v.trunc() as i64)),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Pitch(p) => Ok(Value::Int(p.key() as i64)),
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            ctx.diag(Code::BadArgument, format!("cannot parse `{}` as int", s), span)
        }),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("cannot convert {} to int", other.kind_name()),
            span,
        )),
    }
}

fn to_float(ctx: &mut EvalContext, mut args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    match args.remove(0) {
        Value::Int(v) => Ok(Value::Float(v as f64)),
        Value::Float(v) => Ok(Value::Float(v)),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            ctx.diag(Code::BadArgument, format!("cannot parse `{}` as float", s), span)
        }),
        other => Err(ctx.diag(
            Code::BadArgument,
            format!("cannot convert {} to float", other.kind_name()),
            span,
        )),
    }
}

fn type_of(_ctx: &mut EvalContext, mut args: Vec<Value>, _span: Span) -> Result<Value, Diagnostic> {
    Ok(Value::Str(args.remove(0).kind_name().to_string()))
}

fn time(ctx: &mut EvalContext, args: Vec<Value>, span: Span) -> Result<Value, Diagnostic> {
    let mut args = args.into_iter();
    let bar = expect_int(ctx, args.next().expect("arity checked"), "bar", span)?;
    let beat = expect_int(ctx, args.next().expect("arity checked"), "beat", span)?;
    let sub = match args.next() {
        Some(v) => expect_int(ctx, v, "sub", span)?,
        None => 0,
    };
    if bar < 1 || beat < 1 || sub < 0 {
        return Err(ctx.diag(
            Code::PositionOutOfRange,
            format!("invalid position {}:{}+{} (bar and beat are 1-based)", bar, beat, sub),
            span,
        ));
    }
    Ok(Value::Time(Position::new(bar as u32, beat as u32, sub as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::scope::ScopeArena;

    fn ctx() -> EvalContext {
        let (scopes, _) = ScopeArena::new();
        EvalContext::new(scopes, None)
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_len_over_kinds() {
        let mut ctx = ctx();
        let r = len(&mut ctx, vec![Value::Str("héllo".to_string())], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(5)));
        let r = len(&mut ctx, vec![Value::array(ints(&[1, 2, 3]))], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(3)));
        assert!(len(&mut ctx, vec![Value::Int(1)], Span::default()).is_err());
    }

    #[test]
    fn test_fill_deep_clones_each_slot() {
        let mut ctx = ctx();
        let template = Value::array(ints(&[7]));
        let filled = fill(&mut ctx, vec![template, Value::Int(2)], Span::default()).unwrap();
        if let Value::Array(items) = &filled {
            let first = items.borrow()[0].clone();
            if let Value::Array(inner) = &first {
                inner.borrow_mut().push(Value::Int(8));
            }
            // the second slot is an independent copy
            if let Value::Array(second) = &items.borrow()[1] {
                assert_eq!(second.borrow().len(), 1);
            } else {
                panic!("expected nested array");
            }
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn test_range_with_step() {
        let mut ctx = ctx();
        let r = range(&mut ctx, ints(&[0, 7, 2]), Span::default()).unwrap();
        if let Value::Array(items) = r {
            let got: Vec<i64> = items
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    other => panic!("expected int, got {:?}", other),
                })
                .collect();
            assert_eq!(got, vec![0, 2, 4, 6]);
        } else {
            panic!("expected array");
        }
        assert!(range(&mut ctx, ints(&[0, 5, 0]), Span::default()).is_err());
    }

    #[test]
    fn test_slice_clamps() {
        let mut ctx = ctx();
        let r = slice(
            &mut ctx,
            vec![Value::Str("abcdef".to_string()), Value::Int(2), Value::Int(100)],
            Span::default(),
        )
        .unwrap();
        assert!(matches!(r, Value::Str(s) if s == "cdef"));
    }

    #[test]
    fn test_conversions() {
        let mut ctx = ctx();
        let r = to_int(&mut ctx, vec![Value::Str(" 42 ".to_string())], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(42)));
        let r = to_int(&mut ctx, vec![Value::Float(3.9)], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(3)));
        assert!(to_int(&mut ctx, vec![Value::Str("nope".to_string())], Span::default()).is_err());
        let r = type_of(&mut ctx, vec![Value::Null], Span::default()).unwrap();
        assert!(matches!(r, Value::Str(s) if s == "null"));
    }

    #[test]
    fn test_index_of_and_contains() {
        let mut ctx = ctx();
        let arr = Value::array(ints(&[5, 6, 7]));
        let r = index_of(&mut ctx, vec![arr.clone(), Value::Int(6)], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(1)));
        let r = index_of(&mut ctx, vec![arr.clone(), Value::Int(9)], Span::default()).unwrap();
        assert!(matches!(r, Value::Int(-1)));
        let r = contains(&mut ctx, vec![arr, Value::Int(7)], Span::default()).unwrap();
        assert!(matches!(r, Value::Bool(true)));
    }

    #[test]
    fn test_repeat_caps() {
        let mut ctx = ctx();
        let err = repeat(
            &mut ctx,
            vec![Value::Str("x".repeat(1024)), Value::Int(2048)],
            Span::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::diagnostics::Code::AllocationLimit);
    }
}
