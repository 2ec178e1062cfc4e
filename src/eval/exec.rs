//! Statement and expression evaluation
//!
//! Control flow uses an explicit [`Flow`] result instead of unwinding:
//! loops translate `Broke`/`Continued`, function-call boundaries translate
//! `Returned`. Everything else propagates diagnostics with `?`.

use std::rc::Rc;

use crate::diagnostics::{Code, Diagnostic, Span};
use crate::eval::builtins;
use crate::eval::context::{
    EvalContext, MAX_ALLOC_ELEMENTS, MAX_CALL_DEPTH, MAX_LOOP_ITERATIONS, MAX_STRING_BYTES,
};
use crate::eval::scope::{ScopeError, ScopeId};
use crate::eval::score;
use crate::eval::value::{FnBody, FunctionValue, ObjectMap, Value};
use crate::models::{Duration, Position};
use crate::parse::ast::*;

/// Result of executing a statement
#[derive(Debug)]
pub enum Flow {
    Normal,
    Returned(Value),
    Broke,
    Continued,
}

/// Execute statements in `scope`, stopping at the first non-normal flow
pub fn exec_stmts(
    ctx: &mut EvalContext,
    stmts: &[Stmt],
    scope: ScopeId,
) -> Result<Flow, Diagnostic> {
    for stmt in stmts {
        match exec_stmt(ctx, stmt, scope)? {
            Flow::Normal => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

pub fn exec_stmt(ctx: &mut EvalContext, stmt: &Stmt, scope: ScopeId) -> Result<Flow, Diagnostic> {
    match &stmt.kind {
        StmtKind::Decl { mutable, target, init } => {
            let value = eval_expr(ctx, init, scope)?;
            bind_target(ctx, target, value, *mutable, scope, stmt.span)?;
            Ok(Flow::Normal)
        }
        StmtKind::Assign { target, value } => {
            let value = eval_expr(ctx, value, scope)?;
            assign_target(ctx, target, value, scope)?;
            Ok(Flow::Normal)
        }
        StmtKind::If { cond, then_block, else_block } => {
            let cond_value = eval_expr(ctx, cond, scope)?;
            if expect_bool(ctx, cond_value, "if condition", cond.span)? {
                let child = ctx.scopes.push(scope);
                exec_stmts(ctx, then_block, child)
            } else if let Some(else_block) = else_block {
                let child = ctx.scopes.push(scope);
                exec_stmts(ctx, else_block, child)
            } else {
                Ok(Flow::Normal)
            }
        }
        StmtKind::ForIn { var, iterable, body } => {
            let items = iterable_values(ctx, iterable, scope)?;
            let mut iterations = 0u64;
            for item in items {
                iterations += 1;
                if iterations > MAX_LOOP_ITERATIONS {
                    return Err(ctx.diag(
                        Code::LoopLimit,
                        format!("loop exceeded {} iterations", MAX_LOOP_ITERATIONS),
                        stmt.span,
                    ));
                }
                let child = ctx.scopes.push(scope);
                ctx.scopes
                    .declare(child, var, item, false)
                    .expect("fresh scope cannot have duplicates");
                match exec_stmts(ctx, body, child)? {
                    Flow::Normal | Flow::Continued => {}
                    Flow::Broke => break,
                    returned @ Flow::Returned(_) => return Ok(returned),
                }
            }
            Ok(Flow::Normal)
        }
        StmtKind::While { cond, body } => {
            let mut iterations = 0u64;
            loop {
                let cond_value = eval_expr(ctx, cond, scope)?;
                if !expect_bool(ctx, cond_value, "while condition", cond.span)? {
                    break;
                }
                iterations += 1;
                if iterations > MAX_LOOP_ITERATIONS {
                    return Err(ctx.diag(
                        Code::LoopLimit,
                        format!("loop exceeded {} iterations", MAX_LOOP_ITERATIONS),
                        stmt.span,
                    ));
                }
                let child = ctx.scopes.push(scope);
                match exec_stmts(ctx, body, child)? {
                    Flow::Normal | Flow::Continued => {}
                    Flow::Broke => break,
                    returned @ Flow::Returned(_) => return Ok(returned),
                }
            }
            Ok(Flow::Normal)
        }
        StmtKind::Return(value) => {
            let value = match value {
                Some(expr) => eval_expr(ctx, expr, scope)?,
                None => Value::Null,
            };
            Ok(Flow::Returned(value))
        }
        StmtKind::Break => Ok(Flow::Broke),
        StmtKind::Continue => Ok(Flow::Continued),
        StmtKind::Expr(expr) => {
            eval_expr(ctx, expr, scope)?;
            Ok(Flow::Normal)
        }
        StmtKind::Tuplet { actual, in_time, body } => {
            ctx.require_track("tuplet", stmt.span)?;
            let actual_value = eval_expr(ctx, actual, scope)?;
            let actual = expect_int_value(ctx, actual_value, "tuplet count", actual.span)?;
            if !(2..=64).contains(&actual) {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!("tuplet count {} out of range 2..64", actual),
                    stmt.span,
                ));
            }
            let normal = match in_time {
                Some(expr) => {
                    let time_value = eval_expr(ctx, expr, scope)?;
                    let n = expect_int_value(ctx, time_value, "tuplet time", expr.span)?;
                    if !(1..=64).contains(&n) {
                        return Err(ctx.diag(
                            Code::BadArgument,
                            format!("tuplet time {} out of range 1..64", n),
                            expr.span,
                        ));
                    }
                    n as u32
                }
                // default: the largest power of two below the count, so
                // triplet(3) means 3:2 and tuplet-like quintuplets 5:4
                None => {
                    let mut p = 1u32;
                    while p * 2 < actual as u32 {
                        p *= 2;
                    }
                    p
                }
            };
            let idx = ctx.require_track("tuplet", stmt.span)?;
            ctx.states[idx].tuplet_stack.push((actual as u32, normal));
            let child = ctx.scopes.push(scope);
            let result = exec_stmts(ctx, body, child);
            ctx.states[idx].tuplet_stack.pop();
            result
        }
    }
}

/// Bind a top-level `const` declaration target
pub fn bind_const(
    ctx: &mut EvalContext,
    target: &DeclTarget,
    value: Value,
    scope: ScopeId,
    span: Span,
) -> Result<(), Diagnostic> {
    bind_target(ctx, target, value, false, scope, span)
}

fn bind_target(
    ctx: &mut EvalContext,
    target: &DeclTarget,
    value: Value,
    mutable: bool,
    scope: ScopeId,
    span: Span,
) -> Result<(), Diagnostic> {
    match target {
        DeclTarget::Name(name) => declare(ctx, scope, name, value, mutable, span),
        DeclTarget::Tuple { elements, rest } => {
            let items = match &value {
                Value::Array(items) => items.borrow().clone(),
                other => {
                    return Err(ctx.diag(
                        Code::TypeMismatch,
                        format!("cannot destructure {} into a tuple pattern", other.kind_name()),
                        span,
                    ));
                }
            };
            if items.len() < elements.len() {
                return Err(ctx.diag(
                    Code::BadArgument,
                    format!(
                        "destructuring needs {} element(s) but the value has {}",
                        elements.len(),
                        items.len()
                    ),
                    span,
                ));
            }
            for (name, item) in elements.iter().zip(items.iter()) {
                declare(ctx, scope, name, item.clone(), mutable, span)?;
            }
            if let Some(rest_name) = rest {
                let remainder = items[elements.len()..].to_vec();
                declare(ctx, scope, rest_name, Value::array(remainder), mutable, span)?;
            }
            Ok(())
        }
    }
}

fn declare(
    ctx: &mut EvalContext,
    scope: ScopeId,
    name: &str,
    value: Value,
    mutable: bool,
    span: Span,
) -> Result<(), Diagnostic> {
    ctx.scopes.declare(scope, name, value, mutable).map_err(|_| {
        ctx.diag(
            Code::Redeclaration,
            format!("`{}` is already declared in this scope", name),
            span,
        )
    })
}

fn assign_target(
    ctx: &mut EvalContext,
    target: &Expr,
    value: Value,
    scope: ScopeId,
) -> Result<(), Diagnostic> {
    match &target.kind {
        ExprKind::Ident(name) => {
            ctx.scopes.assign(scope, name, value).map_err(|e| match e {
                ScopeError::Undefined => ctx.diag(
                    Code::UndefinedName,
                    format!("cannot assign to undefined variable `{}`", name),
                    target.span,
                ),
                _ => ctx.diag(
                    Code::AssignToImmutable,
                    format!("`{}` is immutable; declare it with `let` to assign", name),
                    target.span,
                ),
            })
        }
        ExprKind::Member { recv, name, .. } => {
            let recv = eval_expr(ctx, recv, scope)?;
            match recv {
                Value::Object(map) => {
                    map.borrow_mut().set(name, value);
                    Ok(())
                }
                other => Err(ctx.diag(
                    Code::TypeMismatch,
                    format!("cannot assign member `{}` on {}", name, other.kind_name()),
                    target.span,
                )),
            }
        }
        ExprKind::Index { recv, index, .. } => {
            let recv = eval_expr(ctx, recv, scope)?;
            let index = eval_expr(ctx, index, scope)?;
            match (recv, index) {
                (Value::Array(items), Value::Int(i)) => {
                    let mut items = items.borrow_mut();
                    let len = items.len();
                    let slot = items.get_mut(i.max(0) as usize).ok_or_else(|| {
                        ctx.diag(
                            Code::BadArgument,
                            format!("index {} out of bounds for array of length {}", i, len),
                            target.span,
                        )
                    })?;
                    *slot = value;
                    Ok(())
                }
                (Value::Object(map), Value::Str(key)) => {
                    map.borrow_mut().set(&key, value);
                    Ok(())
                }
                (recv, index) => Err(ctx.diag(
                    Code::TypeMismatch,
                    format!(
                        "cannot index {} with {} in assignment",
                        recv.kind_name(),
                        index.kind_name()
                    ),
                    target.span,
                )),
            }
        }
        _ => Err(ctx.diag(Code::ParseError, "invalid assignment target", target.span)),
    }
}

fn iterable_values(
    ctx: &mut EvalContext,
    iterable: &Expr,
    scope: ScopeId,
) -> Result<Vec<Value>, Diagnostic> {
    match eval_expr(ctx, iterable, scope)? {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::Str(text) => Ok(text.chars().map(|c| Value::Str(c.to_string())).collect()),
        other => Err(ctx.diag(
            Code::TypeMismatch,
            format!("cannot iterate over {}", other.kind_name()),
            iterable.span,
        )),
    }
}

// --- expressions ---

pub fn eval_expr(ctx: &mut EvalContext, expr: &Expr, scope: ScopeId) -> Result<Value, Diagnostic> {
    match &expr.kind {
        ExprKind::Int(v) => Ok(Value::Int(*v)),
        ExprKind::Float(v) => Ok(Value::Float(*v)),
        ExprKind::Bpm(v) => Ok(Value::Float(*v)),
        ExprKind::Str(s) => Ok(Value::Str(s.clone())),
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Null => Ok(Value::Null),
        ExprKind::Pitch(key) => Ok(Value::Pitch(
            crate::models::Pitch::from_key(*key as i32).expect("lexer validated the range"),
        )),
        ExprKind::Dur { num, den, dots } => Ok(Value::Dur(
            Duration::fraction(*num, *den, *dots).expect("lexer validated the literal"),
        )),
        ExprKind::PosRef { bar, beat } => Ok(Value::Time(Position::new(*bar, *beat, 0))),
        ExprKind::Ident(name) => ctx.scopes.lookup(scope, name).ok_or_else(|| {
            let mut d = ctx.diag(
                Code::UndefinedName,
                format!("undefined variable `{}`", name),
                expr.span,
            );
            if builtins::is_builtin(name) {
                d = d.with_help(format!("`{}` is a built-in function; call it with `(…)`", name));
            }
            d
        }),
        ExprKind::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                let text = match part {
                    TemplatePart::Text(text) => text.clone(),
                    TemplatePart::Expr(inner) => {
                        eval_expr(ctx, inner, scope)?.to_display_string()
                    }
                };
                if out.len() + text.len() > MAX_STRING_BYTES {
                    return Err(ctx.diag(
                        Code::AllocationLimit,
                        "template expansion exceeds the string size cap",
                        expr.span,
                    ));
                }
                out.push_str(&text);
            }
            Ok(Value::Str(out))
        }
        ExprKind::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    ArrayItem::Item(inner) => out.push(eval_expr(ctx, inner, scope)?),
                    ArrayItem::Spread(inner) => match eval_expr(ctx, inner, scope)? {
                        Value::Array(spread) => out.extend(spread.borrow().iter().cloned()),
                        other => {
                            return Err(ctx.diag(
                                Code::TypeMismatch,
                                format!("cannot spread {} into an array", other.kind_name()),
                                inner.span,
                            ));
                        }
                    },
                }
                if out.len() > MAX_ALLOC_ELEMENTS {
                    return Err(ctx.diag(
                        Code::AllocationLimit,
                        "array literal exceeds the element cap",
                        expr.span,
                    ));
                }
            }
            Ok(Value::array(out))
        }
        ExprKind::Object(entries) => {
            let mut map = ObjectMap::new();
            for entry in entries {
                match entry {
                    ObjectEntry::Field { key, value } => {
                        let value = eval_expr(ctx, value, scope)?;
                        map.set(key, value);
                    }
                    ObjectEntry::Spread(inner) => match eval_expr(ctx, inner, scope)? {
                        Value::Object(spread) => {
                            for key in spread.borrow().keys() {
                                let value = spread.borrow().get(key).cloned();
                                if let Some(value) = value {
                                    map.set(key, value);
                                }
                            }
                        }
                        other => {
                            return Err(ctx.diag(
                                Code::TypeMismatch,
                                format!("cannot spread {} into an object", other.kind_name()),
                                inner.span,
                            ));
                        }
                    },
                }
            }
            Ok(Value::object(map))
        }
        ExprKind::Tuple(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(ctx, item, scope)?);
            }
            Ok(Value::array(out))
        }
        ExprKind::Unary { op, operand } => {
            let value = eval_expr(ctx, operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!expect_bool(ctx, value, "`!` operand", operand.span)?)),
                UnaryOp::Neg => match value {
                    Value::Int(v) => Ok(Value::Int(-v)),
                    Value::Float(v) => Ok(Value::Float(-v)),
                    other => Err(ctx.diag(
                        Code::TypeMismatch,
                        format!("cannot negate {}", other.kind_name()),
                        operand.span,
                    )),
                },
            }
        }
        ExprKind::Binary { op, lhs, rhs } => eval_binary(ctx, *op, lhs, rhs, scope, expr.span),
        ExprKind::Conditional { cond, then, otherwise } => {
            let cond_value = eval_expr(ctx, cond, scope)?;
            if expect_bool(ctx, cond_value, "condition", cond.span)? {
                eval_expr(ctx, then, scope)
            } else {
                eval_expr(ctx, otherwise, scope)
            }
        }
        ExprKind::Member { recv, name, optional } => {
            let recv = eval_expr(ctx, recv, scope)?;
            if *optional && recv.is_null() {
                return Ok(Value::Null);
            }
            match recv {
                Value::Object(map) => Ok(map.borrow().get(name).cloned().unwrap_or(Value::Null)),
                other => Err(ctx.diag(
                    Code::TypeMismatch,
                    format!("{} has no member `{}`", other.kind_name(), name),
                    expr.span,
                )),
            }
        }
        ExprKind::Index { recv, index, optional } => {
            let recv = eval_expr(ctx, recv, scope)?;
            if *optional && recv.is_null() {
                return Ok(Value::Null);
            }
            let index = eval_expr(ctx, index, scope)?;
            match (recv, index) {
                (Value::Array(items), Value::Int(i)) => {
                    let items = items.borrow();
                    items
                        .get(usize::try_from(i).unwrap_or(usize::MAX))
                        .cloned()
                        .ok_or_else(|| {
                            ctx.diag(
                                Code::BadArgument,
                                format!(
                                    "index {} out of bounds for array of length {}",
                                    i,
                                    items.len()
                                ),
                                expr.span,
                            )
                        })
                }
                (Value::Str(text), Value::Int(i)) => text
                    .chars()
                    .nth(usize::try_from(i).unwrap_or(usize::MAX))
                    .map(|c| Value::Str(c.to_string()))
                    .ok_or_else(|| {
                        ctx.diag(
                            Code::BadArgument,
                            format!("index {} out of bounds for string", i),
                            expr.span,
                        )
                    }),
                (Value::Object(map), Value::Str(key)) => {
                    Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Null))
                }
                (recv, index) => Err(ctx.diag(
                    Code::TypeMismatch,
                    format!("cannot index {} with {}", recv.kind_name(), index.kind_name()),
                    expr.span,
                )),
            }
        }
        ExprKind::Call { callee, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(ctx, arg, scope)?);
            }
            call_expr_callee(ctx, callee, values, scope, expr.span)
        }
        ExprKind::Match { scrutinee, arms, default } => {
            let value = eval_expr(ctx, scrutinee, scope)?;
            for arm in arms {
                if let Some(bindings) = match_pattern(&arm.pattern, &value) {
                    let child = ctx.scopes.push(scope);
                    for (name, bound) in bindings {
                        ctx.scopes
                            .declare(child, &name, bound, false)
                            .expect("fresh scope cannot have duplicates");
                    }
                    if let Some(guard) = &arm.guard {
                        let guard_value = eval_expr(ctx, guard, child)?;
                        if !expect_bool(ctx, guard_value, "match guard", guard.span)? {
                            continue;
                        }
                    }
                    return eval_expr(ctx, &arm.value, child);
                }
            }
            match default {
                Some(default) => eval_expr(ctx, default, scope),
                None => Err(ctx.diag(
                    Code::TypeMismatch,
                    format!("no match arm matched {}", value.to_display_string()),
                    expr.span,
                )),
            }
        }
        ExprKind::Arrow { params, body } => {
            let body = match body {
                ArrowBody::Expr(inner) => FnBody::Expr((**inner).clone()),
                ArrowBody::Block(stmts) => FnBody::Block(stmts.clone()),
            };
            Ok(Value::Function(Rc::new(FunctionValue {
                name: None,
                params: params.clone(),
                body,
                closure: scope,
            })))
        }
        ExprKind::Score(items) => score::eval_score(ctx, items, scope, expr.span),
        ExprKind::Clip(stmts) => Ok(Value::Function(Rc::new(FunctionValue {
            name: None,
            params: Vec::new(),
            body: FnBody::Block(stmts.clone()),
            closure: scope,
        }))),
    }
}

fn eval_binary(
    ctx: &mut EvalContext,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: ScopeId,
    span: Span,
) -> Result<Value, Diagnostic> {
    match op {
        BinaryOp::And => {
            let lhs_value = eval_expr(ctx, lhs, scope)?;
            if !expect_bool(ctx, lhs_value, "`&&` operand", lhs.span)? {
                return Ok(Value::Bool(false));
            }
            let rhs_value = eval_expr(ctx, rhs, scope)?;
            Ok(Value::Bool(expect_bool(ctx, rhs_value, "`&&` operand", rhs.span)?))
        }
        BinaryOp::Or => {
            let lhs_value = eval_expr(ctx, lhs, scope)?;
            if expect_bool(ctx, lhs_value, "`||` operand", lhs.span)? {
                return Ok(Value::Bool(true));
            }
            let rhs_value = eval_expr(ctx, rhs, scope)?;
            Ok(Value::Bool(expect_bool(ctx, rhs_value, "`||` operand", rhs.span)?))
        }
        BinaryOp::Coalesce => {
            let lhs = eval_expr(ctx, lhs, scope)?;
            if lhs.is_null() {
                eval_expr(ctx, rhs, scope)
            } else {
                Ok(lhs)
            }
        }
        BinaryOp::Pipe => {
            let piped = eval_expr(ctx, lhs, scope)?;
            match &rhs.kind {
                ExprKind::Call { callee, args } => {
                    let mut values = vec![piped];
                    for arg in args {
                        values.push(eval_expr(ctx, arg, scope)?);
                    }
                    call_expr_callee(ctx, callee, values, scope, span)
                }
                ExprKind::Ident(_) => call_expr_callee(ctx, rhs, vec![piped], scope, span),
                _ => {
                    let callee = eval_expr(ctx, rhs, scope)?;
                    call_value(ctx, callee, vec![piped], span)
                }
            }
        }
        BinaryOp::Range => {
            let start_value = eval_expr(ctx, lhs, scope)?;
            let start = expect_int_value(ctx, start_value, "range start", lhs.span)?;
            let end_value = eval_expr(ctx, rhs, scope)?;
            let end = expect_int_value(ctx, end_value, "range end", rhs.span)?;
            let count = (end - start).max(0) as usize;
            if count > MAX_ALLOC_ELEMENTS {
                return Err(ctx.diag(
                    Code::AllocationLimit,
                    format!("range of {} elements exceeds the allocation cap", count),
                    span,
                ));
            }
            Ok(Value::array((start..end.max(start)).map(Value::Int).collect()))
        }
        BinaryOp::Eq => {
            let a = eval_expr(ctx, lhs, scope)?;
            let b = eval_expr(ctx, rhs, scope)?;
            Ok(Value::Bool(a.value_eq(&b)))
        }
        BinaryOp::Ne => {
            let a = eval_expr(ctx, lhs, scope)?;
            let b = eval_expr(ctx, rhs, scope)?;
            Ok(Value::Bool(!a.value_eq(&b)))
        }
        _ => {
            let a = eval_expr(ctx, lhs, scope)?;
            let b = eval_expr(ctx, rhs, scope)?;
            apply_arith(ctx, op, a, b, span)
        }
    }
}

/// Arithmetic and comparison overloads over the value cross-product
fn apply_arith(
    ctx: &EvalContext,
    op: BinaryOp,
    a: Value,
    b: Value,
    span: Span,
) -> Result<Value, Diagnostic> {
    use BinaryOp::*;
    let incompatible = |ctx: &EvalContext, a: &Value, b: &Value| {
        ctx.diag(
            Code::TypeMismatch,
            format!(
                "operator `{}` cannot combine {} and {}",
                op_symbol(op),
                a.kind_name(),
                b.kind_name()
            ),
            span,
        )
    };

    match op {
        Add => match (&a, &b) {
            // string concatenation wins when either side is a string
            (Value::Str(s), other) => {
                let joined = format!("{}{}", s, other.to_display_string());
                if joined.len() > MAX_STRING_BYTES {
                    return Err(ctx.diag(
                        Code::AllocationLimit,
                        "string concatenation exceeds the size cap",
                        span,
                    ));
                }
                Ok(Value::Str(joined))
            }
            (other, Value::Str(s)) => {
                let joined = format!("{}{}", other.to_display_string(), s);
                if joined.len() > MAX_STRING_BYTES {
                    return Err(ctx.diag(
                        Code::AllocationLimit,
                        "string concatenation exceeds the size cap",
                        span,
                    ));
                }
                Ok(Value::Str(joined))
            }
            (Value::Pitch(p), Value::Int(n)) => {
                p.transpose(*n as i32).map(Value::Pitch).ok_or_else(|| {
                    ctx.diag(
                        Code::PitchOutOfRange,
                        format!("pitch {} out of range 0..127", p.key() as i64 + n),
                        span,
                    )
                })
            }
            (Value::Dur(x), Value::Dur(y)) => x.add(y).map(Value::Dur).ok_or_else(|| {
                ctx.diag(
                    Code::TypeMismatch,
                    "duration addition is defined for fractional durations only",
                    span,
                )
            }),
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x + y)),
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 + y)),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
            _ => Err(incompatible(ctx, &a, &b)),
        },
        Sub => match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x - y)),
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 - y)),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x - *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x - y)),
            (Value::Pitch(p), Value::Int(n)) => {
                p.transpose(-(*n as i32)).map(Value::Pitch).ok_or_else(|| {
                    ctx.diag(
                        Code::PitchOutOfRange,
                        format!("pitch {} out of range 0..127", p.key() as i64 - n),
                        span,
                    )
                })
            }
            _ => Err(incompatible(ctx, &a, &b)),
        },
        Mul => match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x * y)),
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 * y)),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x * *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x * y)),
            (Value::Dur(d), Value::Int(n)) | (Value::Int(n), Value::Dur(d)) => {
                d.scale(*n).map(Value::Dur).ok_or_else(|| {
                    ctx.diag(
                        Code::InvalidDuration,
                        format!("cannot scale duration {} by {}", d, n),
                        span,
                    )
                })
            }
            _ => Err(incompatible(ctx, &a, &b)),
        },
        Div => match (&a, &b) {
            (_, Value::Int(0)) => {
                Err(ctx.diag(Code::DivisionByZero, "division by zero", span))
            }
            (_, Value::Float(y)) if *y == 0.0 => {
                Err(ctx.diag(Code::DivisionByZero, "division by zero", span))
            }
            (Value::Int(x), Value::Int(y)) => {
                if x % y == 0 {
                    Ok(Value::Int(x / y))
                } else {
                    Ok(Value::Float(*x as f64 / *y as f64))
                }
            }
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 / y)),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x / *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x / y)),
            (Value::Dur(d), Value::Int(n)) => d.divide(*n).map(Value::Dur).ok_or_else(|| {
                ctx.diag(
                    Code::InvalidDuration,
                    format!("duration {} is not divisible by {}", d, n),
                    span,
                )
            }),
            _ => Err(incompatible(ctx, &a, &b)),
        },
        Rem => match (&a, &b) {
            (_, Value::Int(0)) => {
                Err(ctx.diag(Code::DivisionByZero, "remainder by zero", span))
            }
            (_, Value::Float(y)) if *y == 0.0 => {
                Err(ctx.diag(Code::DivisionByZero, "remainder by zero", span))
            }
            (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x % y)),
            (Value::Int(x), Value::Float(y)) => Ok(Value::Float(*x as f64 % y)),
            (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x % *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x % y)),
            _ => Err(incompatible(ctx, &a, &b)),
        },
        Lt | Le | Gt | Ge => {
            let ordering = match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
                (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
                (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
                (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
                (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
                (Value::Pitch(x), Value::Pitch(y)) => Some(x.key().cmp(&y.key())),
                (Value::Dur(x), Value::Dur(y)) => {
                    match (x.to_ticks(512, &[]), y.to_ticks(512, &[])) {
                        (Some(tx), Some(ty)) if x.is_fractional() == y.is_fractional() => {
                            Some(tx.cmp(&ty))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            let ordering = ordering.ok_or_else(|| incompatible(ctx, &a, &b))?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!("filtered above"),
            };
            Ok(Value::Bool(result))
        }
        _ => unreachable!("handled in eval_binary"),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Pipe => "|>",
        Or => "||",
        And => "&&",
        Coalesce => "??",
        Eq => "==",
        Ne => "!=",
        Lt => "<",
        Le => "<=",
        Gt => ">",
        Ge => ">=",
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        Rem => "%",
        Range => "..",
    }
}

fn match_pattern(pattern: &Pattern, value: &Value) -> Option<Vec<(String, Value)>> {
    match (pattern, value) {
        (Pattern::Wildcard, _) => Some(Vec::new()),
        (Pattern::Binding(name), v) => Some(vec![(name.clone(), v.clone())]),
        (Pattern::Int(p), Value::Int(v)) if p == v => Some(Vec::new()),
        (Pattern::Float(p), Value::Float(v)) if p == v => Some(Vec::new()),
        (Pattern::Str(p), Value::Str(v)) if p == v => Some(Vec::new()),
        (Pattern::Bool(p), Value::Bool(v)) if p == v => Some(Vec::new()),
        (Pattern::Null, Value::Null) => Some(Vec::new()),
        (Pattern::Pitch(p), Value::Pitch(v)) if *p == v.key() => Some(Vec::new()),
        (Pattern::Tuple(patterns), Value::Array(items)) => {
            let items = items.borrow();
            if patterns.len() != items.len() {
                return None;
            }
            let mut bindings = Vec::new();
            for (p, v) in patterns.iter().zip(items.iter()) {
                bindings.extend(match_pattern(p, v)?);
            }
            Some(bindings)
        }
        _ => None,
    }
}

// --- calls ---

/// Dispatch a call through an unevaluated callee expression
///
/// Identifiers resolve through the scope chain first (user definitions
/// shadow built-ins) and fall back to the built-in registry.
pub fn call_expr_callee(
    ctx: &mut EvalContext,
    callee: &Expr,
    args: Vec<Value>,
    scope: ScopeId,
    span: Span,
) -> Result<Value, Diagnostic> {
    if let ExprKind::Ident(name) = &callee.kind {
        if let Some(value) = ctx.scopes.lookup(scope, name) {
            return call_value(ctx, value, args, span);
        }
        if let Some(result) = builtins::dispatch(ctx, name, args, span) {
            return result;
        }
        return Err(ctx.diag(
            Code::UndefinedName,
            format!("undefined function `{}`", name),
            callee.span,
        ));
    }
    let callee_value = eval_expr(ctx, callee, scope)?;
    call_value(ctx, callee_value, args, span)
}

pub fn call_value(
    ctx: &mut EvalContext,
    callee: Value,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    match callee {
        Value::Function(func) => call_function(ctx, func, args, span),
        other => Err(ctx.diag(
            Code::TypeMismatch,
            format!("{} is not callable", other.kind_name()),
            span,
        )),
    }
}

/// Invoke a user function: fresh scope under the *closure* scope, bound
/// parameters, body execution, and `return` translation
pub fn call_function(
    ctx: &mut EvalContext,
    func: Rc<FunctionValue>,
    args: Vec<Value>,
    span: Span,
) -> Result<Value, Diagnostic> {
    if ctx.call_depth >= MAX_CALL_DEPTH {
        return Err(ctx.diag(
            Code::RecursionLimit,
            format!("call depth exceeded {}", MAX_CALL_DEPTH),
            span,
        ));
    }
    if args.len() > func.params.len() {
        return Err(ctx.diag(
            Code::BadArgument,
            format!(
                "{} takes at most {} argument(s) but got {}",
                func.name.as_deref().unwrap_or("function"),
                func.params.len(),
                args.len()
            ),
            span,
        ));
    }

    let call_scope = ctx.scopes.push(func.closure);
    let mut args = args.into_iter();
    for param in &func.params {
        let value = match args.next() {
            Some(v) => v,
            None => match &param.default {
                Some(default) => eval_expr(ctx, default, call_scope)?,
                None => {
                    return Err(ctx.diag(
                        Code::BadArgument,
                        format!("missing argument for parameter `{}`", param.name),
                        span,
                    ));
                }
            },
        };
        ctx.scopes
            .declare(call_scope, &param.name, value, true)
            .map_err(|_| {
                ctx.diag(
                    Code::Redeclaration,
                    format!("duplicate parameter `{}`", param.name),
                    param.span,
                )
            })?;
    }

    ctx.call_depth += 1;
    let result = match &func.body {
        FnBody::Expr(expr) => eval_expr(ctx, expr, call_scope).map(Flow::Returned),
        FnBody::Block(stmts) => exec_stmts(ctx, stmts, call_scope),
    };
    ctx.call_depth -= 1;

    match result? {
        Flow::Returned(value) => Ok(value),
        Flow::Normal => Ok(Value::Null),
        Flow::Broke | Flow::Continued => Err(ctx.diag(
            Code::ParseError,
            "`break`/`continue` outside of a loop",
            span,
        )),
    }
}

// --- shared argument helpers ---

pub fn expect_bool(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<bool, Diagnostic> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ctx.diag(
            Code::TypeMismatch,
            format!("{} must be a bool, found {}", what, other.kind_name()),
            span,
        )),
    }
}

pub fn expect_int_value(
    ctx: &EvalContext,
    value: Value,
    what: &str,
    span: Span,
) -> Result<i64, Diagnostic> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(ctx.diag(
            Code::TypeMismatch,
            format!("{} must be an int, found {}", what, other.kind_name()),
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::scope::ScopeArena;
    use crate::models::Pitch;

    fn ctx() -> EvalContext {
        let (scopes, _) = ScopeArena::new();
        EvalContext::new(scopes, None)
    }

    fn arith(op: BinaryOp, a: Value, b: Value) -> Result<Value, Diagnostic> {
        apply_arith(&ctx(), op, a, b, Span::default())
    }

    #[test]
    fn test_add_widens_int_to_float() {
        assert!(matches!(
            arith(BinaryOp::Add, Value::Int(1), Value::Float(2.5)),
            Ok(Value::Float(v)) if v == 3.5
        ));
        assert!(matches!(arith(BinaryOp::Add, Value::Int(1), Value::Int(2)), Ok(Value::Int(3))));
    }

    #[test]
    fn test_string_concat_wins_over_numbers() {
        let joined = arith(BinaryOp::Add, Value::Str("n=".to_string()), Value::Int(3)).unwrap();
        assert!(matches!(joined, Value::Str(s) if s == "n=3"));
        let joined = arith(BinaryOp::Add, Value::Int(3), Value::Str("!".to_string())).unwrap();
        assert!(matches!(joined, Value::Str(s) if s == "3!"));
    }

    #[test]
    fn test_pitch_plus_int_transposes() {
        let c4 = Value::Pitch(Pitch::parse("C4").unwrap());
        match arith(BinaryOp::Add, c4.clone(), Value::Int(12)).unwrap() {
            Value::Pitch(p) => assert_eq!(p.key(), 72),
            other => panic!("expected pitch, got {:?}", other),
        }
        let err = arith(BinaryOp::Add, c4, Value::Int(100)).unwrap_err();
        assert_eq!(err.code, Code::PitchOutOfRange);
    }

    #[test]
    fn test_duration_addition_is_fraction_only() {
        let q = Value::Dur(Duration::quarter());
        let e = Value::Dur(Duration::fraction(1, 8, 0).unwrap());
        match arith(BinaryOp::Add, q, e).unwrap() {
            Value::Dur(d) => assert_eq!(d, Duration::fraction(3, 8, 0).unwrap()),
            other => panic!("expected dur, got {:?}", other),
        }
        let t = Value::Dur(Duration::ticks(100).unwrap());
        let err = arith(BinaryOp::Add, t.clone(), t).unwrap_err();
        assert_eq!(err.code, Code::TypeMismatch);
    }

    #[test]
    fn test_int_division_exact_vs_float() {
        assert!(matches!(arith(BinaryOp::Div, Value::Int(6), Value::Int(3)), Ok(Value::Int(2))));
        assert!(matches!(
            arith(BinaryOp::Div, Value::Int(7), Value::Int(2)),
            Ok(Value::Float(v)) if v == 3.5
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let err = arith(BinaryOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.code, Code::DivisionByZero);
        let err = arith(BinaryOp::Rem, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.code, Code::DivisionByZero);
        let err = arith(BinaryOp::Div, Value::Float(1.0), Value::Float(0.0)).unwrap_err();
        assert_eq!(err.code, Code::DivisionByZero);
    }

    #[test]
    fn test_duration_scaling_by_int() {
        let q = Value::Dur(Duration::quarter());
        match arith(BinaryOp::Mul, q.clone(), Value::Int(2)).unwrap() {
            Value::Dur(d) => assert_eq!(d, Duration::fraction(1, 2, 0).unwrap()),
            other => panic!("expected dur, got {:?}", other),
        }
        let err = arith(BinaryOp::Div, q, Value::Int(3)).unwrap_err();
        assert_eq!(err.code, Code::InvalidDuration);
    }

    #[test]
    fn test_comparisons() {
        assert!(matches!(
            arith(BinaryOp::Lt, Value::Int(1), Value::Float(1.5)),
            Ok(Value::Bool(true))
        ));
        assert!(matches!(
            arith(BinaryOp::Ge, Value::Str("b".to_string()), Value::Str("a".to_string())),
            Ok(Value::Bool(true))
        ));
        let c4 = Value::Pitch(Pitch::parse("C4").unwrap());
        let d4 = Value::Pitch(Pitch::parse("D4").unwrap());
        assert!(matches!(arith(BinaryOp::Lt, c4, d4), Ok(Value::Bool(true))));
        // incompatible kinds are a type error, not false
        let err = arith(BinaryOp::Lt, Value::Int(1), Value::Str("a".to_string())).unwrap_err();
        assert_eq!(err.code, Code::TypeMismatch);
    }

    #[test]
    fn test_match_pattern_bindings() {
        assert_eq!(match_pattern(&Pattern::Wildcard, &Value::Int(1)), Some(vec![]));
        assert_eq!(match_pattern(&Pattern::Int(1), &Value::Int(2)), None);

        let bound = match_pattern(&Pattern::Binding("n".to_string()), &Value::Int(7)).unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].0, "n");

        let tuple = Pattern::Tuple(vec![Pattern::Int(1), Pattern::Binding("rest".to_string())]);
        let value = Value::array(vec![Value::Int(1), Value::Str("x".to_string())]);
        let bound = match_pattern(&tuple, &value).unwrap();
        assert_eq!(bound.len(), 1);
        // arity mismatch does not match
        let short = Value::array(vec![Value::Int(1)]);
        assert_eq!(match_pattern(&tuple, &short), None);
    }

    #[test]
    fn test_pitch_pattern_matches_key() {
        let c4 = Value::Pitch(Pitch::parse("C4").unwrap());
        assert!(match_pattern(&Pattern::Pitch(60), &c4).is_some());
        assert!(match_pattern(&Pattern::Pitch(61), &c4).is_none());
    }
}
