//! Evaluator: AST → Song-IR

pub mod builtins;
pub mod context;
pub mod exec;
pub mod scope;
pub mod score;
pub mod value;

use std::rc::Rc;

use crate::diagnostics::{Code, Diagnostic};
use crate::ir::SongIR;
use crate::models::Duration;
use crate::parse::ast::{Program, TopDeclKind};

use context::EvalContext;
use exec::{call_function, eval_expr};
use scope::ScopeArena;
use value::{FnBody, FunctionValue, ObjectMap, Value};

/// Evaluate a parsed program into a validated Song-IR
///
/// Function declarations are hoisted, then constants evaluate in source
/// order; a `main` function, if declared, runs last. Returns the song and
/// any accumulated warnings.
pub fn evaluate(
    program: &Program,
    path: Option<&str>,
) -> Result<(SongIR, Vec<Diagnostic>), Diagnostic> {
    let (scopes, root) = ScopeArena::new();
    let mut ctx = EvalContext::new(scopes, path);
    install_prelude(&mut ctx, root);

    // module resolution belongs to the host; unresolved imported names
    // surface as E300 at their use site
    if !program.imports.is_empty() {
        log::debug!("{} import declaration(s) left to the host loader", program.imports.len());
    }

    for decl in &program.body {
        if let TopDeclKind::Fn(f) = &decl.kind {
            let function = Rc::new(FunctionValue {
                name: Some(f.name.clone()),
                params: f.params.clone(),
                body: FnBody::Block(f.body.clone()),
                closure: root,
            });
            ctx.scopes.declare_fn(root, &f.name, function).map_err(|_| {
                ctx.diag(
                    Code::Redeclaration,
                    format!("`{}` is already declared", f.name),
                    decl.span,
                )
            })?;
        }
    }

    for decl in &program.body {
        match &decl.kind {
            TopDeclKind::Fn(_) => {}
            TopDeclKind::TypeAlias(_) => {}
            TopDeclKind::Enum(e) => {
                let mut map = ObjectMap::new();
                let mut next = 0i64;
                for (variant, explicit) in &e.variants {
                    let value = explicit.unwrap_or(next);
                    next = value + 1;
                    map.set(variant, Value::Int(value));
                }
                ctx.scopes
                    .declare(root, &e.name, Value::object(map), false)
                    .map_err(|_| {
                        ctx.diag(
                            Code::Redeclaration,
                            format!("`{}` is already declared", e.name),
                            decl.span,
                        )
                    })?;
            }
            TopDeclKind::Const(c) => {
                let value = eval_expr(&mut ctx, &c.init, root)?;
                exec::bind_const(&mut ctx, &c.target, value, root, decl.span)?;
            }
        }
    }

    if let Some(Value::Function(main)) = ctx.scopes.lookup(root, "main") {
        let span = program
            .body
            .iter()
            .find(|d| matches!(&d.kind, TopDeclKind::Fn(f) if f.name == "main"))
            .map(|d| d.span)
            .unwrap_or_default();
        call_function(&mut ctx, main, Vec::new(), span)?;
    }

    crate::ir::validate(&mut ctx.song)?;
    Ok((ctx.song, ctx.warnings))
}

/// Named duration constants available in every program
fn install_prelude(ctx: &mut EvalContext, root: scope::ScopeId) {
    let durations = [
        ("whole", 1u32),
        ("half", 2),
        ("quarter", 4),
        ("eighth", 8),
        ("sixteenth", 16),
        ("thirtysecond", 32),
        ("sixtyfourth", 64),
    ];
    for (name, den) in durations {
        let dur = Duration::fraction(1, den, 0).expect("static literal");
        ctx.scopes
            .declare(root, name, Value::Dur(dur), false)
            .expect("prelude names are unique");
    }
}
