//! Melos — a compiler for a music-composition language
//!
//! A Melos program describes a song: tempo and meter maps, instrument
//! definitions, and per-track note sequences with lyrics, articulations,
//! and ornaments. Compilation produces a Song-IR (the stable boundary
//! data model) and, from that, a byte-exact Standard MIDI File (Format 1).
//!
//! ## Compilation pipeline
//!
//! ```text
//! source → lexer → tokens → parser → AST → evaluator → Song-IR → SMF bytes
//! ```
//!
//! 1. **Lexer** ([`parse::lexer`]) — tokenizes source, including the
//!    music-specific literals (pitches, durations, `bar:beat` positions)
//! 2. **Parser** ([`parse::parser`]) — recursive descent into the AST
//! 3. **Evaluator** ([`eval`]) — walks the AST against lexical scopes,
//!    tracks per-part cursors and tuplet contexts, and populates the IR
//! 4. **SMF writer** ([`renderers::midi`]) — serializes the MIDI portion
//!    of the IR to bytes
//!
//! Every stage short-circuits on the first error [`Diagnostic`]; warnings
//! accumulate and come back alongside the output.
//!
//! ## Quick start
//!
//! ```
//! let source = r#"
//!     const intro = clip {
//!         note(C4, q);
//!         note(E4, q);
//!         note(G4, h);
//!     };
//!
//!     const song = score {
//!         tempo { 1:1 -> 120bpm; }
//!         meter { 1:1 -> 4/4; }
//!         sound "piano" kind synth { program: 0; }
//!         track "lead" role melody sound "piano" {
//!             place 1:1, intro;
//!         }
//!     };
//! "#;
//!
//! let output = melos::compile(source, None)?;
//! assert_eq!(&output.midi[0..4], b"MThd");
//! # Ok::<(), melos::Diagnostic>(())
//! ```

pub mod diagnostics;
pub mod eval;
pub mod ir;
pub mod models;
pub mod parse;
pub mod renderers;

pub use diagnostics::{Code, Diagnostic, Severity};
pub use ir::SongIR;

/// Result of a full compilation
pub struct CompileOutput {
    pub ir: SongIR,
    /// SMF Format 1 bytes
    pub midi: Vec<u8>,
    pub warnings: Vec<Diagnostic>,
}

/// Compile source to Song-IR, without serializing MIDI
///
/// Returns the validated IR and accumulated warnings, or the first error.
pub fn compile_to_ir(
    source: &str,
    path: Option<&str>,
) -> Result<(SongIR, Vec<Diagnostic>), Diagnostic> {
    let (tokens, mut warnings) = parse::tokenize(source, path)?;
    let program = parse::parse(tokens, path)?;
    let (song, eval_warnings) = eval::evaluate(&program, path)?;
    warnings.extend(eval_warnings);
    Ok((song, warnings))
}

/// Compile source all the way to SMF bytes
pub fn compile(source: &str, path: Option<&str>) -> Result<CompileOutput, Diagnostic> {
    let (ir, warnings) = compile_to_ir(source, path)?;
    let midi = renderers::midi::write_smf(&ir)?;
    Ok(CompileOutput { ir, midi, warnings })
}
