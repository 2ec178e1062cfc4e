// Language semantics observed through the produced Song-IR.

use melos::ir::TrackEvent;
use melos::{compile_to_ir, Code, SongIR};

/// Compile a clip body into a one-track song and return (song, warnings)
fn compile_clip(body: &str) -> (SongIR, Vec<melos::Diagnostic>) {
    let source = format!(
        r#"
const main_clip = clip {{
{}
}};

const song = score {{
    tempo {{ 1:1 -> 120bpm; }}
    meter {{ 1:1 -> 4/4; }}
    sound "piano" kind synth {{ program: 0; }}
    track "lead" role melody sound "piano" {{
        place 1:1, main_clip;
    }}
}};
"#,
        body
    );
    compile_to_ir(&source, None).unwrap()
}

fn clip_error(body: &str) -> melos::Diagnostic {
    let source = format!(
        r#"
const main_clip = clip {{
{}
}};

const song = score {{
    tempo {{ 1:1 -> 120bpm; }}
    meter {{ 1:1 -> 4/4; }}
    sound "piano" kind synth {{ program: 0; }}
    track "lead" role melody sound "piano" {{
        place 1:1, main_clip;
    }}
}};
"#,
        body
    );
    compile_to_ir(&source, None).unwrap_err()
}

fn note_keys(song: &SongIR) -> Vec<u8> {
    song.tracks[0]
        .events()
        .iter()
        .filter_map(|e| match e {
            TrackEvent::Note { key, .. } => Some(*key),
            _ => None,
        })
        .collect()
}

fn note_ticks(song: &SongIR) -> Vec<(u64, u64)> {
    song.tracks[0]
        .events()
        .iter()
        .filter_map(|e| match e {
            TrackEvent::Note { tick, dur, .. } => Some((*tick, *dur)),
            _ => None,
        })
        .collect()
}

// --- core language ---

#[test]
fn test_let_assignment_and_arithmetic() {
    let (song, _) = compile_clip(
        "let k = 2 * 3 + 1;
         k = k + 5;
         note(C4 + k, q);",
    );
    assert_eq!(note_keys(&song), vec![72]);
}

#[test]
fn test_for_range_loop_emits_scale() {
    let (song, _) = compile_clip(
        "for i in 0..4 {
             note(C4 + i, q);
         }",
    );
    assert_eq!(note_keys(&song), vec![60, 61, 62, 63]);
    let ticks = note_ticks(&song);
    assert_eq!(ticks[3].0, 3 * 480);
}

#[test]
fn test_while_with_break_and_continue() {
    let (song, _) = compile_clip(
        "let i = 0;
         while true {
             i = i + 1;
             if i == 2 { continue; }
             if i > 4 { break; }
             note(C4 + i, q);
         }",
    );
    // i = 1, 3, 4 emit; 2 skipped; 5 breaks
    assert_eq!(note_keys(&song), vec![61, 63, 64]);
}

#[test]
fn test_function_call_and_pipe() {
    let source = r#"
fn double(n) {
    return n * 2;
}

const main_clip = clip {
    const k = 5 |> double;
    note(C4 + k, q);
};

const song = score {
    tempo { 1:1 -> 120bpm; }
    meter { 1:1 -> 4/4; }
    sound "piano" kind synth { program: 0; }
    track "lead" role melody sound "piano" { place 1:1, main_clip; }
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    assert_eq!(note_keys(&song), vec![70]);
}

#[test]
fn test_closures_capture_definition_scope() {
    // the arrow reads `base` from the scope it was defined in, not from
    // the caller's scope
    let source = r#"
fn makeAdder(base) {
    return (n) => base + n;
}

const main_clip = clip {
    const add5 = makeAdder(5);
    const base = 100;
    note(C4 + add5(3), q);
};

const song = score {
    tempo { 1:1 -> 120bpm; }
    meter { 1:1 -> 4/4; }
    sound "piano" kind synth { program: 0; }
    track "lead" role melody sound "piano" { place 1:1, main_clip; }
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    assert_eq!(note_keys(&song), vec![68]);
}

#[test]
fn test_match_with_guard_and_else() {
    let (song, _) = compile_clip(
        "const pick = (n) => match(n) {
             0 -> 0;
             m if m < 3 -> 10;
             else -> 20;
         };
         note(C4 + pick(0), s);
         note(C4 + pick(2), s);
         note(C4 + pick(9), s);",
    );
    assert_eq!(note_keys(&song), vec![60, 70, 80]);
}

#[test]
fn test_destructuring_with_rest() {
    let (song, _) = compile_clip(
        "const (first, second, ...others) = [1, 2, 3, 4];
         note(C4 + first, q);
         note(C4 + second, q);
         note(C4 + len(others), q);",
    );
    assert_eq!(note_keys(&song), vec![61, 62, 62]);
}

#[test]
fn test_template_and_objects() {
    let (song, _) = compile_clip(
        r#"const cfg = {root: C4, label: `song-${1 + 2}`};
         note(cfg.root, q);
         note(cfg.root + len(cfg.label), q);"#,
    );
    // "song-3" has 6 characters
    assert_eq!(note_keys(&song), vec![60, 66]);
}

#[test]
fn test_optional_chaining_and_coalesce() {
    let (song, _) = compile_clip(
        "const cfg = null;
         const k = cfg?.offset ?? 7;
         note(C4 + k, q);",
    );
    assert_eq!(note_keys(&song), vec![67]);
}

#[test]
fn test_shared_arrays_and_copy() {
    let (song, _) = compile_clip(
        "let a = [1];
         let b = a;
         push(b, 2);
         let c = copy(a);
         push(c, 3);
         note(C4 + len(a), q);
         note(C4 + len(c), q);",
    );
    // `b` shares storage with `a`, `c` does not
    assert_eq!(note_keys(&song), vec![62, 63]);
}

// --- musical semantics ---

#[test]
fn test_triplet_durations_total_two_quarters() {
    let (song, _) = compile_clip(
        "triplet(3) {
             note(C4, q);
             note(D4, q);
             note(E4, q);
         }",
    );
    let ticks = note_ticks(&song);
    assert_eq!(ticks, vec![(0, 320), (320, 320), (640, 320)]);
    let total: u64 = ticks.iter().map(|(_, d)| d).sum();
    assert_eq!(total, 960);
}

#[test]
fn test_nested_tuplets_compose() {
    let (song, _) = compile_clip(
        "triplet(3) {
             triplet(3) {
                 note(C4, q);
             }
         }",
    );
    // 480 × 2/3 × 2/3 = 213.33… rounds half-up to 213
    assert_eq!(note_ticks(&song), vec![(0, 213)]);
}

#[test]
fn test_position_jump_and_sub_ticks() {
    let (song, _) = compile_clip(
        "at(2:1);
         note(C4, q);
         at(time(1, 3, 240));
         note(D4, q);",
    );
    let ticks = note_ticks(&song);
    assert_eq!(ticks[0].0, 1920);
    assert_eq!(ticks[1].0, 1200);
}

#[test]
fn test_articulations_reshape_duration_but_not_cursor() {
    let (song, _) = compile_clip(
        r#"note(C4, q, {art: "staccato"});
         note(D4, q, {art: "accent", vel: 80});"#,
    );
    let events = song.tracks[0].events();
    match &events[0] {
        TrackEvent::Note { dur, .. } => assert_eq!(*dur, 240),
        other => panic!("expected note, got {:?}", other),
    }
    match &events[1] {
        TrackEvent::Note { tick, vel, .. } => {
            // cursor advanced by the full base quarter
            assert_eq!(*tick, 480);
            assert_eq!(*vel, 100);
        }
        other => panic!("expected note, got {:?}", other),
    }
}

#[test]
fn test_chord_emits_simultaneous_notes() {
    let (song, _) = compile_clip("chord([C4, E4, G4], h); note(C5, q);");
    let ticks = note_ticks(&song);
    assert_eq!(ticks[0], (0, 960));
    assert_eq!(ticks[1], (0, 960));
    assert_eq!(ticks[2], (0, 960));
    assert_eq!(ticks[3].0, 960);
}

#[test]
fn test_trill_expands_to_thirty_seconds() {
    let (song, _) = compile_clip("trill(C4, q);");
    let ticks = note_ticks(&song);
    // 480 / 60-tick 32nds = 8 alternating notes
    assert_eq!(ticks.len(), 8);
    assert!(ticks.iter().all(|(_, d)| *d == 60));
    let keys = note_keys(&song);
    assert_eq!(keys[0], 60);
    assert_eq!(keys[1], 62);
    assert_eq!(keys[7], 62);
}

#[test]
fn test_glissando_one_note_per_semitone() {
    let (song, _) = compile_clip("glissando(C4, E4, q);");
    assert_eq!(note_keys(&song), vec![60, 61, 62, 63, 64]);
    let ticks = note_ticks(&song);
    assert!(ticks.iter().all(|(_, d)| *d == 96));
}

#[test]
fn test_mordent_shape() {
    let (song, _) = compile_clip("mordent(C4, q);");
    assert_eq!(note_keys(&song), vec![60, 62, 60]);
    let ticks = note_ticks(&song);
    assert_eq!(ticks[0], (0, 60));
    assert_eq!(ticks[1], (60, 60));
    assert_eq!(ticks[2], (120, 360));
}

#[test]
fn test_events_sorted_by_tick_after_validation() {
    let (song, _) = compile_clip(
        "noteAt(960, E4, q);
         note(C4, q);
         note(D4, q);",
    );
    let events = song.tracks[0].events();
    let ticks: Vec<u64> = events.iter().map(|e| e.tick()).collect();
    let mut sorted = ticks.clone();
    sorted.sort();
    assert_eq!(ticks, sorted);
}

#[test]
fn test_cc_and_pitch_bend_events() {
    let (song, _) = compile_clip(
        "cc(64, 127);
         pitchBend(-8192);
         pitchBend(8191);",
    );
    let events = song.tracks[0].events();
    assert!(matches!(events[0], TrackEvent::Cc { controller: 64, value: 127, .. }));
    assert!(matches!(events[1], TrackEvent::PitchBend { value: -8192, .. }));
    assert!(matches!(events[2], TrackEvent::PitchBend { value: 8191, .. }));
}

#[test]
fn test_notation_events_preserved_in_ir() {
    let (song, _) = compile_clip(
        r#"slurStart();
         note(C4, q);
         slurEnd();
         dynamics("mf");
         crescendo(h);
         fermata();"#,
    );
    let events = song.tracks[0].events();
    assert!(events.iter().any(|e| matches!(e, TrackEvent::SlurStart { .. })));
    assert!(events.iter().any(|e| matches!(e, TrackEvent::SlurEnd { .. })));
    assert!(events.iter().any(|e| matches!(e, TrackEvent::Dynamics { marking, .. } if marking == "mf")));
    assert!(events
        .iter()
        .any(|e| matches!(e, TrackEvent::Hairpin { crescendo: true, end_tick: 1440, .. })));
    assert!(events.iter().any(|e| matches!(e, TrackEvent::Fermata { .. })));
}

#[test]
fn test_score_markers() {
    let source = r#"
const song = score {
    tempo { 1:1 -> 120bpm; }
    meter { 1:1 -> 4/4; }
    marker(2:1, "section", "chorus");
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    assert_eq!(song.markers.len(), 1);
    assert_eq!(song.markers[0].tick, 1920);
    assert_eq!(song.markers[0].label, "chorus");
}

#[test]
fn test_meter_change_shifts_bars() {
    let source = r#"
const main_clip = clip {
    at(3:1);
    note(C4, q);
};

const song = score {
    tempo { 1:1 -> 120bpm; }
    meter { 1:1 -> 4/4; 2:1 -> 3/4; }
    sound "piano" kind synth { program: 0; }
    track "lead" role melody sound "piano" { place 1:1, main_clip; }
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    // bar 1 = 1920 ticks of 4/4, bar 2 = 1440 ticks of 3/4
    assert_eq!(note_ticks(&song)[0].0, 1920 + 1440);
}

// --- diagnostics ---

#[test]
fn test_transpose_out_of_range_is_e110() {
    let err = clip_error("const p = transpose(G9, 5);");
    assert_eq!(err.code.as_str(), "E110");
    assert!(err.message.contains("out of range 0..127"));
}

#[test]
fn test_cc_out_of_range_is_e121() {
    let err = clip_error("cc(64, 128);");
    assert_eq!(err.code.as_str(), "E121");
}

#[test]
fn test_undefined_variable_is_e300() {
    let err = clip_error("note(C4 + missing, q);");
    assert_eq!(err.code, Code::UndefinedName);
}

#[test]
fn test_redeclaration_is_e301() {
    let err = clip_error("const a = 1; const a = 2;");
    assert_eq!(err.code, Code::Redeclaration);
}

#[test]
fn test_assign_to_const_is_e302() {
    let err = clip_error("const a = 1; a = 2;");
    assert_eq!(err.code, Code::AssignToImmutable);
}

#[test]
fn test_division_by_zero_is_e303() {
    let err = clip_error("const a = 1 / 0;");
    assert_eq!(err.code, Code::DivisionByZero);
}

#[test]
fn test_recursion_limit_is_e310() {
    let source = r#"
fn forever(n) {
    return forever(n + 1);
}

const x = forever(0);
"#;
    let err = compile_to_ir(source, None).unwrap_err();
    assert_eq!(err.code, Code::RecursionLimit);
}

#[test]
fn test_loop_limit_is_e401() {
    let err = clip_error("let i = 0; while true { i = i + 1; }");
    assert_eq!(err.code, Code::LoopLimit);
}

#[test]
fn test_allocation_cap_is_e402() {
    let err = clip_error("const big = fill(0, 2000000);");
    assert_eq!(err.code, Code::AllocationLimit);
}

#[test]
fn test_track_builtin_outside_track_is_e050() {
    let err = compile_to_ir("const x = note(C4, q);", None).unwrap_err();
    assert_eq!(err.code, Code::PhaseViolation);
}

#[test]
fn test_tuplet_shrinking_below_one_tick_is_e101() {
    let err = clip_error(
        "tuplet(64, 1) {
             tuplet(64, 1) {
                 note(C4, x);
             }
         }",
    );
    assert_eq!(err.code, Code::InvalidDuration);
}

#[test]
fn test_beat_out_of_range_is_e102() {
    let err = clip_error("at(1:7);");
    assert_eq!(err.code, Code::PositionOutOfRange);
}

#[test]
fn test_missing_tempo_at_zero_is_e010() {
    let source = r#"
const song = score {
    tempo { 2:1 -> 90bpm; }
    meter { 1:1 -> 4/4; }
};
"#;
    let err = compile_to_ir(source, None).unwrap_err();
    assert_eq!(err.code, Code::MissingTempoAtZero);
}

#[test]
fn test_duplicate_tempo_at_zero_last_wins() {
    let source = r#"
const song = score {
    tempo { 1:1 -> 120bpm; 1:1 -> 140bpm; }
    meter { 1:1 -> 4/4; }
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    assert_eq!(song.tempos.len(), 1);
    assert_eq!(song.tempos[0].bpm, 140.0);
}

#[test]
fn test_tempo_ramp_emits_intermediate_events() {
    let source = r#"
const song = score {
    tempo {
        1:1 -> 120bpm;
        2:1 -> 3:1 ramp 60bpm;
    }
    meter { 1:1 -> 4/4; }
};
"#;
    let (song, _) = compile_to_ir(source, None).unwrap();
    // samples at 1920, 2400, 2880, 3360, and the target at 3840
    assert_eq!(song.tempos.len(), 6);
    assert_eq!(song.tempos.last().unwrap().tick, 3840);
    assert_eq!(song.tempos.last().unwrap().bpm, 60.0);
    // linear: halfway through the bar sits halfway between the tempos
    let mid = song.tempos.iter().find(|t| t.tick == 2880).unwrap();
    assert!((mid.bpm - 90.0).abs() < 1e-9);
}
