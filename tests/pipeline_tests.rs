//! End-to-end pipeline tests at the public API boundary.
//!
//! These follow the compiler contract scenarios: what the user writes,
//! what the compiler emits or rejects, and what the source map says.

use hql::errors::ErrorKind;
use hql::{Compiler, ErrorCategory, TranspileOptions};

fn compiler() -> Compiler {
    let mut c = Compiler::new();
    c.reset();
    c
}

fn transpile(source: &str) -> hql::TranspileOutput {
    compiler()
        .transpile(source, &TranspileOptions::default())
        .unwrap_or_else(|e| panic!("transpile failed: {}", e))
}

fn transpile_err(source: &str) -> hql::HqlError {
    compiler()
        .transpile(source, &TranspileOptions::default())
        .expect_err("expected a compile error")
}

// ============================================================================
// SCENARIO: duplicate declarations
// ============================================================================

#[test]
fn duplicate_let_is_a_validation_error_with_no_output() {
    let err = transpile_err("(let x 10) (let x 20)");
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(
        err.to_string().contains("already been declared"),
        "message: {}",
        err
    );
}

// ============================================================================
// SCENARIO: computation macros evaluate at compile time
// ============================================================================

#[test]
fn nested_computation_macro_folds_to_a_constant() {
    let out = transpile("(macro inc1 [x] (- x 1)) (inc1 (inc1 (inc1 10)))");
    assert!(out.code.contains('7'), "code: {}", out.code);
    assert!(!out.code.contains("inc1"), "code: {}", out.code);
}

#[test]
fn macroexpand_reports_the_expansion() {
    let mut c = compiler();
    let forms = c
        .macroexpand(
            "(macro inc1 [x] (- x 1)) (inc1 (inc1 (inc1 10)))",
            &TranspileOptions::default(),
        )
        .unwrap();
    assert_eq!(forms, vec!["7"]);
}

#[test]
fn macroexpand_is_idempotent() {
    let mut c = compiler();
    let source = "(macro inc1 [x] (- x 1)) (inc1 (inc1 10))";
    let first = c.macroexpand(source, &TranspileOptions::default()).unwrap();
    let mut c2 = compiler();
    let second = c2
        .macroexpand(&first.join("\n"), &TranspileOptions::default())
        .unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// SCENARIO: runtime errors map back to user source
// ============================================================================

#[test]
fn source_map_points_the_third_statement_at_line_3() {
    let source = "(let data [1 2 3])\n(let result (map (fn (x) (* x 2)) data))\n(let bad (/ 10 undefined_var))";
    let out = compiler()
        .transpile(
            source,
            &TranspileOptions {
                generate_source_map: true,
                ..TranspileOptions::default()
            },
        )
        .unwrap();
    let map = out.source_map.expect("map requested");

    // Locate the reference to undefined_var in the emitted text.
    let (line, col) = position_of(&out.code, "undefined_var");
    let (src_line, _src_col) = map
        .original_position_for(line, col)
        .expect("mapping for the faulty expression");
    assert_eq!(src_line, 3, "emitted code:\n{}", out.code);
}

fn position_of(code: &str, needle: &str) -> (u32, u32) {
    for (i, line) in code.lines().enumerate() {
        if let Some(idx) = line.find(needle) {
            let col = line[..idx].encode_utf16().count() as u32;
            return (i as u32 + 1, col);
        }
    }
    panic!("needle '{}' not in code:\n{}", needle, code);
}

// ============================================================================
// SCENARIO: null-prototype map literals
// ============================================================================

#[test]
fn map_literal_emits_null_prototype_construction() {
    let out = transpile("{toString: \"my-value\"}");
    assert!(
        out.code.contains("__hql_hash_map(\"toString\", \"my-value\")"),
        "code: {}",
        out.code
    );
    // The demanded helper lands in the prelude and builds off a null
    // prototype.
    assert!(
        out.code.contains("Object.create(null)"),
        "code: {}",
        out.code
    );
}

// ============================================================================
// SCENARIO: typed arity/argument diagnostics
// ============================================================================

#[test]
fn typed_argument_mismatch_warns_but_compiles() {
    let out = transpile(
        "(fn add [a:number b:number] :number (+ a b)) (add \"hello\" \"world\")",
    );
    assert!(!out.warnings.is_empty());
    let rendered = out.warnings[0].to_string();
    assert!(
        rendered.contains("string") && rendered.contains("number"),
        "warning: {}",
        rendered
    );
    assert!(out.code.contains("add(\"hello\", \"world\")"), "code: {}", out.code);
}

#[test]
fn strict_mode_escalates_type_warnings() {
    let err = compiler()
        .transpile(
            "(fn add [a:number b:number] :number (+ a b)) (add \"hello\" \"world\")",
            &TranspileOptions {
                strict: true,
                ..TranspileOptions::default()
            },
        )
        .expect_err("strict mode should reject");
    assert!(matches!(err.kind, ErrorKind::ArgumentTypeMismatch { .. }));
}

// ============================================================================
// SCENARIO: hygienic swap
// ============================================================================

#[test]
fn gensym_swap_expands_and_compiles() {
    let source = "(macro swap [a b] (var tmp (gensym \"swap_tmp\")) \
                  `(let (~tmp ~a) (set! ~a ~b) (set! ~b ~tmp))) \
                  (var x 10) (var y 20) (swap x y) [x y]";
    let out = transpile(source);
    assert!(out.code.contains("let swap_tmp_"), "code: {}", out.code);
    assert!(out.code.contains("x = y"), "code: {}", out.code);
    assert!(out.code.contains("[x, y]"), "code: {}", out.code);
}

// ============================================================================
// WRAPPING CONTRACT
// ============================================================================

#[test]
fn plain_programs_wrap_in_a_strict_iife() {
    let out = transpile("(let x 1) (+ x 1)");
    assert!(out.code.contains("(function () {"), "code: {}", out.code);
    assert!(out.code.contains("\"use strict\";"), "code: {}", out.code);
    assert!(out.code.contains("return x + 1;"), "code: {}", out.code);
    assert!(out.code.trim_end().ends_with("})();"), "code: {}", out.code);
}

#[test]
fn exporting_programs_emit_an_unwrapped_module() {
    let out = transpile("(fn inc [n] (+ n 1)) (export [inc])");
    assert!(out.code.contains("export { inc };"), "code: {}", out.code);
    assert!(!out.code.contains("(function () {"), "code: {}", out.code);
}

#[test]
fn const_emits_a_deep_freeze_call() {
    let out = transpile("(const config {mode: \"fast\"})");
    assert!(
        out.code.contains("__hql_deepFreeze(__hql_hash_map(\"mode\", \"fast\"))"),
        "code: {}",
        out.code
    );
    assert!(out.code.contains("function __hql_deepFreeze"), "code: {}", out.code);
}

#[test]
fn helpers_appear_only_on_demand() {
    let out = transpile("(+ 1 2)");
    assert!(!out.code.contains("__hql_hash_map"), "code: {}", out.code);
    assert!(!out.code.contains("__hql_get"), "code: {}", out.code);
}

// ============================================================================
// EXPANSION LIMITS
// ============================================================================

#[test]
fn infinite_macro_warns_and_terminates() {
    let out = transpile("(macro forever [x] `(forever ~x)) (forever 1)");
    assert!(
        out.warnings.iter().any(|w| w.is_warning()),
        "expected an iteration-limit warning"
    );
}

// ============================================================================
// RUN WITHOUT A HOST ADAPTER
// ============================================================================

#[test]
fn run_without_adapter_returns_the_cache_path() {
    let cache = std::env::temp_dir().join("hql-test-cache-run");
    let mut c = compiler();
    let value = c
        .run(
            "(+ 1 2)",
            &hql::RunOptions {
                transpile: TranspileOptions {
                    generate_source_map: true,
                    ..TranspileOptions::default()
                },
                cache_dir: Some(cache.clone()),
                ..hql::RunOptions::default()
            },
        )
        .unwrap();
    let path = value.as_str().expect("path value");
    assert!(path.ends_with(".mjs"), "path: {}", path);
    assert!(std::path::Path::new(path).exists());
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("//# sourceMappingURL="), "{}", written);
    assert!(std::path::Path::new(&format!("{}.map", path)).exists());
    std::fs::remove_dir_all(&cache).ok();
}

#[test]
fn run_with_adapter_receives_the_emitted_code() {
    let cache = std::env::temp_dir().join("hql-test-cache-adapter");
    let mut c = compiler();
    let adapter = |code: &str| -> Result<serde_json::Value, hql::HqlError> {
        // Literal arithmetic folds at compile time.
        assert!(code.contains("return 3;"), "code: {}", code);
        Ok(serde_json::json!({ "default": 3 }))
    };
    let value = c
        .run(
            "(+ 1 2)",
            &hql::RunOptions {
                cache_dir: Some(cache.clone()),
                adapter: Some(&adapter),
                ..hql::RunOptions::default()
            },
        )
        .unwrap();
    assert_eq!(value, serde_json::json!(3));
    std::fs::remove_dir_all(&cache).ok();
}
