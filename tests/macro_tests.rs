//! Macro system contract tests through the introspection API.

use hql::{Compiler, TranspileOptions};

fn expand(source: &str) -> Vec<String> {
    let mut c = Compiler::new();
    c.reset();
    c.macroexpand(source, &TranspileOptions::default())
        .unwrap_or_else(|e| panic!("macroexpand failed: {}", e))
}

fn expand1(source: &str) -> Vec<String> {
    let mut c = Compiler::new();
    c.reset();
    c.macroexpand1(source, &TranspileOptions::default())
        .unwrap_or_else(|e| panic!("macroexpand1 failed: {}", e))
}

#[test]
fn template_macros_rewrite_syntax() {
    let out = expand(
        "(macro unless [test body] `(if ~test null ~body)) (unless ready (start))",
    );
    assert_eq!(out, vec!["(if ready null (start))"]);
}

#[test]
fn macroexpand1_leaves_nested_rewrites_in_place() {
    let source = "(macro wrap [x] `(wrapped (wrap2 ~x))) \
                  (macro wrap2 [x] `(inner ~x)) \
                  (wrap 1)";
    let once = expand1(source);
    assert_eq!(once, vec!["(wrapped (wrap2 1))"]);
    let full = expand(source);
    assert_eq!(full, vec!["(wrapped (inner 1))"]);
}

#[test]
fn auto_gensym_shares_within_a_template_and_differs_across_calls() {
    let out = expand(
        "(macro with-tmp [e] `(let (tmp# ~e) (use tmp#))) \
         (with-tmp 1) (with-tmp 2)",
    );
    assert_eq!(out.len(), 2);

    let names: Vec<String> = out
        .iter()
        .map(|form| {
            // (let (tmp_N 1) (use tmp_N))
            let open = form.find("(tmp_").expect("gensym binding");
            let rest = &form[open + 1..];
            rest.split_whitespace().next().unwrap().to_string()
        })
        .collect();
    assert!(out[0].matches(&names[0]).count() >= 2, "shared: {}", out[0]);
    assert_ne!(names[0], names[1], "fresh per invocation");
}

#[test]
fn nested_quasiquote_keeps_inner_unquotes_as_data() {
    let out = expand("(macro m [x] `(outer `(inner ~x))) (m 42)");
    assert_eq!(out, vec!["(outer `(inner ~x))"]);
}

#[test]
fn rest_macro_params_receive_clauses_verbatim() {
    let out = expand(
        "(macro first-clause [& clauses] `(chosen ~(first clauses))) \
         (first-clause (when ready go) (otherwise stop))",
    );
    assert_eq!(out, vec!["(chosen (when ready go))"]);
}

#[test]
fn macro_definitions_scope_left_to_right() {
    // A macro defined after use is not visible to the earlier form.
    let out = expand("(two) (macro two [] 2) (two)");
    assert_eq!(out, vec!["(two)", "2"]);
}

#[test]
fn expansion_warnings_do_not_leak_into_forms() {
    let mut c = Compiler::new();
    c.reset();
    let out = c
        .macroexpand(
            "(macro forever [x] `(forever ~x)) (forever 9)",
            &TranspileOptions::default(),
        )
        .unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("forever"), "form: {}", out[0]);
}
