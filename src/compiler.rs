//! Public compiler API.
//!
//! A `Compiler` owns the scope arena (the persistent macro-time
//! environment) and drives the linker. The embedded JavaScript host is an
//! external collaborator: `run` accepts an adapter closure that evaluates
//! emitted JavaScript; without one, the linked module is written to cache
//! and its output path is returned as the value.

use std::path::{Path, PathBuf};

use crate::codegen::SourceMap;
use crate::errors::{HqlError, SourceContext};
use crate::interp::ScopeArena;
use crate::linker::{LinkOptions, Linker};
use crate::macros::{expand_program, expand_program_once, reset_gensym, ExpandOptions};
use crate::syntax::{read, Sexp};

/// Host evaluator injected into `run`: JavaScript text in, value out.
pub type JsAdapter<'a> = &'a dyn Fn(&str) -> Result<serde_json::Value, HqlError>;

#[derive(Debug, Clone, Default)]
pub struct TranspileOptions {
    pub base_dir: Option<PathBuf>,
    pub current_file: Option<String>,
    pub generate_source_map: bool,
    /// Overrides the source text embedded in the map.
    pub source_content: Option<String>,
    pub strict: bool,
}

#[derive(Debug)]
pub struct TranspileOutput {
    pub code: String,
    pub source_map: Option<SourceMap>,
    pub warnings: Vec<HqlError>,
}

#[derive(Default)]
pub struct RunOptions<'a> {
    pub transpile: TranspileOptions,
    pub cache_dir: Option<PathBuf>,
    /// Host evaluator; `None` returns the emitted module path.
    pub adapter: Option<JsAdapter<'a>>,
}

/// The compiler driver. Owns the arena of scopes; macro definitions and
/// named functions accumulate across compiles until `reset`.
pub struct Compiler {
    arena: ScopeArena,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            arena: ScopeArena::new(),
        }
    }

    /// Transpiles HQL source to JavaScript text plus an optional source
    /// map. No cache writes.
    pub fn transpile(
        &mut self,
        source: &str,
        options: &TranspileOptions,
    ) -> Result<TranspileOutput, HqlError> {
        let name = options
            .current_file
            .clone()
            .unwrap_or_else(|| "<anonymous>".to_string());
        let mut linker = Linker::new(&mut self.arena, link_options(options, None, false));
        let module = linker.link_source(source, &name)?;
        Ok(TranspileOutput {
            code: module.code,
            source_map: module.source_map,
            warnings: module.warnings,
        })
    }

    /// Compiles, writes to cache, and evaluates through the adapter. A
    /// result object carrying a `default` key unwraps to that value.
    pub fn run(
        &mut self,
        source: &str,
        options: &RunOptions,
    ) -> Result<serde_json::Value, HqlError> {
        let name = options
            .transpile
            .current_file
            .clone()
            .unwrap_or_else(|| "<anonymous>".to_string());
        let mut linker = Linker::new(
            &mut self.arena,
            link_options(&options.transpile, options.cache_dir.clone(), true),
        );
        let mut module = linker.link_source(source, &name)?;
        let output = linker.write_entry(&name, &mut module)?;
        match &options.adapter {
            Some(adapter) => {
                let value = adapter(&module.code)?;
                Ok(unwrap_default(value))
            }
            None => Ok(serde_json::Value::String(output.display().to_string())),
        }
    }

    /// Resolves a path, reads it, and delegates to `run` semantics with
    /// the file's directory as the import base.
    pub fn run_file(
        &mut self,
        path: &Path,
        options: &RunOptions,
    ) -> Result<serde_json::Value, HqlError> {
        let mut transpile = options.transpile.clone();
        if transpile.base_dir.is_none() {
            transpile.base_dir = path.parent().map(Path::to_path_buf);
        }
        if transpile.current_file.is_none() {
            transpile.current_file = Some(path.display().to_string());
        }
        let mut linker = Linker::new(
            &mut self.arena,
            link_options(&transpile, options.cache_dir.clone(), true),
        );
        let module = linker.link_file(path)?;
        match &options.adapter {
            Some(adapter) => {
                // A thrown value with a `code` field is a user runtime
                // error; it propagates as-is, never retried.
                let value = adapter(&module.code)?;
                Ok(unwrap_default(value))
            }
            None => {
                let output = module
                    .output_path
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                Ok(serde_json::Value::String(output))
            }
        }
    }

    // ========================================================================
    // MACRO INTROSPECTION
    // ========================================================================

    /// Fully expands the top-level forms and pretty-prints them.
    pub fn macroexpand(
        &mut self,
        source: &str,
        options: &TranspileOptions,
    ) -> Result<Vec<String>, HqlError> {
        let name = options
            .current_file
            .clone()
            .unwrap_or_else(|| "<macroexpand>".to_string());
        let forms = read(source, &name)?;
        let expansion = expand_program(
            forms,
            &mut self.arena,
            SourceContext::from_file(&name, source),
            &expand_options(options),
        )?;
        Ok(expansion.forms.iter().map(Sexp::pretty).collect())
    }

    /// Stops after a single outer rewrite per form.
    pub fn macroexpand1(
        &mut self,
        source: &str,
        options: &TranspileOptions,
    ) -> Result<Vec<String>, HqlError> {
        let name = options
            .current_file
            .clone()
            .unwrap_or_else(|| "<macroexpand>".to_string());
        let forms = read(source, &name)?;
        let expansion = expand_program_once(
            forms,
            &mut self.arena,
            SourceContext::from_file(&name, source),
            &expand_options(options),
        )?;
        Ok(expansion.forms.iter().map(Sexp::pretty).collect())
    }

    /// Resets the three pieces of shared state: the gensym counter, the
    /// persistent macro-time environment, and (per-compile) helper
    /// demand starts fresh anyway. Call between unrelated compiles for
    /// deterministic output.
    pub fn reset(&mut self) {
        reset_gensym();
        self.arena.reset();
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn link_options(
    options: &TranspileOptions,
    cache_dir: Option<PathBuf>,
    write_output: bool,
) -> LinkOptions {
    LinkOptions {
        base_dir: options.base_dir.clone(),
        current_file: options.current_file.clone(),
        generate_source_map: options.generate_source_map,
        source_content: options.source_content.clone(),
        strict: options.strict,
        cache_dir,
        install_dir: None,
        allowed_roots: vec![],
        write_output,
    }
}

fn expand_options(options: &TranspileOptions) -> ExpandOptions {
    ExpandOptions {
        current_file: options.current_file.clone(),
        ..ExpandOptions::default()
    }
}

/// Module values resolve through their `default` export when present.
fn unwrap_default(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) if map.contains_key("default") => {
            map.remove("default").expect("checked key")
        }
        other => other,
    }
}
