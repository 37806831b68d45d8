//! Module linker - the pipeline entry.
//!
//! The linker drives the full pipeline on a source, scans the emitted
//! JavaScript for import/export statements, recursively compiles HQL
//! dependencies through a deduplicating module graph, decides the wrapper
//! (ES module vs self-contained IIFE), prepends the runtime-helper
//! prelude, and writes `.mjs` + `.mjs.map` outputs to the cache directory
//! with temp-file-plus-rename.

pub mod helpers;
pub mod resolver;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::codegen::sourcemap::{encode_mappings, shift_lines, SourceMap};
use crate::codegen::{generate, Mapping};
use crate::errors::{
    io_error, unspanned, ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext,
};
use crate::interp::ScopeArena;
use crate::ir::IrKind;
use crate::lower::lower_program;
use crate::macros::{expand_program, ExpandOptions};
use crate::optimize::{optimize, required_helpers};
use crate::syntax::read;
use crate::validate::{validate, ValidateOptions};

use resolver::{normalize, Resolved, Resolver};

// ============================================================================
// OPTIONS AND RESULTS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Directory relative specifiers resolve against for the entry.
    pub base_dir: Option<PathBuf>,
    /// Name used in diagnostics and the source map for the entry source.
    pub current_file: Option<String>,
    pub generate_source_map: bool,
    /// Overrides the map's embedded source text.
    pub source_content: Option<String>,
    pub strict: bool,
    /// Where emitted modules land; defaults to a per-user temp cache.
    pub cache_dir: Option<PathBuf>,
    /// Location of on-disk `@hql/` packages.
    pub install_dir: Option<PathBuf>,
    /// When non-empty, every resolved module path must fall under one.
    pub allowed_roots: Vec<PathBuf>,
    /// Skip cache writes (pure transpilation).
    pub write_output: bool,
}

/// One linked module, ready for the host.
#[derive(Debug)]
pub struct CompiledModule {
    pub code: String,
    pub source_map: Option<SourceMap>,
    pub output_path: Option<PathBuf>,
    pub is_es_module: bool,
    pub warnings: Vec<HqlError>,
}

/// Per-entry-compile record of resolved modules. The output path
/// registers before the module body compiles, so an import cycle resolves
/// to the in-flight path, and the set guarantees at most one compilation
/// per (entry, module) pair.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    module_outputs: HashMap<PathBuf, PathBuf>,
    in_flight: HashSet<PathBuf>,
    pub compilations: usize,
}

impl ModuleGraph {
    /// Read-only view of resolved module outputs.
    pub fn module_outputs(&self) -> &HashMap<PathBuf, PathBuf> {
        &self.module_outputs
    }
}

pub struct Linker<'a> {
    pub arena: &'a mut ScopeArena,
    pub options: LinkOptions,
    pub graph: ModuleGraph,
}

// ============================================================================
// IMPORT/EXPORT SCANNING
// ============================================================================

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[\w$*{},\s]+?\s+from\s+)?["']([^"']+)["']"#)
        .expect("import regex compiles")
});

static EXPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*export\s").expect("export regex compiles"));

/// Extracts import specifiers from emitted code (imports are only
/// meaningful at top-of-file, but the scan is whole-text).
pub fn scan_import_specifiers(code: &str) -> Vec<String> {
    IMPORT_RE
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn has_exports(code: &str) -> bool {
    EXPORT_RE.is_match(code)
}

// ============================================================================
// LINKER
// ============================================================================

impl<'a> Linker<'a> {
    pub fn new(arena: &'a mut ScopeArena, options: LinkOptions) -> Self {
        Linker {
            arena,
            options,
            graph: ModuleGraph::default(),
        }
    }

    /// Links source text as the entry module.
    pub fn link_source(&mut self, source: &str, name: &str) -> Result<CompiledModule, HqlError> {
        let importer_dir = self
            .options
            .base_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        self.link(source, name, &importer_dir, true)
    }

    /// Resolves, reads, and links a file as the entry module.
    pub fn link_file(&mut self, path: &Path) -> Result<CompiledModule, HqlError> {
        let normalized = normalize(path);
        let source = std::fs::read_to_string(&normalized)
            .map_err(|e| io_error("read", &normalized.display().to_string(), e))?;
        let importer_dir = normalized
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = normalized.display().to_string();
        let mut module = self.link(&source, &name, &importer_dir, true)?;
        if self.options.write_output && module.output_path.is_none() {
            module.output_path = Some(self.write_module(&normalized, &mut module)?);
        }
        Ok(module)
    }

    fn link(
        &mut self,
        source: &str,
        name: &str,
        importer_dir: &Path,
        is_entry: bool,
    ) -> Result<CompiledModule, HqlError> {
        self.graph.compilations += 1;
        let source_ctx = SourceContext::from_file(name, source);

        // === Pipeline: read -> expand -> validate -> lower -> optimize ===
        let forms = read(source, name)?;
        let expand_options = ExpandOptions {
            current_file: Some(name.to_string()),
            ..ExpandOptions::default()
        };
        let expansion = expand_program(forms, self.arena, source_ctx.clone(), &expand_options)?;
        let mut warnings = expansion.warnings;

        let validation = validate(
            &expansion.forms,
            source_ctx.clone(),
            &ValidateOptions {
                strict: self.options.strict,
            },
        )?;
        warnings.extend(validation.warnings);

        let program = lower_program(&expansion.forms, source_ctx.clone())?;
        let program = optimize(program);
        let demanded = required_helpers(&program);

        // === Wrapping decision ===
        let has_import_decls = program_has(&program, |k| {
            matches!(k, IrKind::ImportDeclaration { .. })
        });
        let has_export_decls = program_has(&program, |k| {
            matches!(k, IrKind::ExportNamedDeclaration { .. })
        });
        let is_es_module = has_import_decls || has_export_decls;
        let wrap_body = !has_export_decls;

        let generated = generate(&program, wrap_body)?;
        let mut code = generated.code;
        let mut mappings = generated.mappings;

        // === Dependency resolution and specifier rewriting ===
        let resolver = Resolver {
            importer_dir: importer_dir.to_path_buf(),
            install_dir: self.options.install_dir.clone(),
            allowed_roots: self.options.allowed_roots.clone(),
        };
        for specifier in scan_import_specifiers(&code) {
            match resolver.classify(&specifier)? {
                Resolved::PassThrough => {}
                Resolved::Embedded {
                    name: pkg_name,
                    source: pkg_source,
                } => {
                    let output = self.link_embedded_package(&pkg_name, &pkg_source)?;
                    code = rewrite_specifier(&code, &specifier, &file_url(&output));
                }
                Resolved::HqlFile(path) => {
                    let output = self.link_module_file(&path)?;
                    code = rewrite_specifier(&code, &specifier, &file_url(&output));
                }
            }
        }

        // === Prelude and wrapper assembly ===
        let (prelude, prelude_lines) =
            helpers::prelude_for(demanded.iter().copied());

        let final_code;
        if is_es_module {
            // Module semantics forbid the IIFE wrapper. Entry modules with
            // imports but no exports wrap the body (not the imports) so
            // the default export resolves to the last expression.
            if wrap_body {
                let (import_lines, body_lines) = split_imports(&code);
                let import_count = import_lines.lines().count();
                let mut text = String::new();
                text.push_str(&import_lines);
                text.push_str(&prelude);
                text.push_str("export default (async () => {\n");
                text.push_str(&body_lines);
                if !body_lines.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str("})();\n");
                shift_split_mappings(
                    &mut mappings,
                    import_count as u32,
                    prelude_lines as u32 + 1,
                );
                final_code = text;
            } else {
                let mut text = String::new();
                text.push_str(&prelude);
                text.push_str(&code);
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                shift_lines(&mut mappings, prelude_lines as u32);
                final_code = text;
            }
        } else if is_entry {
            // Self-contained program: synchronous IIFE returning the last
            // expression, `"use strict"` re-emitted as its first
            // statement to keep directive semantics.
            let mut text = String::new();
            text.push_str(&prelude);
            text.push_str("(function () {\n\"use strict\";\n");
            text.push_str(&code);
            if !code.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("})();\n");
            shift_lines(&mut mappings, prelude_lines as u32 + 2);
            final_code = text;
        } else {
            // A dependency with no exports: its default export is the
            // last expression.
            let mut text = String::new();
            text.push_str(&prelude);
            text.push_str("export default (async () => {\n");
            text.push_str(&code);
            if !code.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("})();\n");
            shift_lines(&mut mappings, prelude_lines as u32 + 1);
            final_code = text;
        }

        let source_map = if self.options.generate_source_map {
            let content = self
                .options
                .source_content
                .clone()
                .or_else(|| Some(source.to_string()));
            Some(SourceMap::new(
                name,
                content,
                encode_mappings(&mappings),
            ))
        } else {
            None
        };

        Ok(CompiledModule {
            code: final_code,
            source_map,
            output_path: None,
            is_es_module,
            warnings,
        })
    }

    // ========================================================================
    // MODULE GRAPH
    // ========================================================================

    /// Compiles a dependency `.hql` file, deduplicated through the graph.
    fn link_module_file(&mut self, path: &Path) -> Result<PathBuf, HqlError> {
        let normalized = normalize(path);
        if let Some(output) = self.graph.module_outputs.get(&normalized) {
            return Ok(output.clone());
        }

        // Register before compiling: a cycle back to this module resolves
        // to the in-flight output path.
        let output = self.output_path_for(&normalized);
        self.graph
            .module_outputs
            .insert(normalized.clone(), output.clone());
        self.graph.in_flight.insert(normalized.clone());

        let source = std::fs::read_to_string(&normalized)
            .map_err(|e| io_error("read", &normalized.display().to_string(), e))?;
        let importer_dir = normalized
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = normalized.display().to_string();
        let mut module = self.link(&source, &name, &importer_dir, false)?;
        self.write_module_to(&output, &mut module)?;

        self.graph.in_flight.remove(&normalized);
        Ok(output)
    }

    fn link_embedded_package(&mut self, pkg: &str, source: &str) -> Result<PathBuf, HqlError> {
        let pseudo_path = PathBuf::from(format!("@hql/{}/mod.hql", pkg));
        if let Some(output) = self.graph.module_outputs.get(&pseudo_path) {
            return Ok(output.clone());
        }
        let output = self.output_path_for(&pseudo_path);
        self.graph
            .module_outputs
            .insert(pseudo_path.clone(), output.clone());
        let name = format!("@hql/{}", pkg);
        let mut module = self.link(source, &name, Path::new("."), false)?;
        self.write_module_to(&output, &mut module)?;
        Ok(output)
    }

    // ========================================================================
    // CACHE OUTPUT
    // ========================================================================

    /// Writes an entry module compiled from raw source (no on-disk path);
    /// the cache name derives from the diagnostic name.
    pub fn write_entry(
        &self,
        name: &str,
        module: &mut CompiledModule,
    ) -> Result<PathBuf, HqlError> {
        let pseudo = PathBuf::from(name);
        let output = self.output_path_for(&pseudo);
        self.write_module_to(&output, module)?;
        Ok(output)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.options
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hql-cache"))
    }

    fn output_path_for(&self, module: &Path) -> PathBuf {
        let stem = module
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module");
        let mut hasher = Sha256::new();
        hasher.update(module.display().to_string().as_bytes());
        let digest = hasher.finalize();
        let hash: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        self.cache_dir().join(format!("{}-{}.mjs", stem, hash))
    }

    fn write_module(
        &self,
        module: &Path,
        compiled: &mut CompiledModule,
    ) -> Result<PathBuf, HqlError> {
        let output = self.output_path_for(module);
        self.write_module_to(&output, compiled)?;
        Ok(output)
    }

    /// Writes `.mjs` and `.mjs.map` via temp-file-plus-rename, appends the
    /// sourceMappingURL footer, and sets the map's `file` field to the
    /// final absolute path.
    fn write_module_to(
        &self,
        output: &Path,
        compiled: &mut CompiledModule,
    ) -> Result<(), HqlError> {
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| io_error("create", &dir.display().to_string(), e))?;

        let map_path = output.with_extension("mjs.map");
        let mut code = compiled.code.clone();
        if let Some(map) = &mut compiled.source_map {
            map.file = Some(output.display().to_string());
            let map_name = map_path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("module.mjs.map");
            code.push_str(&format!("//# sourceMappingURL={}\n", map_name));
            atomic_write(&map_path, &map.to_json())?;
        }
        atomic_write(output, &code)?;
        compiled.code = code;
        compiled.output_path = Some(output.to_path_buf());
        Ok(())
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<(), HqlError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)
        .map_err(|e| io_error("write", &tmp.display().to_string(), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| io_error("rename", &path.display().to_string(), e))
}

// ============================================================================
// TEXT SURGERY
// ============================================================================

fn program_has(program: &crate::ir::IrNode, pred: impl Fn(&IrKind) -> bool) -> bool {
    match &program.kind {
        IrKind::Program { body } => body.iter().any(|n| pred(&n.kind)),
        _ => false,
    }
}

fn rewrite_specifier(code: &str, from: &str, to: &str) -> String {
    code.replace(&format!("\"{}\"", from), &format!("\"{}\"", to))
        .replace(&format!("'{}'", from), &format!("'{}'", to))
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Splits emitted code into its leading import statements and the rest.
/// Imports are only meaningful at top-of-file; the code generator never
/// emits blank lines, so the header is exactly the leading import lines.
fn split_imports(code: &str) -> (String, String) {
    let mut imports = String::new();
    let mut body = String::new();
    let mut in_header = true;
    for line in code.lines() {
        if in_header && line.starts_with("import ") {
            imports.push_str(line);
            imports.push('\n');
        } else {
            in_header = false;
            body.push_str(line);
            body.push('\n');
        }
    }
    (imports, body)
}

/// Import lines stay at the top of the final text; body lines shift past
/// the prelude and the wrapper-open line.
fn shift_split_mappings(mappings: &mut [Mapping], import_lines: u32, body_shift: u32) {
    for m in mappings.iter_mut() {
        if m.generated_line >= import_lines {
            m.generated_line += body_shift;
        }
    }
}

// ============================================================================
// RUNTIME ERROR MAPPING
// ============================================================================

/// Wraps a value thrown by executing generated code, consulting the
/// source map to attach the originating HQL position. A `code` field
/// marks a user error that must never trigger a retry.
pub fn wrap_runtime_error(
    message: &str,
    code: Option<String>,
    js_position: Option<(u32, u32)>,
    map: Option<&SourceMap>,
    source_name: &str,
    source_text: &str,
) -> HqlError {
    let ctx = ReportContext::new(SourceContext::from_file(source_name, source_text), "run");
    let mut err = ctx.report(
        ErrorKind::Runtime {
            message: message.to_string(),
            code,
        },
        unspanned(),
    );
    if let (Some((line, col)), Some(map)) = (js_position, map) {
        if let Some((src_line, src_col)) = map.original_position_for(line, col) {
            err = err.with_help(format!(
                "originates at {}:{}:{}",
                source_name, src_line, src_col
            ));
        }
    }
    err
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_scan_finds_specifiers() {
        let code = "import { a } from \"./m.mjs\";\nimport d from './x.hql';\nconst y = 1;";
        assert_eq!(scan_import_specifiers(code), vec!["./m.mjs", "./x.hql"]);
    }

    #[test]
    fn side_effect_imports_are_scanned() {
        assert_eq!(scan_import_specifiers("import \"./fx.mjs\";"), vec!["./fx.mjs"]);
    }

    #[test]
    fn export_detection() {
        assert!(has_exports("export { a };"));
        assert!(!has_exports("const exportish = 1;"));
    }

    #[test]
    fn split_imports_separates_header() {
        let code = "import { a } from \"x\";\nconst y = 1;\nconst z = 2;";
        let (imports, body) = split_imports(code);
        assert_eq!(imports, "import { a } from \"x\";\n");
        assert_eq!(body, "const y = 1;\nconst z = 2;\n");
    }

    #[test]
    fn specifier_rewriting_is_quote_agnostic() {
        let code = "import a from './m.hql';\nimport b from \"./m.hql\";";
        let out = rewrite_specifier(code, "./m.hql", "file:///cache/m.mjs");
        assert!(!out.contains("./m.hql"));
        assert_eq!(out.matches("file:///cache/m.mjs").count(), 2);
    }
}
