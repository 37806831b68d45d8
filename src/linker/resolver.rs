//! Import-specifier classification and resolution.
//!
//! Recognized shapes: `@hql/<name>` (embedded package table, then the
//! install directory), relative `./…`/`../…`, absolute paths, `file:`
//! URLs, and pass-through for `http(s):`, `jsr:`, `npm:`, and bare
//! package names.

use std::path::{Path, PathBuf};

use crate::errors::{unspanned, ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext};

/// Embedded `@hql/<pkg>` sources compiled in place of an on-disk package.
pub const EMBEDDED_PACKAGES: &[(&str, &str)] = &[(
    "core",
    "(fn identity [x] x)\n(fn inc [n] (+ n 1))\n(fn dec [n] (- n 1))\n(export [identity inc dec])\n",
)];

/// Where a specifier leads.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// An `@hql/` package shipped inside the compiler.
    Embedded { name: String, source: String },
    /// An HQL file that must be compiled and its specifier rewritten.
    HqlFile(PathBuf),
    /// Anything the host resolves on its own.
    PassThrough,
}

pub struct Resolver {
    pub importer_dir: PathBuf,
    pub install_dir: Option<PathBuf>,
    /// When non-empty, resolved file paths must fall under one of these.
    pub allowed_roots: Vec<PathBuf>,
}

impl Resolver {
    pub fn classify(&self, specifier: &str) -> Result<Resolved, HqlError> {
        if let Some(pkg) = specifier.strip_prefix("@hql/") {
            return self.resolve_hql_package(specifier, pkg);
        }
        if specifier.starts_with("http:")
            || specifier.starts_with("https:")
            || specifier.starts_with("jsr:")
            || specifier.starts_with("npm:")
        {
            return Ok(Resolved::PassThrough);
        }
        if let Some(path) = specifier.strip_prefix("file://") {
            return self.resolve_path(specifier, Path::new(path));
        }
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let joined = self.importer_dir.join(specifier);
            return self.resolve_path(specifier, &joined);
        }
        if Path::new(specifier).is_absolute() {
            return self.resolve_path(specifier, Path::new(specifier));
        }
        // Bare package name.
        Ok(Resolved::PassThrough)
    }

    fn resolve_hql_package(&self, specifier: &str, pkg: &str) -> Result<Resolved, HqlError> {
        if let Some((name, source)) = EMBEDDED_PACKAGES.iter().find(|(name, _)| *name == pkg) {
            return Ok(Resolved::Embedded {
                name: (*name).to_string(),
                source: (*source).to_string(),
            });
        }
        let Some(install_dir) = &self.install_dir else {
            return Err(self.unknown(specifier));
        };
        let path = install_dir.join("packages").join(pkg).join("mod.hql");
        if !path.is_file() {
            return Err(self.unknown(specifier));
        }
        self.resolve_path(specifier, &path)
    }

    fn resolve_path(&self, specifier: &str, path: &Path) -> Result<Resolved, HqlError> {
        let normalized = normalize(path);
        if !self.allowed_roots.is_empty()
            && !self
                .allowed_roots
                .iter()
                .any(|root| normalized.starts_with(normalize(root)))
        {
            let ctx = ReportContext::new(SourceContext::fallback(specifier), "resolve");
            return Err(ctx.report(
                ErrorKind::ForbiddenPath {
                    path: normalized.display().to_string(),
                },
                unspanned(),
            ));
        }
        if normalized.extension().and_then(|e| e.to_str()) == Some("hql") {
            return Ok(Resolved::HqlFile(normalized));
        }
        Ok(Resolved::PassThrough)
    }

    fn unknown(&self, specifier: &str) -> HqlError {
        let ctx = ReportContext::new(SourceContext::fallback(specifier), "resolve");
        ctx.report(
            ErrorKind::UnknownSpecifier {
                specifier: specifier.to_string(),
            },
            unspanned(),
        )
    }
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so unwritten cache paths normalize too.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> Resolver {
        Resolver {
            importer_dir: PathBuf::from("/proj/src"),
            install_dir: None,
            allowed_roots: vec![],
        }
    }

    #[test]
    fn relative_hql_files_resolve_against_the_importer() {
        let resolved = resolver().classify("./util.hql").unwrap();
        assert_eq!(resolved, Resolved::HqlFile(PathBuf::from("/proj/src/util.hql")));
        let resolved = resolver().classify("../lib/m.hql").unwrap();
        assert_eq!(resolved, Resolved::HqlFile(PathBuf::from("/proj/lib/m.hql")));
    }

    #[test]
    fn urls_and_bare_packages_pass_through() {
        for spec in ["https://x.dev/m.js", "npm:lodash", "jsr:@std/path", "lodash"] {
            assert_eq!(resolver().classify(spec).unwrap(), Resolved::PassThrough);
        }
    }

    #[test]
    fn embedded_packages_win_over_the_install_dir() {
        match resolver().classify("@hql/core").unwrap() {
            Resolved::Embedded { name, source } => {
                assert_eq!(name, "core");
                assert!(source.contains("identity"));
            }
            other => panic!("expected embedded package, got {:?}", other),
        }
    }

    #[test]
    fn unknown_hql_package_is_a_resolve_error() {
        let err = resolver().classify("@hql/nope").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownSpecifier { .. }));
    }

    #[test]
    fn paths_outside_allowed_roots_are_forbidden() {
        let mut r = resolver();
        r.allowed_roots = vec![PathBuf::from("/proj")];
        assert!(r.classify("./ok.hql").is_ok());
        let err = r.classify("/etc/evil.hql").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ForbiddenPath { .. }));
    }

    #[test]
    fn relative_js_files_pass_through() {
        assert_eq!(resolver().classify("./x.mjs").unwrap(), Resolved::PassThrough);
    }
}
