//! Module linker tests: resolution, graph deduplication, cycle breaking,
//! wrapping, and cache output.

use std::fs;
use std::path::PathBuf;

use hql::interp::ScopeArena;
use hql::linker::{LinkOptions, Linker};

/// A scratch project directory plus its cache, cleaned up on drop.
struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("hql-linker-{}-{}", name, std::process::id()));
        fs::remove_dir_all(&root).ok();
        fs::create_dir_all(&root).expect("create workspace");
        Workspace { root }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::write(&path, content).expect("write fixture");
        path
    }

    fn options(&self) -> LinkOptions {
        LinkOptions {
            base_dir: Some(self.root.clone()),
            generate_source_map: true,
            cache_dir: Some(self.root.join("cache")),
            write_output: true,
            ..LinkOptions::default()
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

#[test]
fn hql_imports_compile_recursively_and_rewrite_specifiers() {
    let ws = Workspace::new("recursive");
    ws.write("util.hql", "(fn double [x] (* x 2))\n(export [double])\n");
    let entry = ws.write(
        "main.hql",
        "(import [double] from \"./util.hql\")\n(double 21)\n",
    );

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("link entry");

    assert!(!module.code.contains("./util.hql"), "code: {}", module.code);
    assert!(module.code.contains("file://"), "code: {}", module.code);
    assert!(module.code.contains(".mjs"), "code: {}", module.code);

    // The dependency landed in the cache as a real ES module.
    let dep_output = linker
        .graph
        .module_outputs()
        .values()
        .next()
        .cloned()
        .expect("dependency output registered");
    let dep_code = fs::read_to_string(&dep_output).expect("dependency written");
    assert!(dep_code.contains("export { double };"), "{}", dep_code);
}

#[test]
fn the_same_module_compiles_once_per_entry() {
    let ws = Workspace::new("dedup");
    ws.write("shared.hql", "(fn id [x] x)\n(export [id])\n");
    ws.write(
        "a.hql",
        "(import [id] from \"./shared.hql\")\n(fn id2 [x] (id x))\n(export [id2])\n",
    );
    let entry = ws.write(
        "main.hql",
        "(import [id] from \"./shared.hql\")\n(import [id2] from \"./a.hql\")\n(id2 1)\n",
    );

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    linker.link_file(&entry).expect("link entry");

    // entry + shared + a = 3 compilations; shared is requested twice but
    // compiled once.
    assert_eq!(linker.graph.compilations, 3);
}

#[test]
fn import_cycles_resolve_to_the_in_flight_output() {
    let ws = Workspace::new("cycle");
    ws.write(
        "a.hql",
        "(import [b] from \"./b.hql\")\n(fn a [] 1)\n(export [a])\n",
    );
    ws.write(
        "b.hql",
        "(import [a] from \"./a.hql\")\n(fn b [] 2)\n(export [b])\n",
    );
    let entry = ws.write("main.hql", "(import [a] from \"./a.hql\")\n(a)\n");

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("cycle links");
    assert!(module.code.contains("file://"));
    // Each module in the cycle compiled exactly once.
    assert_eq!(linker.graph.compilations, 3);
}

#[test]
fn entry_with_imports_but_no_exports_wraps_in_a_default_async_iife() {
    let ws = Workspace::new("default-wrap");
    ws.write("util.hql", "(fn one [] 1)\n(export [one])\n");
    let entry = ws.write(
        "main.hql",
        "(import [one] from \"./util.hql\")\n(one)\n",
    );

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("link entry");

    assert!(module.is_es_module);
    let import_line = module.code.lines().next().unwrap();
    assert!(import_line.starts_with("import "), "code: {}", module.code);
    assert!(
        module.code.contains("export default (async () => {"),
        "code: {}",
        module.code
    );
    assert!(module.code.contains("return one();"), "code: {}", module.code);
}

#[test]
fn embedded_packages_resolve_without_a_filesystem() {
    let ws = Workspace::new("embedded");
    let entry = ws.write(
        "main.hql",
        "(import [inc] from \"@hql/core\")\n(inc 41)\n",
    );

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("embedded package links");
    assert!(!module.code.contains("@hql/core"), "code: {}", module.code);
    assert!(module.code.contains("file://"), "code: {}", module.code);
}

#[test]
fn outputs_carry_footer_and_map_file_field() {
    let ws = Workspace::new("footer");
    let entry = ws.write("main.hql", "(let x 1)\nx\n");

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("link entry");

    let output = module.output_path.expect("written output");
    let code = fs::read_to_string(&output).unwrap();
    let footer = code.lines().last().unwrap();
    assert!(footer.starts_with("//# sourceMappingURL="), "{}", footer);

    let map_json = fs::read_to_string(output.with_extension("mjs.map")).unwrap();
    let map: serde_json::Value = serde_json::from_str(&map_json).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["file"], output.display().to_string());
    assert!(map["sourcesContent"][0]
        .as_str()
        .unwrap()
        .contains("(let x 1)"));
}

#[test]
fn unknown_embedded_package_fails_resolution() {
    let ws = Workspace::new("unknown-pkg");
    let entry = ws.write("main.hql", "(import [x] from \"@hql/not-a-package\")\nx\n");

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let err = linker.link_file(&entry).expect_err("unknown package");
    assert_eq!(err.category(), hql::ErrorCategory::ModuleResolve);
}

#[test]
fn pass_through_specifiers_survive_unchanged() {
    let ws = Workspace::new("passthrough");
    let entry = ws.write(
        "main.hql",
        "(import [join] from \"npm:path\")\n(join \"a\" \"b\")\n",
    );

    let mut arena = ScopeArena::new();
    let mut linker = Linker::new(&mut arena, ws.options());
    let module = linker.link_file(&entry).expect("link entry");
    assert!(module.code.contains("\"npm:path\""), "code: {}", module.code);
}
