//! Runtime-helper source table.
//!
//! Helpers are small JavaScript functions prepended to emitted code -
//! never imported - each implementing one HQL semantic. The table is
//! read-only and shared; the optimizer's demand analysis decides which
//! entries a given module actually carries.

/// Every helper the compiler can demand, in prelude emission order.
pub const HELPER_NAMES: &[&str] = &[
    "__hql_get",
    "__hql_range",
    "__hql_toSequence",
    "__hql_for_each",
    "__hql_hash_map",
    "__hql_deepFreeze",
    "__hql_match_obj",
];

/// JavaScript source for one helper.
pub fn helper_source(name: &str) -> Option<&'static str> {
    let source = match name {
        "__hql_get" => {
            "function __hql_get(obj, key, dflt) {\n  if (obj == null) return dflt;\n  const v = obj[key];\n  return v === undefined ? dflt : v;\n}"
        }
        "__hql_range" => {
            "function* __hql_range(start, end, step) {\n  if (end === undefined) { end = start; start = 0; }\n  if (step === undefined) step = 1;\n  if (step > 0) { for (let i = start; i < end; i += step) yield i; }\n  else { for (let i = start; i > end; i += step) yield i; }\n}"
        }
        "__hql_toSequence" => {
            "function __hql_toSequence(v) {\n  if (Array.isArray(v)) return v;\n  if (v == null) return [];\n  if (typeof v === \"string\") return Array.from(v);\n  if (typeof v[Symbol.iterator] === \"function\") return Array.from(v);\n  if (typeof v === \"object\") return Object.entries(v);\n  return [v];\n}"
        }
        "__hql_for_each" => {
            "function __hql_for_each(seq, fn) {\n  const items = __hql_toSequence(seq);\n  for (let i = 0; i < items.length; i++) fn(items[i], i);\n  return null;\n}"
        }
        "__hql_hash_map" => {
            "function __hql_hash_map(...kv) {\n  const obj = Object.create(null);\n  for (let i = 0; i + 1 < kv.length; i += 2) obj[kv[i]] = kv[i + 1];\n  return obj;\n}"
        }
        "__hql_deepFreeze" => {
            "function __hql_deepFreeze(v, seen) {\n  if (v === null || typeof v !== \"object\") return v;\n  seen = seen || new Set();\n  if (seen.has(v)) return v;\n  seen.add(v);\n  for (const key of Object.getOwnPropertyNames(v)) {\n    __hql_deepFreeze(v[key], seen);\n  }\n  return Object.freeze(v);\n}"
        }
        "__hql_match_obj" => {
            "function __hql_match_obj(pattern, v) {\n  if (v === null || typeof v !== \"object\") return false;\n  for (const key of Object.keys(pattern)) {\n    const expected = pattern[key];\n    if (expected !== null && typeof expected === \"object\") {\n      if (!__hql_match_obj(expected, v[key])) return false;\n    } else if (v[key] !== expected) {\n      return false;\n    }\n  }\n  return true;\n}"
        }
        _ => return None,
    };
    Some(source)
}

/// Transitive helper dependencies: demanding one helper may pull another
/// into the prelude.
fn helper_dependencies(name: &str) -> &'static [&'static str] {
    match name {
        "__hql_for_each" => &["__hql_toSequence"],
        _ => &[],
    }
}

/// Builds the prelude text for a demand set, in table order, dependencies
/// included. Returns the text and its line count for mapping shifts.
pub fn prelude_for<'d>(demanded: impl IntoIterator<Item = &'d str>) -> (String, usize) {
    let mut wanted: Vec<&str> = Vec::new();
    for name in demanded {
        for dep in helper_dependencies(name) {
            if !wanted.contains(dep) {
                wanted.push(dep);
            }
        }
        if !wanted.contains(&name) {
            wanted.push(name);
        }
    }
    let mut out = String::new();
    for name in HELPER_NAMES {
        if !wanted.contains(name) {
            continue;
        }
        let source = helper_source(name).expect("table names resolve");
        out.push_str(source);
        out.push('\n');
    }
    let lines = out.lines().count();
    (out, lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_name_has_a_source() {
        for name in HELPER_NAMES {
            assert!(helper_source(name).is_some(), "missing source for {}", name);
        }
    }

    #[test]
    fn prelude_contains_only_demanded_helpers_plus_deps() {
        let (prelude, lines) = prelude_for(["__hql_for_each"]);
        assert!(prelude.contains("function __hql_for_each"));
        assert!(prelude.contains("function __hql_toSequence"));
        assert!(!prelude.contains("__hql_deepFreeze"));
        assert_eq!(lines, prelude.lines().count());
    }

    #[test]
    fn empty_demand_means_empty_prelude() {
        let (prelude, lines) = prelude_for([]);
        assert!(prelude.is_empty());
        assert_eq!(lines, 0);
    }
}
