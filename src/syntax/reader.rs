//! HQL Reader - Text to S-expressions
//!
//! Converts HQL source code into S-expression nodes with source position
//! tracking. The reader is purely syntactic: reader macros desugar here
//! (quote family, vectors, maps, spread), template strings become
//! `__hql_template` forms with interpolations parsed as nested HQL, and
//! everything else is left for the expander and lowering to interpret.

use std::sync::Arc;

use pest::{error::Error, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::errors::{to_source_span, ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext};
use crate::syntax::{Meta, Sexp, SYM_HASH_MAP, SYM_SPREAD, SYM_TEMPLATE, SYM_VECTOR};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct HqlParser;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse HQL source code into S-expression nodes.
///
/// `file` names the source for diagnostics and node metas; use a synthetic
/// name (e.g. `"<repl>"`) for unsaved buffers.
pub fn read(source_text: &str, file: &str) -> Result<Vec<Sexp>, HqlError> {
    let ctx = Reader::new(source_text, file);

    if source_text.trim().is_empty() {
        return Ok(vec![]);
    }

    let pairs = HqlParser::parse(Rule::program, source_text)
        .map_err(|e| ctx.convert_parse_error(e))?;

    let program = pairs.peek().expect("pest guarantees the program rule");

    program
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(|p| ctx.build_node(p))
        .collect()
}

// ============================================================================
// READER STATE
// ============================================================================

struct Reader<'s> {
    source: &'s str,
    file: Arc<str>,
    line_starts: Vec<usize>,
    report: ReportContext,
}

impl<'s> Reader<'s> {
    fn new(source: &'s str, file: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Reader {
            source,
            file: Arc::from(file),
            line_starts,
            report: ReportContext::new(SourceContext::from_file(file, source), "read"),
        }
    }

    /// 1-based line and 0-based UTF-16 column for a byte offset.
    fn position(&self, offset: usize) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = self.source[self.line_starts[line_idx]..offset]
            .chars()
            .map(char::len_utf16)
            .sum::<usize>() as u32;
        (line_idx as u32 + 1, col)
    }

    fn meta(&self, pair: &Pair<Rule>) -> Meta {
        let span = pair.as_span();
        let (line, column) = self.position(span.start());
        let (end_line, end_column) = self.position(span.end());
        Meta {
            file: Some(Arc::clone(&self.file)),
            line,
            column,
            end_line,
            end_column,
            offset: Some(span.start()),
            end_offset: Some(span.end()),
        }
    }

    // ========================================================================
    // NODE BUILDERS
    // ========================================================================

    fn build_node(&self, pair: Pair<Rule>) -> Result<Sexp, HqlError> {
        let meta = self.meta(&pair);

        match pair.as_rule() {
            Rule::number => {
                let text = pair.as_str();
                let value = text.parse::<f64>().map_err(|_| {
                    self.report
                        .invalid_literal("number", text, to_source_span(&meta))
                })?;
                Ok(Sexp::number(value, Some(meta)))
            }

            Rule::boolean => Ok(Sexp::boolean(pair.as_str() == "true", Some(meta))),

            Rule::null => Ok(Sexp::null(Some(meta))),

            Rule::string => {
                let inner = pair
                    .into_inner()
                    .next()
                    .expect("grammar guarantees string_inner");
                let content = self.unescape(inner.as_str(), &meta)?;
                Ok(Sexp::string(content, Some(meta)))
            }

            Rule::symbol => Ok(Sexp::symbol(pair.as_str(), Some(meta))),

            Rule::list => {
                let children: Result<Vec<_>, _> =
                    pair.into_inner().map(|p| self.build_node(p)).collect();
                Ok(Sexp::list(children?, Some(meta)))
            }

            Rule::vector => {
                let children: Result<Vec<_>, _> =
                    pair.into_inner().map(|p| self.build_node(p)).collect();
                Ok(Sexp::call(SYM_VECTOR, children?, Some(meta)))
            }

            Rule::map => self.build_map(pair, meta),

            Rule::quote_form => self.build_prefixed("quote", pair, meta),
            Rule::quasiquote_form => self.build_prefixed("quasiquote", pair, meta),
            Rule::unquote => self.build_prefixed("unquote", pair, meta),
            Rule::unquote_splicing => self.build_prefixed("unquote-splicing", pair, meta),

            Rule::spread_form => {
                let target = pair
                    .into_inner()
                    .next()
                    .expect("grammar guarantees spread target");
                let symbol = self.build_node(target)?;
                Ok(Sexp::call(SYM_SPREAD, vec![symbol], Some(meta)))
            }

            Rule::template_string => self.build_template(pair, meta),

            rule => Err(self.report.malformed_syntax(
                &format!("unsupported rule: {:?}", rule),
                to_source_span(&meta),
            )),
        }
    }

    fn build_prefixed(&self, head: &str, pair: Pair<Rule>, meta: Meta) -> Result<Sexp, HqlError> {
        let inner = pair.into_inner().next().ok_or_else(|| {
            self.report.malformed_syntax(
                &format!("missing expression after {}", head),
                to_source_span(&meta),
            )
        })?;
        let form = self.build_node(inner)?;
        Ok(Sexp::call(head, vec![form], Some(meta)))
    }

    /// Map literals read as `(__hql_hash_map k v ...)`. A symbol key with a
    /// trailing colon (`toString:`) is JS-style sugar for a string key.
    fn build_map(&self, pair: Pair<Rule>, meta: Meta) -> Result<Sexp, HqlError> {
        let children: Result<Vec<_>, _> = pair.into_inner().map(|p| self.build_node(p)).collect();
        let children = children?;

        if children.len() % 2 != 0 {
            return Err(self
                .report
                .malformed_syntax("map literal requires an even number of forms", to_source_span(&meta))
                .with_help("Map literals pair keys with values: {key value ...}."));
        }

        let entries = children
            .into_iter()
            .enumerate()
            .map(|(i, node)| {
                if i % 2 != 0 {
                    return node;
                }
                match node.as_symbol() {
                    Some(name) if name.len() > 1 && name.ends_with(':') => {
                        let key_meta = node.meta.clone();
                        Sexp::string(&name[..name.len() - 1], key_meta)
                    }
                    _ => node,
                }
            })
            .collect();

        Ok(Sexp::call(SYM_HASH_MAP, entries, Some(meta)))
    }

    /// Template strings read as `(__hql_template part...)` where parts
    /// alternate between string chunks and interpolated forms. Lowering
    /// rewrites the form into a `str` call.
    fn build_template(&self, pair: Pair<Rule>, meta: Meta) -> Result<Sexp, HqlError> {
        let mut parts = Vec::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::template_chars => {
                    let part_meta = self.meta(&part);
                    let content = self.unescape_template(part.as_str(), &part_meta)?;
                    parts.push(Sexp::string(content, Some(part_meta)));
                }
                Rule::template_interp => {
                    let inner = part
                        .into_inner()
                        .next()
                        .expect("grammar guarantees interpolation form");
                    parts.push(self.build_node(inner)?);
                }
                _ => {}
            }
        }
        Ok(Sexp::call(SYM_TEMPLATE, parts, Some(meta)))
    }

    // ========================================================================
    // STRING ESCAPES
    // ========================================================================

    fn unescape(&self, text: &str, meta: &Meta) -> Result<String, HqlError> {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars();

        while let Some(ch) = chars.next() {
            if ch != '\\' {
                result.push(ch);
                continue;
            }
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('`') => result.push('`'),
                Some('$') => result.push('$'),
                Some(other) => {
                    return Err(self.report.report(
                        ErrorKind::InvalidEscape {
                            escape: other.to_string(),
                        },
                        to_source_span(meta),
                    ));
                }
                None => {
                    return Err(self.report.report(
                        ErrorKind::InvalidEscape {
                            escape: String::new(),
                        },
                        to_source_span(meta),
                    ));
                }
            }
        }
        Ok(result)
    }

    fn unescape_template(&self, text: &str, meta: &Meta) -> Result<String, HqlError> {
        // Same escape set; template chunks additionally never contain an
        // unescaped backtick or `${` (the grammar stops there).
        self.unescape(text, meta)
    }

    // ========================================================================
    // ERROR HANDLING
    // ========================================================================

    fn convert_parse_error(&self, error: Error<Rule>) -> HqlError {
        let (start, end) = match error.location {
            pest::error::InputLocation::Pos(pos) => (pos, pos),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        let (line, column) = self.position(start);
        let meta = Meta {
            file: Some(Arc::clone(&self.file)),
            line,
            column,
            end_line: line,
            end_column: column,
            offset: Some(start),
            end_offset: Some(end.max(start)),
        };

        // Classify by scanning the prefix: an open string or delimiter at
        // the failure point beats pest's token-level message.
        match self.scan_open_delimiters(start) {
            Some(OpenDelimiter::Str(at)) => {
                let (line, column) = self.position(at);
                let meta = Meta {
                    line,
                    column,
                    offset: Some(at),
                    end_offset: Some(at + 1),
                    ..meta
                };
                self.report
                    .report(ErrorKind::UnterminatedString, to_source_span(&meta))
            }
            Some(OpenDelimiter::Bracket(bracket, at)) => {
                let (line, column) = self.position(at);
                let meta = Meta {
                    line,
                    column,
                    offset: Some(at),
                    end_offset: Some(at + 1),
                    ..meta
                };
                self.report.report(
                    ErrorKind::UnmatchedBracket {
                        bracket: bracket.to_string(),
                    },
                    to_source_span(&meta),
                )
            }
            None => self
                .report
                .malformed_syntax("syntax error", to_source_span(&meta)),
        }
    }

    /// Scans the source up to `limit` tracking string state and a bracket
    /// stack, ignoring comments, to classify pest failures.
    fn scan_open_delimiters(&self, limit: usize) -> Option<OpenDelimiter> {
        let bytes = self.source.as_bytes();
        let mut stack: Vec<(u8, usize)> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'"' | b'`' => {
                    let quote = bytes[i];
                    let start = i;
                    i += 1;
                    let mut closed = false;
                    while i < bytes.len() {
                        match bytes[i] {
                            b'\\' => i += 1,
                            b if b == quote => {
                                closed = true;
                                break;
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                    if !closed && start < limit {
                        return Some(OpenDelimiter::Str(start));
                    }
                }
                b';' => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i += 1;
                }
                b @ (b'(' | b'[' | b'{') => stack.push((b, i)),
                b')' | b']' | b'}' => {
                    stack.pop();
                }
                _ => {}
            }
            i += 1;
        }
        stack
            .first()
            .map(|&(b, at)| OpenDelimiter::Bracket(b as char, at))
    }
}

enum OpenDelimiter {
    Str(usize),
    Bracket(char, usize),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use crate::syntax::SexpKind;

    fn must_read(source: &str) -> Vec<Sexp> {
        read(source, "test.hql").unwrap_or_else(|e| panic!("read failed: {}", e))
    }

    #[test]
    fn empty_input_reads_to_nothing() {
        assert!(must_read("").is_empty());
        assert!(must_read("  ; just a comment\n").is_empty());
    }

    #[test]
    fn reads_atoms_with_positions() {
        let nodes = must_read("42 foo \"bar\" true null");
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[0].as_number(), Some(42.0));
        assert_eq!(nodes[1].as_symbol(), Some("foo"));
        assert_eq!(nodes[2].as_str(), Some("bar"));
        let meta = nodes[1].meta.as_ref().unwrap();
        assert_eq!(meta.line, 1);
        assert_eq!(meta.column, 3);
    }

    #[test]
    fn utf16_columns_count_surrogate_pairs() {
        // '𝄞' is one char but two UTF-16 code units.
        let nodes = must_read("\"𝄞\" x");
        let meta = nodes[1].meta.as_ref().unwrap();
        assert_eq!(meta.column, 5); // quote + 2 units + quote + space
    }

    #[test]
    fn vectors_read_as_vector_form() {
        let nodes = must_read("[1 2 3]");
        assert!(nodes[0].is_call_to(SYM_VECTOR));
        assert_eq!(nodes[0].as_list().unwrap().len(), 4);
    }

    #[test]
    fn maps_read_as_hash_map_form_with_colon_sugar() {
        let nodes = must_read("{toString: \"my-value\"}");
        let items = nodes[0].as_list().unwrap();
        assert_eq!(items[0].as_symbol(), Some(SYM_HASH_MAP));
        assert_eq!(items[1].as_str(), Some("toString"));
        assert_eq!(items[2].as_str(), Some("my-value"));
    }

    #[test]
    fn quote_family_desugars() {
        let nodes = must_read("'x `(a ~b ~@c)");
        assert!(nodes[0].is_call_to("quote"));
        assert!(nodes[1].is_call_to("quasiquote"));
        let quoted = &nodes[1].as_list().unwrap()[1];
        let items = quoted.as_list().unwrap();
        assert!(items[1].is_call_to("unquote"));
        assert!(items[2].is_call_to("unquote-splicing"));
    }

    #[test]
    fn backtick_without_opener_is_template_string() {
        let nodes = must_read("`hello ${name}!`");
        let items = nodes[0].as_list().unwrap();
        assert_eq!(items[0].as_symbol(), Some(SYM_TEMPLATE));
        assert_eq!(items[1].as_str(), Some("hello "));
        assert_eq!(items[2].as_symbol(), Some("name"));
        assert_eq!(items[3].as_str(), Some("!"));
    }

    #[test]
    fn spread_reads_as_spread_form() {
        let nodes = must_read("(f ...args)");
        let items = nodes[0].as_list().unwrap();
        assert!(items[1].is_call_to(SYM_SPREAD));
    }

    #[test]
    fn gensym_suffix_symbols_are_plain_symbols() {
        let nodes = must_read("tmp#");
        assert_eq!(nodes[0].as_symbol(), Some("tmp#"));
        assert!(matches!(&*nodes[0].kind, SexpKind::Symbol(_)));
    }

    #[test]
    fn string_escapes_include_backtick() {
        let nodes = must_read(r#""a\`b\n""#);
        assert_eq!(nodes[0].as_str(), Some("a`b\n"));
    }

    #[test]
    fn invalid_escape_is_a_read_error() {
        let err = read(r#""\q""#, "test.hql").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Read);
        assert!(matches!(err.kind, ErrorKind::InvalidEscape { .. }));
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = read("(let x \"abc", "test.hql").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnterminatedString));
    }

    #[test]
    fn unmatched_bracket_reports_opener() {
        let err = read("(a (b c)", "test.hql").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnmatchedBracket { .. }));
    }

    #[test]
    fn both_comment_styles_are_skipped() {
        let nodes = must_read("; lisp\n// c\n/* block */ 7");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].as_number(), Some(7.0));
    }
}
