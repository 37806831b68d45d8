//! Process-wide gensym counter.
//!
//! The counter is shared across compiles; reset it between unrelated
//! compiles to obtain deterministic output.

use std::sync::atomic::{AtomicUsize, Ordering};

static GENSYM_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns a fresh symbol name `prefix_N` with N monotone.
pub fn next_gensym(prefix: &str) -> String {
    let n = GENSYM_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}_{}", prefix, n)
}

/// Resets the counter. Tests and the public `Compiler::reset` call this;
/// nothing else should.
pub fn reset_gensym() {
    GENSYM_COUNTER.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gensym_names_are_unique_and_monotone() {
        reset_gensym();
        let a = next_gensym("tmp");
        let b = next_gensym("tmp");
        assert_ne!(a, b);
        assert!(a.starts_with("tmp_"));
    }
}
