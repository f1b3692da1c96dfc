mod id_gen;
mod toposort;

use std::sync::OnceLock;

pub use id_gen::IdArena;
use regex::Regex;
pub use toposort::toposort;

/// An id that can serve as a bare SQL alias without quoting: lowercase
/// ascii, digits and underscores, not starting with a digit. Ids that fail
/// this test get a generated `t{n}` alias instead.
pub(crate) fn valid_short_ident() -> &'static Regex {
    static VALID_SHORT_IDENT: OnceLock<Regex> = OnceLock::new();
    VALID_SHORT_IDENT.get_or_init(|| {
        Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap()
    })
}

#[test]
fn test_valid_short_ident() {
    assert!(valid_short_ident().is_match("t1"));
    assert!(valid_short_ident().is_match("ava_1"));
    assert!(!valid_short_ident().is_match(""));
    assert!(!valid_short_ident().is_match("8ball"));
    assert!(!valid_short_ident().is_match("Ava One"));
}
