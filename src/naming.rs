//! SQL identifier normalization.
//!
//! Any input string maps to exactly one identifier matching
//! `^[a-z_][a-z0-9_]*$` that is at most [`MAX_IDENTIFIER_LENGTH`] long and is
//! not a reserved word. Normalization is idempotent.
//!
//! ```
//! use carto_sync::naming::{normalize_name, normalize_names};
//!
//! assert_eq!(normalize_name("Field: 2"), "field_2");
//! assert_eq!(normalize_name("SELECT"), "_select");
//! assert_eq!(normalize_names(&["201moore", "201moore"]), vec!["_201moore", "_201moore_1"]);
//! ```

use std::collections::HashSet;

/// Maximum identifier length accepted by the remote database.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Length a name is truncated to before a `_N` collision suffix is appended.
pub const MAX_COLLISION_LENGTH: usize = MAX_IDENTIFIER_LENGTH - 4;

const RESERVED_WORDS: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
    "AUTHORIZATION", "BETWEEN", "BINARY", "BOTH", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN",
    "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "CURRENT_USER", "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO",
    "ELSE", "END", "EXCEPT", "FALSE", "FOR", "FOREIGN", "FREEZE", "FROM", "FULL", "GRANT",
    "GROUP", "HAVING", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT", "INTO", "IS", "ISNULL",
    "JOIN", "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME", "LOCALTIMESTAMP", "NATURAL", "NEW",
    "NOT", "NOTNULL", "NULL", "OFF", "OFFSET", "OLD", "ON", "ONLY", "OR", "ORDER", "OUTER",
    "OVERLAPS", "PLACING", "PRIMARY", "REFERENCES", "RIGHT", "SELECT", "SESSION_USER", "SIMILAR",
    "SOME", "SYMMETRIC", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER",
    "USING", "VERBOSE", "WHEN", "WHERE", "XMIN", "XMAX", "FORMAT", "CONTROLLER", "ACTION",
];

/// Normalize one name into a valid SQL identifier.
pub fn normalize_name(name: &str) -> String {
    let slug = slugify(name);
    let mut result = if is_reserved(&slug) || !is_valid_identifier(&slug) {
        format!("_{}", slug)
    } else {
        slug
    };
    // Only ASCII remains at this point, so byte truncation is safe.
    result.truncate(MAX_IDENTIFIER_LENGTH);
    result
}

/// Normalize a list of names, disambiguating duplicates with `_N` suffixes.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut taken = HashSet::with_capacity(names.len());
    names
        .iter()
        .map(|name| {
            let normalized = disambiguate(&normalize_name(name.as_ref()), &taken);
            taken.insert(normalized.clone());
            normalized
        })
        .collect()
}

/// Return `name` if it is not in `taken`, otherwise the first free
/// `<name truncated to MAX_COLLISION_LENGTH>_N` for N = 1, 2, ...
pub fn disambiguate(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let base: String = name.chars().take(MAX_COLLISION_LENGTH).collect();
    (1u64..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_default()
}

/// Whether `name` matches `^[a-z_][a-z0-9_]*$`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Whether `name` is a SQL reserved word (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_WORDS.contains(&upper.as_str())
}

fn slugify(value: &str) -> String {
    let ascii = deunicode::deunicode(&value.to_lowercase()).to_lowercase();
    let chars: Vec<char> = ascii.chars().collect();
    let cleaned = replace_entities(&strip_tags(&chars));

    let mapped: String = cleaned
        .into_iter()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, ' ' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut out = String::with_capacity(mapped.len());
    let mut last_dash = false;
    for c in mapped.trim().chars() {
        if c == ' ' || c == '-' {
            if !last_dash {
                out.push('_');
            }
            last_dash = true;
        } else {
            out.push(c);
            last_dash = false;
        }
    }
    out
}

/// Remove `<...>` tags holding at least one character.
fn strip_tags(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' {
            if let Some(close) = chars[i + 1..].iter().position(|&c| c == '>') {
                if close > 0 {
                    i += close + 2;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Replace `&...;` entities on a single line with `-`.
fn replace_entities(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let body = &chars[i + 1..];
        if chars[i] == '&' && body.len() >= 2 && body[0] != '\n' {
            // At least one character of entity name, then the first ';'.
            let end = body
                .iter()
                .enumerate()
                .skip(1)
                .take_while(|&(_, &c)| c != '\n')
                .find(|&(_, &c)| c == ';')
                .map(|(pos, _)| pos);
            if let Some(end) = end {
                out.push('-');
                i += end + 2;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_names() {
        let cases = [
            ("Field: 2", "field_2"),
            ("2 Items", "_2_items"),
            ("Unnamed: 0", "unnamed_0"),
            ("Acadia 1.2.3", "acadia_1_2_3"),
            ("old_soaker", "old_soaker"),
            ("_testingTesting", "_testingtesting"),
            ("1", "_1"),
            ("1.0", "_1_0"),
            ("public", "public"),
            ("SELECT", "_select"),
            ("all", "_all"),
            ("à", "a"),
            ("", "_"),
            ("<b>bold</b> name", "bold_name"),
            ("fish &amp; chips", "fish_chips"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_name(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_long_names_and_collisions() {
        let long = "longcolumnshouldbesplittedsomehowanditellyouwhereitsgonnabesplittedrightnow";
        let names = normalize_names(&[long, long]);
        assert_eq!(
            names[0],
            "longcolumnshouldbesplittedsomehowanditellyouwhereitsgonnabespli"
        );
        assert_eq!(
            names[1],
            "longcolumnshouldbesplittedsomehowanditellyouwhereitsgonnabe_1"
        );
    }

    #[test]
    fn test_disambiguate_is_pure() {
        let taken: HashSet<String> = ["a", "a_1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(disambiguate("a", &taken), "a_2");
        assert_eq!(disambiguate("a", &taken), "a_2");
        assert_eq!(disambiguate("b", &taken), "b");
        assert_eq!(
            normalize_names(&["201moore", "201moore", "201moore"]),
            vec!["_201moore", "_201moore_1", "_201moore_2"]
        );
    }

    #[test]
    fn test_adversarial_inputs() {
        let inputs = [
            "TABLE",
            "9lives",
            "Ñandú Ğöğüş",
            "MiXeD CaSe",
            "東京",
            "a\nb",
            "&;",
            "<>",
            &"x".repeat(200),
            "   ",
            "-_-",
        ];
        for input in inputs {
            let once = normalize_name(input);
            assert_eq!(normalize_name(&once), once, "input {:?}", input);
            assert!(is_valid_identifier(&once), "{:?} -> {:?}", input, once);
            assert!(once.len() <= MAX_IDENTIFIER_LENGTH);
            assert!(!is_reserved(&once));
        }
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(input in "\\PC{0,100}") {
            let once = normalize_name(&input);
            prop_assert_eq!(normalize_name(&once), once.clone());
            prop_assert!(is_valid_identifier(&once));
            prop_assert!(once.len() <= MAX_IDENTIFIER_LENGTH);
        }
    }
}
