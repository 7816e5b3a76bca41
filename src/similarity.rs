//! Name normalization and similarity scoring.
//!
//! The score is token-order-insensitive: names are lowercased, split on any
//! run of non-alphanumeric characters, sorted, and compared with a normalized
//! Levenshtein ratio. Single-letter initials ("J. Epstein") are expanded
//! against an unmatched token of the other name that starts with the same
//! letter, at a small discount per expansion.

use std::sync::OnceLock;

use regex::Regex;

/// Score multiplier applied once per expanded initial.
pub const INITIAL_DISCOUNT: f64 = 0.95;

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("separator pattern is valid"))
}

/// Index key for a surface form: lowercased, whitespace collapsed, trimmed.
///
/// # Examples
///
/// ```
/// use entigraph::similarity::normalize_name;
///
/// assert_eq!(normalize_name("  Jeffrey\tE.   Epstein "), "jeffrey e. epstein");
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased alphanumeric tokens of a name, in source order.
#[must_use]
pub fn tokens(name: &str) -> Vec<String> {
    separator()
        .split(&name.to_lowercase())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replaces single-letter tokens of `own` with a same-initial token of
/// `other` that `own` does not already contain. Returns the expanded tokens
/// and the number of expansions.
fn expand_initials(own: &[String], other: &[String]) -> (Vec<String>, i32) {
    let mut available: Vec<&String> = other
        .iter()
        .filter(|t| t.chars().count() > 1 && !own.contains(*t))
        .collect();
    let mut expanded = Vec::with_capacity(own.len());
    let mut count = 0;
    for token in own {
        let mut chars = token.chars();
        let initial = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                expanded.push(token.clone());
                continue;
            }
        };
        match available.iter().position(|t| t.starts_with(initial)) {
            Some(pos) => {
                expanded.push(available.remove(pos).clone());
                count += 1;
            }
            None => expanded.push(token.clone()),
        }
    }
    (expanded, count)
}

fn sorted_form(mut tokens: Vec<String>) -> String {
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Token-order-insensitive similarity in `[0.0, 1.0]`.
///
/// Symmetric and deterministic. Empty names score 0.0.
///
/// # Examples
///
/// ```
/// use entigraph::similarity::similarity;
///
/// assert_eq!(similarity("Jeffrey Epstein", "Epstein, Jeffrey"), 1.0);
/// assert!(similarity("J. Epstein", "Jeffrey Epstein") >= 0.85);
/// assert!(similarity("Mark Epstein", "Jeffrey Epstein") < 0.85);
/// ```
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let plain = strsim::normalized_levenshtein(&sorted_form(ta.clone()), &sorted_form(tb.clone()));
    if plain >= 1.0 {
        return 1.0;
    }

    let (ea, na) = expand_initials(&ta, &tb);
    let (eb, nb) = expand_initials(&tb, &ta);
    if na + nb == 0 {
        return plain;
    }
    let expanded = strsim::normalized_levenshtein(&sorted_form(ea), &sorted_form(eb))
        * INITIAL_DISCOUNT.powi(na + nb);
    plain.max(expanded)
}
