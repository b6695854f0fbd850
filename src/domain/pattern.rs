//! URI pattern matching for page routing.
//!
//! A pattern is a `/`-delimited list of segments. Each segment is one of:
//!
//! - a literal, compared byte for byte;
//! - `*`, which consumes exactly one path segment;
//! - `**`, which consumes the rest of the path and ends matching;
//! - a token such as `{slug}` or `post-{id}.html`, whose inner text is
//!   percent-decoded and captured under its name.
//!
//! Matching never backtracks: every segment decision is final, so overlapping
//! patterns are disambiguated purely by the order in which they are tried.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Token name under which `**` captures are stored.
pub const CATCH_ALL: &str = "**";

/// Token bindings captured by a successful match.
///
/// Ordered so that descriptors built from it hash deterministically.
pub type Tokens = BTreeMap<String, String>;

/// Match `path` against `pattern`.
///
/// Returns `None` when the path does not match, and the (possibly empty)
/// token bindings when it does. Malformed patterns never panic; they simply
/// fail to match anything other than themselves.
pub fn match_path(pattern: &str, path: &str) -> Option<Tokens> {
    let pattern = strip_leading_slash(pattern);
    let path = strip_leading_slash(path);
    let mut tokens = Tokens::new();

    if pattern == CATCH_ALL {
        tokens.insert(CATCH_ALL.to_string(), path.to_string());
        return Some(tokens);
    }

    if !pattern.contains('{') && !pattern.contains('*') {
        return (pattern == path).then_some(tokens);
    }

    let expected_segments: Vec<&str> = pattern.split('/').collect();
    let actual_segments: Vec<&str> = path.split('/').collect();
    let steps = expected_segments.len().max(actual_segments.len());

    for index in 0..steps {
        let expected = expected_segments.get(index).copied().unwrap_or("");
        let actual = actual_segments.get(index).copied().unwrap_or("");

        match (expected.is_empty(), actual.is_empty()) {
            (true, true) => continue,
            (false, false) => {}
            _ => return None,
        }

        match Segment::parse(expected) {
            Segment::Any => {}
            Segment::Rest => {
                let rest = actual_segments[index..].join("/");
                tokens.insert(CATCH_ALL.to_string(), format!("/{rest}"));
                return Some(tokens);
            }
            Segment::Token {
                prefix,
                name,
                suffix,
            } => {
                let value = capture(actual, prefix, suffix)?;
                tokens.insert(name.to_string(), value);
            }
            Segment::Literal(literal) => {
                if literal != actual {
                    return None;
                }
            }
        }
    }

    Some(tokens)
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Any,
    Rest,
    Token {
        prefix: &'a str,
        name: &'a str,
        suffix: &'a str,
    },
    Literal(&'a str),
}

impl<'a> Segment<'a> {
    fn parse(segment: &'a str) -> Self {
        match segment {
            "*" => Segment::Any,
            CATCH_ALL => Segment::Rest,
            _ => {
                let Some(open) = segment.find('{') else {
                    return Segment::Literal(segment);
                };
                // an unterminated token is treated as literal text
                let Some(close) = segment[open + 1..].find('}').map(|rel| open + 1 + rel) else {
                    return Segment::Literal(segment);
                };
                Segment::Token {
                    prefix: &segment[..open],
                    name: &segment[open + 1..close],
                    suffix: &segment[close + 1..],
                }
            }
        }
    }
}

fn capture(actual: &str, prefix: &str, suffix: &str) -> Option<String> {
    let inner = actual.strip_prefix(prefix)?.strip_suffix(suffix)?;
    Some(percent_decode_str(inner).decode_utf8_lossy().into_owned())
}

fn strip_leading_slash(value: &str) -> &str {
    value.strip_prefix('/').unwrap_or(value)
}
