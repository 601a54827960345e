//! OSC address pattern compiler and matcher
//!
//! Grammar: `*` (any run of characters within a path segment), `?` (one
//! character), `[set]` / `[!set]` (character class with `a-z` ranges),
//! `{a,b,c}` (alternation of literal strings), everything else literal.
//! Matching is case-sensitive and anchored: the whole address must match,
//! and neither `*` nor `?` nor a class ever crosses a `/` separator.
//!
//! Patterns compile once into a token list; matching is a recursive walk
//! with backtracking only at `*` and `{}` choice points.

use crate::error::{Error, Result};

/// One compiled pattern element
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Literal character (including `/`)
    Lit(char),
    /// `?`: exactly one non-`/` character
    AnyOne,
    /// `*`: zero or more non-`/` characters
    AnyRun,
    /// `[...]`: one non-`/` character inside (or outside) the ranges
    Class { negate: bool, ranges: Vec<(char, char)> },
    /// `{a,b}`: one of the literal alternatives
    Alt(Vec<String>),
}

/// A compiled OSC address pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compile a pattern string
    ///
    /// Fails on an unclosed `[` or `{`.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '?' => tokens.push(Token::AnyOne),
                '*' => {
                    // Collapse runs of '*'; "**" matches the same set as "*"
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '[' => {
                    let negate = chars.peek() == Some(&'!');
                    if negate {
                        chars.next();
                    }
                    let mut ranges = Vec::new();
                    let mut closed = false;
                    let mut first = true;
                    while let Some(c) = chars.next() {
                        if c == ']' && !first {
                            closed = true;
                            break;
                        }
                        first = false;
                        // "a-z" is a range unless '-' is the last member
                        if chars.peek() == Some(&'-') {
                            let mut lookahead = chars.clone();
                            lookahead.next();
                            match lookahead.peek() {
                                Some(&hi) if hi != ']' => {
                                    chars.next();
                                    chars.next();
                                    ranges.push((c, hi));
                                    continue;
                                }
                                _ => {}
                            }
                        }
                        ranges.push((c, c));
                    }
                    if !closed {
                        return Err(Error::InvalidPattern {
                            pattern: pattern.to_string(),
                            reason: "unclosed '['",
                        });
                    }
                    tokens.push(Token::Class { negate, ranges });
                }
                '{' => {
                    let mut alts = Vec::new();
                    let mut current = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            ',' => alts.push(std::mem::take(&mut current)),
                            other => current.push(other),
                        }
                    }
                    if !closed {
                        return Err(Error::InvalidPattern {
                            pattern: pattern.to_string(),
                            reason: "unclosed '{'",
                        });
                    }
                    alts.push(current);
                    tokens.push(Token::Alt(alts));
                }
                other => tokens.push(Token::Lit(other)),
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The pattern string this was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the pattern contains no wildcard syntax
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Lit(_)))
    }

    /// Test a concrete address against this pattern (anchored)
    ///
    /// Backtracking work is bounded; a pathological pattern/address pair
    /// fails the match instead of hanging the dispatcher.
    pub fn matches(&self, addr: &str) -> bool {
        let chars: Vec<char> = addr.chars().collect();
        let mut fuel = MATCH_FUEL;
        match_tokens(&self.tokens, &chars, &mut fuel)
    }
}

/// True when the string contains any OSC wildcard syntax
pub fn has_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Backtracking step budget per match call. Real patterns use a handful
/// of steps per character; only adversarial wildcard pileups get near
/// this.
const MATCH_FUEL: u32 = 1 << 16;

fn match_tokens(mut tokens: &[Token], mut chars: &[char], fuel: &mut u32) -> bool {
    // Fixed-width tokens consume iteratively; only '*' and '{}' recurse,
    // so match depth is bounded by the number of choice points, not the
    // address length.
    loop {
        if *fuel == 0 {
            return false;
        }
        *fuel -= 1;
        let Some((token, rest_tokens)) = tokens.split_first() else {
            return chars.is_empty();
        };
        match token {
            Token::Lit(c) => {
                if chars.first() != Some(c) {
                    return false;
                }
            }
            Token::AnyOne => {
                if !matches!(chars.first(), Some(&c) if c != '/') {
                    return false;
                }
            }
            Token::Class { negate, ranges } => {
                let Some(&c) = chars.first() else {
                    return false;
                };
                let inside = ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi);
                if c == '/' || inside == *negate {
                    return false;
                }
            }
            Token::AnyRun => {
                // Try every split of the leading non-'/' run, shortest first
                for take in 0..=chars.len() {
                    if match_tokens(rest_tokens, &chars[take..], fuel) {
                        return true;
                    }
                    if *fuel == 0 || chars.get(take).map_or(true, |&c| c == '/') {
                        break;
                    }
                }
                return false;
            }
            Token::Alt(alts) => {
                return alts.iter().any(|alt| {
                    let alt_chars: Vec<char> = alt.chars().collect();
                    chars.starts_with(&alt_chars)
                        && match_tokens(rest_tokens, &chars[alt_chars.len()..], fuel)
                });
            }
        }
        tokens = rest_tokens;
        chars = &chars[1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, addr: &str) -> bool {
        Pattern::compile(pattern).unwrap().matches(addr)
    }

    #[test]
    fn test_literal_match_is_anchored() {
        assert!(matches("/print", "/print"));
        assert!(!matches("/print", "/printed"));
        assert!(!matches("/print", "/prin"));
        assert!(!matches("/printed", "/print"));
    }

    #[test]
    fn test_star_stays_within_segment() {
        assert!(matches("/user/*", "/user/1"));
        assert!(matches("/user/*", "/user/42"));
        assert!(!matches("/user/*", "/user"));
        assert!(!matches("/user/*", "/user/1/2"));
    }

    #[test]
    fn test_star_prefix_and_infix() {
        assert!(matches("/pri*", "/print"));
        assert!(matches("/pri*", "/printed"));
        assert!(matches("/pri*", "/pri"));
        assert!(matches("/*print", "/print"));
        assert!(matches("/*print", "/noprint"));
        assert!(!matches("/*print", "/printx"));
        assert!(matches("/a*c", "/abc"));
        assert!(matches("/a*c", "/ac"));
    }

    #[test]
    fn test_question_mark_is_one_char() {
        assert!(matches("/user/?", "/user/1"));
        assert!(!matches("/user/?", "/user/42"));
        assert!(!matches("/user/?", "/user/"));
        assert!(!matches("/user/?", "/user//"));
    }

    #[test]
    fn test_alternation() {
        assert!(matches("/prin{ce,t}", "/prince"));
        assert!(matches("/prin{ce,t}", "/print"));
        assert!(!matches("/prin{ce,t}", "/printed"));
        assert!(!matches("/prin{ce,t}", "/prin"));
    }

    #[test]
    fn test_char_class() {
        assert!(matches("/user/[1-4]", "/user/1"));
        assert!(matches("/user/[1-4]", "/user/4"));
        assert!(!matches("/user/[1-4]", "/user/5"));
        assert!(matches("/[!abc]x", "/dx"));
        assert!(!matches("/[!abc]x", "/ax"));
        assert!(matches("/[ab-d]", "/a"));
        assert!(matches("/[ab-d]", "/c"));
        assert!(!matches("/[ab-d]", "/e"));
    }

    #[test]
    fn test_class_never_matches_slash() {
        assert!(!matches("/a[/]b", "/a/b"));
        assert!(!matches("/a[!x]b", "/a/b"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!matches("/Print", "/print"));
        assert!(!matches("/user/[A-Z]", "/user/a"));
    }

    #[test]
    fn test_unclosed_syntax_rejected() {
        assert!(matches!(
            Pattern::compile("/user/[1-4"),
            Err(Error::InvalidPattern { .. })
        ));
        assert!(matches!(
            Pattern::compile("/prin{ce,t"),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_pathological_backtracking_is_bounded() {
        let p = Pattern::compile("/a*a*a*a*a*a*a*a*a*a*b").unwrap();
        let addr = format!("/{}", "a".repeat(60));
        let start = std::time::Instant::now();
        assert!(!p.matches(&addr));
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_is_literal() {
        assert!(Pattern::compile("/print").unwrap().is_literal());
        assert!(!Pattern::compile("/pri*").unwrap().is_literal());
        assert!(has_wildcards("/pri*"));
        assert!(!has_wildcards("/print"));
    }
}
