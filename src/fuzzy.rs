//! Path matching for `find:` terms.
//!
//! Patterns are lowercased and compiled once per query:
//!
//! - `dir/words`: the first path segment must match `dir` (a single
//!   character is a prefix, wildcards are anchored, anything else is exact)
//!   and the rest of the path must contain `words`.
//! - a pattern with a `.` is tried against each path segment on its own.
//! - otherwise the pattern's words must occur in order, each starting at a
//!   word boundary. `*` and `?` make the pattern a wildcard match anywhere.
//!
//! Patterns with more than one `/` never match.

use regex::Regex;

#[derive(Debug, Clone)]
enum DirMatcher {
    Wildcard(Regex),
    Prefix(String),
    Exact(String),
}

#[derive(Debug, Clone)]
enum ContentMatcher {
    Wildcard(Regex),
    Words(Vec<String>),
}

#[derive(Debug, Clone)]
enum Compiled {
    Never,
    Directory {
        dir: DirMatcher,
        content: Option<ContentMatcher>,
    },
    Segments(ContentMatcher),
    Anywhere(ContentMatcher),
}

#[derive(Debug, Clone)]
pub struct FuzzyPattern {
    compiled: Compiled,
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

fn wildcard_regex(pattern: &str, anchored: bool) -> Option<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    if anchored {
        source.push('^');
    }
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    if anchored {
        source.push('$');
    }
    Regex::new(&source).ok()
}

fn split_words(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '/' | '-' | '_' | ' ' | '.' | ',' | '(' | ')')
}

fn content_matcher(pattern: &str, anchored: bool) -> Option<ContentMatcher> {
    if has_wildcards(pattern) {
        wildcard_regex(pattern, anchored).map(ContentMatcher::Wildcard)
    } else {
        Some(ContentMatcher::Words(split_words(pattern)))
    }
}

/// Each word must start at the beginning of `text` or right after a
/// delimiter, and words must appear in order without overlapping.
fn words_in_order(words: &[String], text: &str) -> bool {
    let mut from = 0;
    for word in words {
        loop {
            let Some(rel) = text[from..].find(word.as_str()) else {
                return false;
            };
            let at = from + rel;
            let boundary = text[..at].chars().next_back().map_or(true, is_delimiter);
            if boundary {
                from = at + word.len();
                break;
            }
            from = at + text[at..].chars().next().map_or(1, char::len_utf8);
        }
    }
    true
}

impl ContentMatcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            ContentMatcher::Wildcard(re) => re.is_match(text),
            ContentMatcher::Words(words) => words_in_order(words, text),
        }
    }
}

impl FuzzyPattern {
    pub fn new(pattern: &str) -> Self {
        let lower = pattern.trim().to_lowercase();
        Self {
            compiled: Self::compile(&lower).unwrap_or(Compiled::Never),
        }
    }

    fn compile(pattern: &str) -> Option<Compiled> {
        if pattern.is_empty() {
            return None;
        }
        match pattern.matches('/').count() {
            0 => {}
            1 => {
                let (dir, content) = pattern.split_once('/')?;
                let dir = if has_wildcards(dir) {
                    DirMatcher::Wildcard(wildcard_regex(dir, true)?)
                } else if dir.chars().count() == 1 {
                    DirMatcher::Prefix(dir.to_string())
                } else {
                    DirMatcher::Exact(dir.to_string())
                };
                let content = if content.is_empty() {
                    None
                } else {
                    Some(content_matcher(content, true)?)
                };
                return Some(Compiled::Directory { dir, content });
            }
            _ => return None,
        }

        let content = content_matcher(pattern, false)?;
        if pattern.contains('.') {
            Some(Compiled::Segments(content))
        } else {
            Some(Compiled::Anywhere(content))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let path = path.to_lowercase();
        match &self.compiled {
            Compiled::Never => false,
            Compiled::Directory { dir, content } => {
                let (first, rest) = match path.split_once('/') {
                    Some((first, rest)) => (first, Some(rest)),
                    None => (path.as_str(), None),
                };
                let dir_ok = match dir {
                    DirMatcher::Wildcard(re) => re.is_match(first),
                    DirMatcher::Prefix(p) => first.starts_with(p.as_str()),
                    DirMatcher::Exact(d) => first == d,
                };
                match (dir_ok, content, rest) {
                    (false, _, _) => false,
                    (true, None, _) => true,
                    (true, Some(_), None) => false,
                    (true, Some(content), Some(rest)) => content.matches(rest),
                }
            }
            Compiled::Segments(content) => path.split('/').any(|seg| content.matches(seg)),
            Compiled::Anywhere(content) => content.matches(&path),
        }
    }
}
