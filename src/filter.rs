//! Path patterns shared by the ignore list and the graph include/exclude
//! options.
//!
//! A pattern containing glob metacharacters is compiled with `globset`;
//! anything else is a directory or file prefix (`daily` matches `daily.md`,
//! `daily/2024-01-01.md`, but not `dailyish.md`).

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, VaultError};
use crate::store::normalize_path;

#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    prefixes: Vec<String>,
    globs: Option<GlobSet>,
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut prefixes = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0;

        for raw in patterns {
            let pattern = normalize_path(raw.as_ref());
            if pattern.is_empty() {
                continue;
            }
            if is_glob(&pattern) {
                let glob = Glob::new(&pattern).map_err(|source| VaultError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                builder.add(glob);
                glob_count += 1;
            } else {
                prefixes.push(pattern);
            }
        }

        let globs = if glob_count > 0 {
            Some(builder.build().map_err(|source| VaultError::Pattern {
                pattern: patterns
                    .iter()
                    .map(|p| p.as_ref())
                    .collect::<Vec<_>>()
                    .join(", "),
                source,
            })?)
        } else {
            None
        };

        Ok(Self { prefixes, globs })
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.globs.is_none()
    }

    pub fn matches(&self, id: &str) -> bool {
        let matched_prefix = self.prefixes.iter().any(|prefix| {
            id == prefix
                || id
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/') || rest == ".md")
        });
        matched_prefix || self.globs.as_ref().is_some_and(|set| set.is_match(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_patterns_stop_at_segment_boundary() {
        let filter = PathFilter::new(&["daily/", "Inbox"]).unwrap();
        assert!(filter.matches("daily/2024-01-01.md"));
        assert!(filter.matches("Inbox.md"));
        assert!(filter.matches("Inbox/todo.md"));
        assert!(!filter.matches("dailyish.md"));
        assert!(!filter.matches("notes/daily/x.md"));
    }

    #[test]
    fn test_glob_patterns() {
        let filter = PathFilter::new(&["**/*.excalidraw.md"]).unwrap();
        assert!(filter.matches("drawings/plan.excalidraw.md"));
        assert!(!filter.matches("drawings/plan.md"));
    }

    #[test]
    fn test_bad_glob_is_reported() {
        let err = PathFilter::new(&["notes/[abc"]).unwrap_err();
        assert!(matches!(err, VaultError::Pattern { .. }));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = PathFilter::new::<&str>(&[]).unwrap();
        assert!(filter.is_empty());
        assert!(!filter.matches("a.md"));
    }
}
