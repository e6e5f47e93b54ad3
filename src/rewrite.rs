//! Batch document rewrites shared by tag and property edits.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::BatchFailure;
use crate::pool::run_cancellable;
use crate::store::DocumentStore;

/// What a batch did (or, for a dry run, would do).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationSummary {
    pub notes_touched: usize,
    /// Requested tag or property -> number of notes where it was changed.
    pub changes: BTreeMap<String, usize>,
    pub files_changed: Vec<String>,
}

/// Run `apply` over every document through the cancellable pool and write
/// back whatever it rewrites.
///
/// `apply` returns the new text plus the names it changed, or `None` to
/// leave the document alone. Unreadable documents are skipped. The first
/// write failure cancels the remaining work; documents already rewritten
/// stay rewritten and are listed in the failure's `completed` summary. Dry
/// runs never write.
pub fn rewrite_documents<S, F>(
    store: &S,
    documents: &[String],
    dry_run: bool,
    apply: F,
) -> Result<MutationSummary, BatchFailure>
where
    S: DocumentStore + ?Sized,
    F: Fn(&str) -> Option<(String, BTreeSet<String>)> + Sync,
{
    let outcome = run_cancellable(documents.to_vec(), |id: String| {
        let content = match store.content(&id) {
            Ok(content) => content,
            Err(e) => {
                warn!(document = %id, error = %e, "skipping unreadable document");
                return Ok(None);
            }
        };
        let Some((rewritten, changed)) = apply(&content) else {
            return Ok(None);
        };
        if !dry_run {
            store.write_content(&id, &rewritten)?;
        }
        debug!(document = %id, dry_run, "rewrote document");
        Ok(Some((id, changed)))
    });

    let mut summary = MutationSummary::default();
    for (id, changed) in outcome.completed.into_iter().flatten() {
        summary.notes_touched += 1;
        for name in changed {
            *summary.changes.entry(name).or_default() += 1;
        }
        summary.files_changed.push(id);
    }
    summary.files_changed.sort();

    match outcome.first_error {
        Some(source) => Err(BatchFailure {
            completed: summary,
            source,
        }),
        None => Ok(summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::store::MemoryStore;

    fn upper(content: &str) -> Option<(String, BTreeSet<String>)> {
        content
            .contains('x')
            .then(|| (content.to_uppercase(), ["x".to_string()].into()))
    }

    #[test]
    fn test_rewrite_documents_counts_and_writes() {
        let store = MemoryStore::new()
            .with_document("b.md", "x")
            .with_document("a.md", "xx")
            .with_document("c.md", "y")
            .with_unreadable("d.md");
        let docs = store.list_documents().unwrap();

        let preview = rewrite_documents(&store, &docs, true, upper).unwrap();
        assert_eq!(preview.files_changed, vec!["a.md", "b.md"]);
        assert_eq!(preview.changes.get("x"), Some(&2));
        assert_eq!(store.get("a.md").unwrap(), "xx");

        let summary = rewrite_documents(&store, &docs, false, upper).unwrap();
        assert_eq!(summary.notes_touched, 2);
        assert_eq!(store.get("a.md").unwrap(), "XX");
        assert_eq!(store.get("c.md").unwrap(), "y");
    }

    #[test]
    fn test_rewrite_documents_stops_on_write_failure() {
        let store = MemoryStore::new().with_document("a.md", "x").read_only();
        let docs = store.list_documents().unwrap();
        let failure = rewrite_documents(&store, &docs, false, upper).unwrap_err();
        assert!(matches!(failure.source, VaultError::DocumentUnwritable { .. }));
        assert!(failure.completed.files_changed.is_empty());
    }
}
