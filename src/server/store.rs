//! Published diagram store.
//!
//! Holds the most recently published artifact set behind a single pointer
//! swap: readers always see a fully-formed set, never a partial merge, and
//! never block the writer for longer than the swap itself.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::models::DiagramArtifact;

/// One atomically published artifact set.
pub struct PublishedDiagrams {
    pub diagrams: Vec<DiagramArtifact>,
    pub generated_at: DateTime<Utc>,
}

pub struct DiagramStore {
    inner: RwLock<Option<Arc<PublishedDiagrams>>>,
}

impl DiagramStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Replace the published set. Readers holding the previous set keep it
    /// alive until they drop their reference.
    pub fn publish(&self, diagrams: Vec<DiagramArtifact>) {
        let published = Arc::new(PublishedDiagrams {
            diagrams,
            generated_at: Utc::now(),
        });
        *self.inner.write().expect("diagram store lock") = Some(published);
    }

    /// The current published set, if any refresh has completed yet.
    pub fn current(&self) -> Option<Arc<PublishedDiagrams>> {
        self.inner.read().expect("diagram store lock").clone()
    }

    /// Whether at least one refresh has published.
    pub fn is_ready(&self) -> bool {
        self.inner.read().expect("diagram store lock").is_some()
    }
}

impl Default for DiagramStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagramKind;

    fn artifact(id: &str, content: &str) -> DiagramArtifact {
        DiagramArtifact {
            id: id.to_string(),
            title: id.to_string(),
            kind: DiagramKind::Markdown,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_empty_until_first_publish() {
        let store = DiagramStore::new();
        assert!(!store.is_ready());
        assert!(store.current().is_none());

        store.publish(vec![artifact("a", "x")]);
        assert!(store.is_ready());
        assert_eq!(store.current().unwrap().diagrams.len(), 1);
    }

    #[test]
    fn test_publish_replaces_whole_set() {
        let store = DiagramStore::new();
        store.publish(vec![artifact("a", "1"), artifact("b", "1")]);
        let first = store.current().unwrap();

        store.publish(vec![artifact("a", "2")]);
        let second = store.current().unwrap();

        // The old reference is still intact
        assert_eq!(first.diagrams.len(), 2);
        assert_eq!(second.diagrams.len(), 1);
        assert_eq!(second.diagrams[0].content, "2");
        assert!(second.generated_at >= first.generated_at);
    }
}
