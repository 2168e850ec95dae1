//! Citation edge between two canonical papers

use serde::{Deserialize, Serialize};

use super::CanonicalKey;

/// Directed citation: `citing` cites `cited`.
///
/// Edges are set members; equality covers both endpoints only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitationEdge {
    /// Paper that contains the citation
    pub citing: CanonicalKey,

    /// Paper that is being cited
    pub cited: CanonicalKey,
}

impl CitationEdge {
    pub fn new(citing: CanonicalKey, cited: CanonicalKey) -> Self {
        Self { citing, cited }
    }

    pub fn is_self_loop(&self) -> bool {
        self.citing == self.cited
    }
}
