use crate::consolidator::{ConsolidatedTable, ConsolidationError, Consolidator};
use crate::fetcher::Fetch;
use tracing::debug;

/// Holds the consolidated table of the last requested root code.
#[derive(Debug, Default)]
pub struct ReportSession {
    cached: Option<ConsolidatedTable>,
}

impl ReportSession {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cached_code(&self) -> Option<&str> {
        self.cached.as_ref().map(|c| c.root_code.as_str())
    }

    /// Return the table for `root`, rebuilding it only when the code differs
    /// from the cached one. A failed rebuild leaves the session empty.
    pub async fn load<F: Fetch>(
        &mut self,
        consolidator: &Consolidator<F>,
        root: &str,
    ) -> Result<&ConsolidatedTable, ConsolidationError> {
        let table = match self.cached.take() {
            Some(cached) if cached.root_code == root => {
                debug!(root, "using cached consolidation");
                cached
            }
            _ => consolidator.consolidate(root).await?,
        };
        Ok(self.cached.insert(table))
    }
}
