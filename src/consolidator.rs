use crate::fetcher::{Fetch, FetchError, FetchOutcome};
use crate::hierarchy::discover_members;
use crate::labels::apply_substitutions;
use crate::models::{Table, ORIGIN_FIELD};
use crate::normalizer::normalize;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("no data returned for entity {0}")]
    NoRootData(String),
    #[error("fetching entity {code} failed")]
    RootFetch {
        code: String,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationReport {
    /// Hierarchy members found in the root table, sorted.
    pub discovered: Vec<String>,
    pub merged: Vec<String>,
    pub skipped: Vec<String>,
    pub total_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedTable {
    pub root_code: String,
    pub table: Table,
    pub report: ConsolidationReport,
}

pub struct Consolidator<F> {
    fetcher: F,
}

impl<F: Fetch> Consolidator<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch `root`, then every hierarchy member it names, and merge the
    /// results into one table tagged with each row's origin.
    ///
    /// Only the root fetch is fatal. Members are fetched concurrently but
    /// merged in sorted code order after the root rows, and a member whose
    /// fetch fails or comes back empty is skipped.
    pub async fn consolidate(&self, root: &str) -> Result<ConsolidatedTable, ConsolidationError> {
        let outcome = self.fetcher.fetch(root).await;
        if let FetchOutcome::Failed(source) = outcome {
            return Err(ConsolidationError::RootFetch {
                code: root.to_string(),
                source,
            });
        }
        let mut table =
            normalize(&outcome).ok_or_else(|| ConsolidationError::NoRootData(root.to_string()))?;
        table.set_column(ORIGIN_FIELD, Value::String(root.to_string()));

        let members: Vec<String> = discover_members(&table, root).into_iter().collect();
        let mut report = ConsolidationReport {
            discovered: members.clone(),
            ..Default::default()
        };
        if !members.is_empty() {
            info!(root, members = ?members, "expanding hierarchy");
        }

        let outcomes = join_all(members.iter().map(|code| self.fetcher.fetch(code))).await;
        for (code, outcome) in members.into_iter().zip(outcomes) {
            match normalize(&outcome) {
                Some(mut member_table) => {
                    member_table.set_column(ORIGIN_FIELD, Value::String(code.clone()));
                    table.append(member_table);
                    report.merged.push(code);
                }
                None => {
                    match &outcome {
                        FetchOutcome::Failed(e) => warn!(code = %code, error = %e, "skipping hierarchy member"),
                        _ => warn!(code = %code, "hierarchy member returned no data"),
                    }
                    report.skipped.push(code);
                }
            }
        }

        apply_substitutions(&mut table);
        report.total_rows = table.len();
        info!(
            root,
            rows = report.total_rows,
            merged = report.merged.len(),
            skipped = report.skipped.len(),
            "consolidated"
        );

        Ok(ConsolidatedTable {
            root_code: root.to_string(),
            table,
            report,
        })
    }
}
