use crate::models::Table;
use serde_json::Value;
use std::collections::BTreeSet;

pub const HIERARCHY_FIELD: &str = "DC_HIERARQUIA";
const DELIMITER: char = '/';

/// Codes listed in the slash-delimited hierarchy field of any row.
pub fn extract_hierarchy(table: &Table) -> BTreeSet<String> {
    table
        .rows
        .iter()
        .filter_map(|row| match row.get(HIERARCHY_FIELD) {
            Some(Value::String(path)) => Some(path),
            _ => None,
        })
        .flat_map(|path| path.split(DELIMITER))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hierarchy members worth fetching for `root`.
///
/// State-level roots (two characters or fewer) sit at the top of the
/// hierarchy and are never expanded. The root itself is never a member.
pub fn discover_members(table: &Table, root: &str) -> BTreeSet<String> {
    if root.len() <= 2 {
        return BTreeSet::new();
    }
    let mut codes = extract_hierarchy(table);
    codes.remove(root);
    codes
}
