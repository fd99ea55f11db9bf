//! Split a metadata filter into a SQL prefilter over typed columns and the
//! conditions that must be evaluated against decoded payloads.

use docqa_core::{Condition, Filter, Match, MetaValue};

use super::schema::{CHUNK_INDEX, FILENAME, SOURCE_DOCUMENT_ID, UPLOADED_AT};
use super::table::quote;

#[derive(Debug, Default, PartialEq)]
pub struct Pushdown {
    /// Conjunction of SQL predicates, `None` when nothing was pushable.
    pub sql: Option<String>,
    pub residual: Filter,
}

fn literal(field: &str, value: &MetaValue) -> Option<String> {
    match (field, value) {
        (FILENAME | SOURCE_DOCUMENT_ID | UPLOADED_AT, MetaValue::Str(s)) => Some(quote(s)),
        (CHUNK_INDEX, MetaValue::Int(i)) => Some(i.to_string()),
        _ => None,
    }
}

fn to_sql(condition: &Condition) -> Option<String> {
    let field = condition.field.as_str();
    match &condition.matcher {
        Match::Eq(value) => literal(field, value).map(|v| format!("{field} = {v}")),
        Match::Range(range) => {
            let bounds = range.bounds();
            if bounds.is_empty() {
                return None;
            }
            let parts: Option<Vec<String>> = bounds
                .into_iter()
                .map(|(op, value)| literal(field, value).map(|v| format!("{field} {op} {v}")))
                .collect();
            parts.map(|p| p.join(" AND "))
        }
    }
}

pub fn split(filter: Option<&Filter>) -> Pushdown {
    let Some(filter) = filter else { return Pushdown::default() };
    let mut sql = Vec::new();
    let mut residual = Filter::new();
    for condition in &filter.conditions {
        match to_sql(condition) {
            Some(predicate) => sql.push(format!("({predicate})")),
            None => residual.conditions.push(condition.clone()),
        }
    }
    Pushdown { sql: (!sql.is_empty()).then(|| sql.join(" AND ")), residual }
}
