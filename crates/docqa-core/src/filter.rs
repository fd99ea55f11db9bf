//! Metadata filters: a conjunction of equality and range conditions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::payload::{FILENAME, SOURCE_DOCUMENT_ID, UPLOADED_AT};
use crate::types::{MetaValue, Metadata};

/// Payload fields that always hold strings.
const STRING_FIELDS: [&str; 3] = [FILENAME, SOURCE_DOCUMENT_ID, UPLOADED_AT];

/// Bounds of a range condition. Unset bounds are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub gt: Option<MetaValue>,
    pub gte: Option<MetaValue>,
    pub lt: Option<MetaValue>,
    pub lte: Option<MetaValue>,
}

impl Range {
    pub fn gt(mut self, v: impl Into<MetaValue>) -> Self { self.gt = Some(v.into()); self }
    pub fn gte(mut self, v: impl Into<MetaValue>) -> Self { self.gte = Some(v.into()); self }
    pub fn lt(mut self, v: impl Into<MetaValue>) -> Self { self.lt = Some(v.into()); self }
    pub fn lte(mut self, v: impl Into<MetaValue>) -> Self { self.lte = Some(v.into()); self }

    fn contains(&self, value: &MetaValue) -> bool {
        let check = |bound: &Option<MetaValue>, ok: fn(Ordering) -> bool| match bound {
            None => true,
            Some(b) => value.compare(b).is_some_and(ok),
        };
        check(&self.gt, Ordering::is_gt)
            && check(&self.gte, Ordering::is_ge)
            && check(&self.lt, Ordering::is_lt)
            && check(&self.lte, Ordering::is_le)
    }

    /// The bounds as `(sql operator, value)` pairs.
    pub fn bounds(&self) -> Vec<(&'static str, &MetaValue)> {
        let mut out = Vec::new();
        if let Some(v) = &self.gt { out.push((">", v)); }
        if let Some(v) = &self.gte { out.push((">=", v)); }
        if let Some(v) = &self.lt { out.push(("<", v)); }
        if let Some(v) = &self.lte { out.push(("<=", v)); }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Match {
    Eq(MetaValue),
    Range(Range),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(flatten)]
    pub matcher: Match,
}

impl Condition {
    /// A missing field never satisfies a condition.
    pub fn matches(&self, fields: &Metadata) -> bool {
        let Some(value) = fields.get(&self.field) else { return false };
        match &self.matcher {
            Match::Eq(expected) => value.compare(expected) == Some(Ordering::Equal),
            Match::Range(range) => range.contains(value),
        }
    }
}

/// A chunk is eligible when every condition holds against its payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self { Self::default() }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.conditions.push(Condition { field: field.into(), matcher: Match::Eq(value.into()) });
        self
    }

    pub fn range(mut self, field: impl Into<String>, range: Range) -> Self {
        self.conditions.push(Condition { field: field.into(), matcher: Match::Range(range) });
        self
    }

    pub fn is_empty(&self) -> bool { self.conditions.is_empty() }

    pub fn matches(&self, fields: &Metadata) -> bool {
        self.conditions.iter().all(|c| c.matches(fields))
    }

    /// Parse `field=value` pairs as used on the command line. Values that
    /// parse as integers, floats or booleans are typed accordingly, except
    /// for string payload fields and values wrapped in double quotes.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut filter = Filter::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (field, raw) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("filter '{pair}' is not field=value")))?;
            let field = field.trim();
            if field.is_empty() {
                return Err(Error::Config(format!("filter '{pair}' has an empty field")));
            }
            let raw = raw.trim();
            let value = match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                Some(quoted) => MetaValue::Str(quoted.to_string()),
                None if STRING_FIELDS.contains(&field) => MetaValue::Str(raw.to_string()),
                None => parse_scalar(raw),
            };
            filter = filter.eq(field, value);
        }
        Ok(filter)
    }
}

fn parse_scalar(raw: &str) -> MetaValue {
    if let Ok(i) = raw.parse::<i64>() { return MetaValue::Int(i); }
    if let Ok(f) = raw.parse::<f64>() { return MetaValue::Float(f); }
    match raw {
        "true" => MetaValue::Bool(true),
        "false" => MetaValue::Bool(false),
        _ => MetaValue::Str(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, MetaValue)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn conjunction_requires_every_condition() {
        let f = Filter::new().eq("filename", "a.pdf").range("chunk_index", Range::default().gte(2_i64).lt(5_i64));
        assert!(f.matches(&fields(&[("filename", "a.pdf".into()), ("chunk_index", MetaValue::Int(3))])));
        assert!(!f.matches(&fields(&[("filename", "a.pdf".into()), ("chunk_index", MetaValue::Int(5))])));
        assert!(!f.matches(&fields(&[("filename", "b.pdf".into()), ("chunk_index", MetaValue::Int(3))])));
    }

    #[test]
    fn missing_field_and_mixed_kinds_do_not_match() {
        let f = Filter::new().eq("lang", "en");
        assert!(!f.matches(&Metadata::new()));
        let f = Filter::new().eq("page", 1_i64);
        assert!(!f.matches(&fields(&[("page", "1".into())])));
        assert!(f.matches(&fields(&[("page", MetaValue::Float(1.0))])));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&Metadata::new()));
    }

    #[test]
    fn parse_pairs_types_values() {
        let f = Filter::parse_pairs(&["filename=policy.pdf", "chunk_index=2", "draft=false"]).unwrap();
        assert_eq!(f.conditions.len(), 3);
        assert_eq!(f.conditions[1].matcher, Match::Eq(MetaValue::Int(2)));
        assert_eq!(f.conditions[2].matcher, Match::Eq(MetaValue::Bool(false)));
        assert!(Filter::parse_pairs(&["novalue"]).is_err());
    }

    #[test]
    fn parse_pairs_keeps_string_fields_and_quoted_values_as_strings() {
        let f = Filter::parse_pairs(&["filename=2024", "source_document_id=42", "version=\"7\"", "page=7"]).unwrap();
        assert_eq!(f.conditions[0].matcher, Match::Eq(MetaValue::from("2024")));
        assert_eq!(f.conditions[1].matcher, Match::Eq(MetaValue::from("42")));
        assert_eq!(f.conditions[2].matcher, Match::Eq(MetaValue::from("7")));
        assert_eq!(f.conditions[3].matcher, Match::Eq(MetaValue::Int(7)));
        assert!(f.conditions[..1].iter().all(|c| c.matches(&fields(&[("filename", "2024".into())]))));
    }
}
