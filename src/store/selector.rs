//! Minimal label selector matching for the in-memory store

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    Exists(String),
}

/// Parsed equality/set-based label selector (`a=b`, `a!=b`, `a in (x, y)`, `a`)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for clause in split_clauses(selector) {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            requirements.push(parse_clause(clause)?);
        }
        Ok(Self { requirements })
    }

    /// Whether `labels` satisfy every requirement
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).map(|v| values.contains(v)).unwrap_or(false),
            Requirement::Exists(k) => labels.contains_key(k),
        })
    }
}

/// Split on commas that are not inside a parenthesised value set
fn split_clauses(selector: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in selector.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                clauses.push(&selector[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    clauses.push(&selector[start..]);
    clauses
}

fn parse_clause(clause: &str) -> Result<Requirement> {
    if let Some((key, rest)) = clause.split_once(" in ") {
        let values = rest
            .trim()
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| Error::validation(format!("Invalid set selector '{}'", clause)))?;
        let values = values
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        return Ok(Requirement::In(key.trim().to_string(), values));
    }
    if let Some((key, value)) = clause.split_once("!=") {
        return Ok(Requirement::NotEquals(key.trim().to_string(), value.trim().to_string()));
    }
    if let Some((key, value)) = clause.split_once("==").or_else(|| clause.split_once('=')) {
        return Ok(Requirement::Equals(key.trim().to_string(), value.trim().to_string()));
    }
    Ok(Requirement::Exists(clause.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_set_selector() {
        let selector = LabelSelector::parse("state in (METERED)").unwrap();
        assert!(selector.matches(Some(&labels(&[("state", "METERED")]))));
        assert!(!selector.matches(Some(&labels(&[("state", "TO_BE_METERED")]))));
        assert!(!selector.matches(None));
    }

    #[test]
    fn test_combined_clauses() {
        let selector = LabelSelector::parse("state in (A, B),instance_guid=i1,tier!=gold").unwrap();
        let l = labels(&[("state", "B"), ("instance_guid", "i1")]);
        assert!(selector.matches(Some(&l)));

        let l = labels(&[("state", "B"), ("instance_guid", "i2")]);
        assert!(!selector.matches(Some(&l)));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::parse("").unwrap();
        assert!(selector.matches(None));
    }
}
