use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::core::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operator {
    Equals(String),
    NotEquals(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    op: Operator,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match &self.op {
            Operator::Equals(v) => value == Some(v),
            Operator::NotEquals(v) => value != Some(v),
            Operator::In(set) => value.is_some_and(|v| set.contains(v)),
            Operator::NotIn(set) => !value.is_some_and(|v| set.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A parsed label selector.
///
/// Accepts the usual comma-separated requirements: `k=v`, `k==v`, `k!=v`,
/// `k in (a,b)`, `k notin (a,b)`, `k` and `!k`. The empty selector matches
/// everything.
///
/// # Examples
///
/// ```
/// use catalogdb::LabelSelector;
/// use std::collections::BTreeMap;
///
/// let selector: LabelSelector = "app=nginx,tier in (web, edge)".parse().unwrap();
/// let labels = BTreeMap::from([
///     ("app".to_string(), "nginx".to_string()),
///     ("tier".to_string(), "edge".to_string()),
/// ]);
/// assert!(selector.matches(&labels));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

fn invalid(selector: &str, reason: impl fmt::Display) -> StoreError {
    StoreError::InvalidArgument(format!("invalid label selector {:?}: {}", selector, reason))
}

/// Splits on commas outside parentheses.
fn split_requirements(input: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&input[start..]);
    Ok(parts)
}

fn check_key(key: &str) -> Result<String, String> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid {
        return Err(format!("invalid key {:?}", key));
    }
    Ok(key.to_string())
}

fn check_value(value: &str) -> Result<String, String> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(format!("invalid value {:?}", value));
    }
    Ok(value.to_string())
}

fn parse_set(raw: &str) -> Result<BTreeSet<String>, String> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("expected a parenthesized set, got {:?}", raw.trim()))?;

    let values = inner
        .split(',')
        .map(|v| check_value(v.trim()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.iter().all(String::is_empty) {
        return Err("empty value set".to_string());
    }
    Ok(values)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement {
            key: check_key(key.trim())?,
            op: Operator::DoesNotExist,
        });
    }

    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement {
            key: check_key(key.trim())?,
            op: Operator::NotEquals(check_value(value.trim())?),
        });
    }

    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement {
            key: check_key(key.trim())?,
            op: Operator::Equals(check_value(value.trim())?),
        });
    }

    let mut tokens = term.splitn(2, char::is_whitespace);
    let key = tokens.next().unwrap_or_default();
    match tokens.next().map(str::trim_start) {
        None => Ok(Requirement {
            key: check_key(key)?,
            op: Operator::Exists,
        }),
        Some(rest) => {
            if let Some(set) = rest.strip_prefix("notin") {
                Ok(Requirement {
                    key: check_key(key)?,
                    op: Operator::NotIn(parse_set(set)?),
                })
            } else if let Some(set) = rest.strip_prefix("in") {
                Ok(Requirement {
                    key: check_key(key)?,
                    op: Operator::In(parse_set(set)?),
                })
            } else {
                Err(format!("unknown operator in {:?}", term))
            }
        }
    }
}

impl FromStr for LabelSelector {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_requirements(s)
            .map_err(|e| invalid(s, e))?
            .into_iter()
            .map(|term| parse_requirement(term.trim()).map_err(|e| invalid(s, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }
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

    fn selector(s: &str) -> LabelSelector {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(selector("").matches(&labels(&[])));
        assert!(selector("  ").is_empty());
    }

    #[test]
    fn test_equality() {
        let l = labels(&[("app", "nginx"), ("env", "prod")]);
        assert!(selector("app=nginx").matches(&l));
        assert!(selector("app==nginx,env=prod").matches(&l));
        assert!(!selector("app=redis").matches(&l));
        assert!(selector("app!=redis").matches(&l));
        assert!(selector("missing!=x").matches(&l));
        assert!(!selector("env!=prod").matches(&l));
    }

    #[test]
    fn test_set_based() {
        let l = labels(&[("tier", "web")]);
        assert!(selector("tier in (web, db)").matches(&l));
        assert!(!selector("tier in (db)").matches(&l));
        assert!(selector("tier notin (db,cache)").matches(&l));
        assert!(selector("other notin (db)").matches(&l));
        assert!(!selector("other in (db)").matches(&l));
    }

    #[test]
    fn test_existence() {
        let l = labels(&[("policy.kyverno.io/name", "require-labels")]);
        assert!(selector("policy.kyverno.io/name").matches(&l));
        assert!(!selector("!policy.kyverno.io/name").matches(&l));
        assert!(selector("!absent").matches(&l));
    }

    #[test]
    fn test_mixed_requirements_split_outside_parentheses() {
        let l = labels(&[("app", "nginx"), ("tier", "db")]);
        assert!(selector("tier in (web,db),app=nginx,!debug").matches(&l));
    }

    #[test]
    fn test_invalid_selectors() {
        for bad in ["app in web", "tier in (web", "a=b)", "bad key=1", "app=ngi nx", "k in ()"] {
            assert!(
                matches!(bad.parse::<LabelSelector>(), Err(StoreError::InvalidArgument(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
