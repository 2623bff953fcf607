//! Predicate tree: interior `ALL`/`ANY` nodes, leaf comparisons against a
//! named feature.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::features::{FeatureValue, FeatureVector};
use crate::features::vocabulary::{self, FeatureType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    In,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaf {
    pub feature: String,
    pub op: Op,
    pub value: JsonValue,
}

/// A predicate tree node. Interior nodes are logical `ALL` (AND) / `ANY`
/// (OR) over children; leaves are feature comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Leaf(Leaf),
}

/// Evaluates a predicate tree against a feature vector. Pure fold, no
/// short-circuit ordering is observable: `ALL`/`ANY` evaluate every child
/// regardless of order.
pub fn eval(predicate: &Predicate, features: &FeatureVector) -> bool {
    match predicate {
        Predicate::All { all } => all.iter().map(|p| eval(p, features)).all(|b| b),
        Predicate::Any { any } => any.iter().map(|p| eval(p, features)).any(|b| b),
        Predicate::Leaf(leaf) => eval_leaf(leaf, features),
    }
}

fn eval_leaf(leaf: &Leaf, features: &FeatureVector) -> bool {
    let Some(actual) = features.get_value(&leaf.feature) else {
        // Unknown/absent feature -> leaf is false.
        return false;
    };

    match (&actual, leaf.op) {
        (FeatureValue::Bool(a), Op::Eq) => leaf.value.as_bool().is_some_and(|v| *a == v),
        (FeatureValue::Bool(a), Op::Ne) => leaf.value.as_bool().is_some_and(|v| *a != v),

        (FeatureValue::Int(a), op) => match leaf.value.as_i64() {
            Some(v) => compare_ord(*a, v, op),
            None => false,
        },
        (FeatureValue::Float(a), op) => match leaf.value.as_f64() {
            Some(v) => compare_partial(*a, v, op),
            None => false,
        },
        (FeatureValue::Enum(a), Op::Eq) => leaf.value.as_str().is_some_and(|v| a == v),
        (FeatureValue::Enum(a), Op::Ne) => leaf.value.as_str().is_some_and(|v| a != v),
        (FeatureValue::Enum(a), Op::In) => leaf
            .value
            .as_array()
            .is_some_and(|arr| arr.iter().any(|v| v.as_str() == Some(a.as_str()))),
        _ => false,
    }
}

fn compare_ord(a: i64, b: i64, op: Op) -> bool {
    match op {
        Op::Eq => a == b,
        Op::Ne => a != b,
        Op::Ge => a >= b,
        Op::Le => a <= b,
        Op::Gt => a > b,
        Op::Lt => a < b,
        Op::In => false,
    }
}

fn compare_partial(a: f64, b: f64, op: Op) -> bool {
    match op {
        Op::Eq => a == b,
        Op::Ne => a != b,
        Op::Ge => a >= b,
        Op::Le => a <= b,
        Op::Gt => a > b,
        Op::Lt => a < b,
        Op::In => false,
    }
}

/// Static validation: every leaf's feature must exist in the vocabulary,
/// `in` values must be arrays, and numeric ops must only apply to
/// int/float features.
pub fn validate(predicate: &Predicate) -> Result<(), String> {
    match predicate {
        Predicate::All { all } => all.iter().try_for_each(validate),
        Predicate::Any { any } => any.iter().try_for_each(validate),
        Predicate::Leaf(leaf) => validate_leaf(leaf),
    }
}

fn validate_leaf(leaf: &Leaf) -> Result<(), String> {
    let ty = vocabulary::lookup(&leaf.feature)
        .ok_or_else(|| format!("unknown feature '{}'", leaf.feature))?;

    if leaf.op == Op::In && !leaf.value.is_array() {
        return Err(format!("operator `in` on '{}' requires an array value", leaf.feature));
    }

    match ty {
        FeatureType::Bool => {
            if !matches!(leaf.op, Op::Eq | Op::Ne) {
                return Err(format!(
                    "operator {:?} not valid for boolean feature '{}'",
                    leaf.op, leaf.feature
                ));
            }
        }
        FeatureType::Int | FeatureType::Float => {
            if leaf.op == Op::In {
                return Err(format!("operator `in` not valid for numeric feature '{}'", leaf.feature));
            }
        }
        FeatureType::Enum(values) => {
            if leaf.op == Op::In {
                let arr = leaf.value.as_array().unwrap();
                for v in arr {
                    if !v.as_str().is_some_and(|s| values.contains(&s)) {
                        return Err(format!(
                            "value {v} not valid for enum feature '{}'",
                            leaf.feature
                        ));
                    }
                }
            } else if !matches!(leaf.op, Op::Eq | Op::Ne) {
                return Err(format!(
                    "operator {:?} not valid for enum feature '{}'",
                    leaf.op, leaf.feature
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_and_any_is_or() {
        let mut fv = FeatureVector::default();
        fv.table_count = Some(5);
        fv.has_having = Some(false);

        let all = Predicate::All {
            all: vec![
                Predicate::Leaf(Leaf { feature: "table_count".into(), op: Op::Ge, value: serde_json::json!(3) }),
                Predicate::Leaf(Leaf { feature: "has_having".into(), op: Op::Eq, value: serde_json::json!(true) }),
            ],
        };
        assert!(!eval(&all, &fv));

        let any = Predicate::Any {
            any: vec![
                Predicate::Leaf(Leaf { feature: "table_count".into(), op: Op::Ge, value: serde_json::json!(3) }),
                Predicate::Leaf(Leaf { feature: "has_having".into(), op: Op::Eq, value: serde_json::json!(true) }),
            ],
        };
        assert!(eval(&any, &fv));
    }

    #[test]
    fn order_independent_within_all() {
        let mut fv = FeatureVector::default();
        fv.table_count = Some(5);
        fv.cte_count = Some(2);

        let p1 = vec![
            Predicate::Leaf(Leaf { feature: "table_count".into(), op: Op::Ge, value: serde_json::json!(3) }),
            Predicate::Leaf(Leaf { feature: "cte_count".into(), op: Op::Ge, value: serde_json::json!(1) }),
        ];
        let mut p2 = p1.clone();
        p2.reverse();
        assert_eq!(
            eval(&Predicate::All { all: p1 }, &fv),
            eval(&Predicate::All { all: p2 }, &fv)
        );
    }

    #[test]
    fn validate_rejects_unknown_feature() {
        let leaf = Leaf { feature: "foo_feature".into(), op: Op::Eq, value: serde_json::json!(1) };
        assert!(validate(&Predicate::Leaf(leaf)).is_err());
    }

    #[test]
    fn validate_rejects_in_on_numeric() {
        let leaf = Leaf { feature: "table_count".into(), op: Op::In, value: serde_json::json!([1, 2]) };
        assert!(validate(&Predicate::Leaf(leaf)).is_err());
    }
}
