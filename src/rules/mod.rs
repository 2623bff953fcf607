//! Predicate Evaluator, and the `DetectionRule` data model it evaluates
//! against.
//!
//! Rules are authored JSON, one file per gap id, under
//! `constraints/detection_rules/{dialect}/{GAP_ID}.json` — data-driven
//! predicate trees rather than hard-coded trait objects, so a rule can be
//! authored and machine-validated rather than compiled in.

pub mod predicate;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{OptimizerError, OptimizerResult};
use crate::features::FeatureVector;

pub use predicate::{Op, Predicate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceRules {
    #[serde(default)]
    pub high_when: Option<Predicate>,
    #[serde(default)]
    pub low_when: Option<Predicate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectBlock {
    #[serde(default)]
    pub r#match: Option<Predicate>,
    #[serde(default)]
    pub skip: Option<Predicate>,
    #[serde(default)]
    pub confidence: ConfidenceRules,
}

/// One authored detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    pub id: String,
    pub priority: Priority,
    pub detect: DetectBlock,
}

/// Result of evaluating one rule against a feature vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredGap {
    pub gap_id: String,
    pub confidence: String,
    pub priority: Priority,
}

/// `evaluate(rules, features) -> [{gap_id, confidence, priority}]`.
///
/// For each rule: if `skip` matches, drop it; else require `match` to
/// hold; confidence is `high` if `high_when` matches, else `low` if
/// `low_when` matches, else `medium`. No observable ordering dependency
/// within `ALL`/`ANY` (predicate::eval is a pure fold).
pub fn evaluate(rules: &[DetectionRule], features: &FeatureVector) -> Vec<TriggeredGap> {
    let mut out = Vec::new();
    for rule in rules {
        if let Some(skip) = &rule.detect.skip
            && predicate::eval(skip, features)
        {
            continue;
        }

        let matched = match &rule.detect.r#match {
            Some(m) => predicate::eval(m, features),
            None => false,
        };
        if !matched {
            continue;
        }

        let confidence = if rule
            .detect
            .confidence
            .high_when
            .as_ref()
            .is_some_and(|p| predicate::eval(p, features))
        {
            "high"
        } else if rule
            .detect
            .confidence
            .low_when
            .as_ref()
            .is_some_and(|p| predicate::eval(p, features))
        {
            "low"
        } else {
            "medium"
        };

        out.push(TriggeredGap {
            gap_id: rule.id.clone(),
            confidence: confidence.to_string(),
            priority: rule.priority,
        });
    }
    out
}

/// Loads every `*.json` rule file under `dir` (one dialect's
/// `constraints/detection_rules/{dialect}/`) and validates each against
/// the feature vocabulary.
pub fn load_dir(dir: &Path) -> OptimizerResult<Vec<DetectionRule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        let rule: DetectionRule = serde_json::from_str(&content)
            .map_err(|e| OptimizerError::ProfileInvalid(format!("{}: {e}", path.display())))?;
        validate_rule(&rule).map_err(OptimizerError::ProfileInvalid)?;
        rules.push(rule);
    }
    rules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(rules)
}

/// Whether a rule id names a diagnostic rule (detects a gap) or a safety
/// rule (checks a rewrite's precondition). There is no separate `kind`
/// field on `DetectionRule` — the corpus names safety rules with a
/// `SAFETY_` prefix, and that naming convention is the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Diagnostic,
    Safety,
}

pub fn classify(rule_id: &str) -> RuleKind {
    if rule_id.starts_with("SAFETY_") {
        RuleKind::Safety
    } else {
        RuleKind::Diagnostic
    }
}

/// Static validation: every leaf references a known feature, and the
/// operator is type-compatible.
pub fn validate_rule(rule: &DetectionRule) -> Result<(), String> {
    if rule.detect.r#match.is_none() {
        return Err(format!("rule {} has no `match` block", rule.id));
    }
    for p in [
        rule.detect.r#match.as_ref(),
        rule.detect.skip.as_ref(),
        rule.detect.confidence.high_when.as_ref(),
        rule.detect.confidence.low_when.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        predicate::validate(p).map_err(|e| format!("rule {}: {e}", rule.id))?;
    }
    Ok(())
}
