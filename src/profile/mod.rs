//! Engine Profile Store.
//!
//! The profile is authored as markdown and injected into the prompt
//! verbatim — there is no translation layer. This module only parses the
//! markdown back out far enough to validate structural invariants and to
//! feed `corpus::index_example`; the text itself is what ships to the LLM.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{OptimizerError, OptimizerResult};
use crate::rules::{classify, RuleKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strength {
    pub id: String,
    pub summary: String,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gap {
    pub id: String,
    pub priority: String,
    pub what: String,
    pub why: String,
    pub hunt: String,
    pub won: Vec<String>,
    pub lost: Vec<String>,
    pub rules: Vec<String>,
}

/// The structure a markdown profile parses back into, for CI checks and
/// for `corpus::index_example`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineProfile {
    pub engine: String,
    pub version: String,
    pub benchmark_source: String,
    pub validation_date: String,
    pub strengths: Vec<Strength>,
    pub gaps: Vec<Gap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// `load(dialect) -> (markdown_text, structure)`.
pub fn load(dir: &Path, dialect: &str) -> OptimizerResult<(String, EngineProfile)> {
    let path = dir.join(format!("engine_profile_{dialect}.md"));
    let text = std::fs::read_to_string(&path)
        .map_err(|e| OptimizerError::ProfileInvalid(format!("{}: {e}", path.display())))?;
    let structure = parse(&text)?;
    let errors = validate_structure(&structure);
    if !errors.is_empty() {
        let msg = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(OptimizerError::ProfileInvalid(msg));
    }
    Ok((text, structure))
}

/// `validate(markdown_text) -> [errors]`. Never fails the call itself —
/// returns the list of violations.
pub fn validate(markdown_text: &str) -> OptimizerResult<Vec<ValidationError>> {
    let structure = parse(markdown_text)?;
    Ok(validate_structure(&structure))
}

fn validate_structure(profile: &EngineProfile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if profile.engine.is_empty() {
        errors.push(ValidationError { path: "header.engine".into(), reason: "missing".into() });
    }
    if profile.version.is_empty() {
        errors.push(ValidationError { path: "header.version".into(), reason: "missing".into() });
    }
    if profile.benchmark_source.is_empty() {
        errors.push(ValidationError {
            path: "header.benchmark_source".into(),
            reason: "missing".into(),
        });
    }

    for gap in &profile.gaps {
        let path = format!("gaps.{}", gap.id);
        if gap.what.is_empty() {
            errors.push(ValidationError { path: path.clone(), reason: "missing What".into() });
        }
        if gap.why.is_empty() {
            errors.push(ValidationError { path: path.clone(), reason: "missing Why".into() });
        }
        if gap.hunt.is_empty() {
            errors.push(ValidationError { path: path.clone(), reason: "missing Hunt".into() });
        }
        if gap.won.is_empty() {
            errors.push(ValidationError { path: path.clone(), reason: "missing Won".into() });
        }
        if gap.lost.is_empty() {
            errors.push(ValidationError { path: path.clone(), reason: "missing Lost".into() });
        }
        // Every gap needs >=1 diagnostic rule and >=1 safety rule. The
        // markdown only carries a flat rule-id list, so the split is read
        // off the `SAFETY_` naming convention (`rules::classify`) rather
        // than a separate field; `rules::validate_rule` validates one
        // rule's predicate tree in isolation and never sees this list, so
        // the floor has to be checked here.
        if gap.rules.is_empty() {
            errors.push(ValidationError {
                path,
                reason: "missing Rules (every gap needs >=1 diagnostic and >=1 safety rule)".into(),
            });
        } else {
            let has_diagnostic = gap.rules.iter().any(|r| classify(r) == RuleKind::Diagnostic);
            let has_safety = gap.rules.iter().any(|r| classify(r) == RuleKind::Safety);
            if !has_diagnostic || !has_safety {
                errors.push(ValidationError {
                    path,
                    reason: format!(
                        "needs >=1 diagnostic and >=1 safety (SAFETY_-prefixed) rule, found {:?}",
                        gap.rules
                    ),
                });
            }
        }
    }

    errors
}

/// Parses the authored markdown back into `EngineProfile`. Tolerant of
/// extra prose — it extracts only the fields the structural invariants
/// need, via header key:value lines and `## Gap: ID` / labeled-line
/// sections, matching how a human would actually format this document.
fn parse(text: &str) -> OptimizerResult<EngineProfile> {
    let header_re = Regex::new(r"(?m)^\s*-\s*\*{0,2}(Engine|Version|Benchmark source|Validation date)\*{0,2}\s*:\s*(.+)$").unwrap();
    let mut profile = EngineProfile::default();
    for cap in header_re.captures_iter(text) {
        let key = cap[1].to_lowercase();
        let val = cap[2].trim().to_string();
        match key.as_str() {
            "engine" => profile.engine = val,
            "version" => profile.version = val,
            "benchmark source" => profile.benchmark_source = val,
            "validation date" => profile.validation_date = val,
            _ => {}
        }
    }

    let strength_re = Regex::new(r"(?m)^###\s*Strength:\s*(\S+)\s*\n([\s\S]*?)(?=\n##|\z)").unwrap();
    for cap in strength_re.captures_iter(text) {
        let id = cap[1].to_string();
        let body = &cap[2];
        let summary = first_labeled_line(body, "Summary").unwrap_or_default();
        let note = first_labeled_line(body, "Note").unwrap_or_default();
        profile.strengths.push(Strength { id, summary, note });
    }

    let gap_re = Regex::new(r"(?m)^##\s*Gap:\s*(\S+)\s*\n([\s\S]*?)(?=\n##\s|\z)").unwrap();
    for cap in gap_re.captures_iter(text) {
        let id = cap[1].to_string();
        let body = &cap[2];
        let gap = Gap {
            id,
            priority: first_labeled_line(body, "Priority").unwrap_or_default(),
            what: first_labeled_line(body, "What").unwrap_or_default(),
            why: first_labeled_line(body, "Why").unwrap_or_default(),
            hunt: first_labeled_line(body, "Hunt").unwrap_or_default(),
            won: list_after_label(body, "Won"),
            lost: list_after_label(body, "Lost"),
            rules: list_after_label(body, "Rules"),
        };
        profile.gaps.push(gap);
    }

    Ok(profile)
}

fn first_labeled_line(body: &str, label: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?m)^\s*-?\s*\*{{0,2}}{label}\*{{0,2}}\s*:\s*(.+)$")).unwrap();
    re.captures(body).map(|c| c[1].trim().to_string())
}

fn list_after_label(body: &str, label: &str) -> Vec<String> {
    let re = Regex::new(&format!(r"(?m)^\s*-?\s*\*{{0,2}}{label}\*{{0,2}}\s*:\s*(.+)$")).unwrap();
    match re.captures(body) {
        Some(c) => c[1].split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    }
}

/// Round-trip invariant : serializing an `EngineProfile` back
/// to markdown and re-parsing yields the same structure. This crate does
/// not regenerate the human-authored prose; `to_markdown` only emits the
/// structural skeleton used by tests to check `parse(to_markdown(p)) == p`.
pub fn to_markdown(profile: &EngineProfile) -> String {
    let mut out = String::new();
    out.push_str(&format!("- Engine: {}\n", profile.engine));
    out.push_str(&format!("- Version: {}\n", profile.version));
    out.push_str(&format!("- Benchmark source: {}\n", profile.benchmark_source));
    out.push_str(&format!("- Validation date: {}\n\n", profile.validation_date));

    for s in &profile.strengths {
        out.push_str(&format!("### Strength: {}\n- Summary: {}\n- Note: {}\n\n", s.id, s.summary, s.note));
    }

    for g in &profile.gaps {
        out.push_str(&format!(
            "## Gap: {}\n- Priority: {}\n- What: {}\n- Why: {}\n- Hunt: {}\n- Won: {}\n- Lost: {}\n- Rules: {}\n\n",
            g.id, g.priority, g.what, g.why, g.hunt, g.won.join(", "), g.lost.join(", "), g.rules.join(", ")
        ));
    }

    out
}
