//! Parses an LLM response into rewrite candidates, accepting either a
//! structured JSON object or a single fenced SQL block.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ParsedRewrite {
    pub id: String,
    pub transform: Option<String>,
    pub sql: String,
    pub invariants_kept: Vec<String>,
    pub expected_speedup: Option<f64>,
    pub risk: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub rewrites: Vec<ParsedRewrite>,
    pub explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RewriteSetJson {
    id: String,
    #[serde(default)]
    transform: Option<String>,
    nodes: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    invariants_kept: Vec<String>,
    #[serde(default)]
    expected_speedup: Option<f64>,
    #[serde(default)]
    risk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseJson {
    rewrite_sets: Vec<RewriteSetJson>,
    #[serde(default)]
    explanation: Option<String>,
}

pub fn parse_llm_output(raw: &str) -> Result<ParsedResponse, String> {
    if let Some(parsed) = try_parse_json(raw) {
        return Ok(parsed);
    }
    if let Some(sql) = extract_fenced_sql(raw) {
        return Ok(ParsedResponse {
            rewrites: vec![ParsedRewrite {
                id: "default".to_string(),
                transform: None,
                sql,
                invariants_kept: Vec::new(),
                expected_speedup: None,
                risk: None,
            }],
            explanation: None,
        });
    }
    Err("response is not a rewrite_sets JSON object or a fenced sql block".to_string())
}

fn try_parse_json(raw: &str) -> Option<ParsedResponse> {
    let trimmed = raw.trim();
    let json_text = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        extract_fenced_block(raw, "json")?
    };

    let parsed: ResponseJson = serde_json::from_str(&json_text).ok()?;
    if parsed.rewrite_sets.is_empty() {
        return None;
    }

    let rewrites = parsed
        .rewrite_sets
        .into_iter()
        .filter_map(|rs| {
            let sql = assemble_sql(&rs.nodes)?;
            Some(ParsedRewrite {
                id: rs.id,
                transform: rs.transform,
                sql,
                invariants_kept: rs.invariants_kept,
                expected_speedup: rs.expected_speedup,
                risk: rs.risk,
            })
        })
        .collect::<Vec<_>>();

    if rewrites.is_empty() {
        return None;
    }

    Some(ParsedResponse { rewrites, explanation: parsed.explanation })
}

/// Reconstructs one executable statement from a rewrite set's named nodes.
///
/// A single node is the whole statement, named however the model liked
/// (existing responses use "main"). With more than one node, the DAG
/// convention (`dag::build`) applies: the node named `__final__` is the
/// final SELECT and every other node is a CTE feeding it, assembled into a
/// `WITH` clause in node-name order.
fn assemble_sql(nodes: &std::collections::BTreeMap<String, String>) -> Option<String> {
    if nodes.len() == 1 {
        return nodes.values().next().cloned();
    }

    let final_sql = nodes.get("__final__")?;
    let ctes: Vec<String> = nodes
        .iter()
        .filter(|(name, _)| name.as_str() != "__final__")
        .map(|(name, sql)| format!("{name} AS ({sql})"))
        .collect();

    if ctes.is_empty() {
        return Some(final_sql.clone());
    }
    Some(format!("WITH {} {}", ctes.join(", "), final_sql))
}

fn extract_fenced_sql(raw: &str) -> Option<String> {
    extract_fenced_block(raw, "sql")
}

fn extract_fenced_block(raw: &str, lang: &str) -> Option<String> {
    let fence = format!("```{lang}");
    let start = raw.find(&fence)? + fence.len();
    let rest = &raw[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_sql_block() {
        let raw = "Here's my answer:\n```sql\nSELECT a FROM t WHERE b = 1\n```\n";
        let parsed = parse_llm_output(raw).unwrap();
        assert_eq!(parsed.rewrites.len(), 1);
        assert_eq!(parsed.rewrites[0].sql, "SELECT a FROM t WHERE b = 1");
    }

    #[test]
    fn parses_rewrite_sets_json() {
        let raw = r#"{"rewrite_sets": [{"id": "r1", "transform": "filter_pushdown", "nodes": {"main": "SELECT 1"}, "invariants_kept": ["rows"], "expected_speedup": 1.3, "risk": "low"}], "explanation": "pushed the filter down"}"#;
        let parsed = parse_llm_output(raw).unwrap();
        assert_eq!(parsed.rewrites.len(), 1);
        assert_eq!(parsed.rewrites[0].id, "r1");
        assert_eq!(parsed.rewrites[0].sql, "SELECT 1");
        assert_eq!(parsed.explanation.as_deref(), Some("pushed the filter down"));
    }

    #[test]
    fn rejects_unparseable_response() {
        let raw = "I'm not sure how to help with that.";
        assert!(parse_llm_output(raw).is_err());
    }

    #[test]
    fn assembles_with_clause_from_multi_node_rewrite_set() {
        let raw = r#"{"rewrite_sets": [{"id": "r1", "nodes": {
            "agg": "SELECT customer_id, SUM(amount) AS total FROM orders GROUP BY customer_id",
            "__final__": "SELECT * FROM agg WHERE total > 100"
        }}]}"#;
        let parsed = parse_llm_output(raw).unwrap();
        assert_eq!(parsed.rewrites.len(), 1);
        assert_eq!(
            parsed.rewrites[0].sql,
            "WITH agg AS (SELECT customer_id, SUM(amount) AS total FROM orders GROUP BY customer_id) SELECT * FROM agg WHERE total > 100"
        );
    }

    #[test]
    fn multi_node_rewrite_set_without_final_node_is_dropped() {
        let raw = r#"{"rewrite_sets": [{"id": "r1", "nodes": {"a": "SELECT 1", "b": "SELECT 2"}}]}"#;
        assert!(parse_llm_output(raw).is_err());
    }
}
