//! QueryDag: an arena-based, acyclic representation of a SQL statement's
//! CTEs and final SELECT.
//!
//! Nodes are CTEs (in parse order) plus the final SELECT; edges point from
//! a node to the nodes it reads from. Construction is per-request and the
//! DAG is discarded after the request — no lifetime beyond one
//! `generator`/`driver` call.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::errors::{OptimizerError, OptimizerResult};

pub type NodeId = usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub id: NodeId,
    pub name: String,
    pub sql_fragment: String,
    pub usage_count: usize,
    /// Best-effort cost attribution, filled in only when an `explain`
    /// capability call was available at construction time.
    pub cost_estimate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDag {
    pub nodes: Vec<DagNode>,
    /// `(from, to)` edges: `from` reads from `to`.
    pub edges: Vec<(NodeId, NodeId)>,
}

impl QueryDag {
    pub fn referenced_by(&self, node: NodeId) -> Vec<NodeId> {
        self.edges.iter().filter(|(from, _)| *from == node).map(|(_, to)| *to).collect()
    }

    fn add_node(&mut self, name: String, sql_fragment: String) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(DagNode { id, name, sql_fragment, usage_count: 0, cost_estimate: None });
        id
    }

    fn node_id_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }
}

/// Builds a `QueryDag` from a SQL statement's CTEs and final SELECT.
/// Cycles must never occur by construction (CTEs may only reference
/// earlier CTEs); if one is detected anyway, this fails with
/// `ParseError`.
pub fn build(sql: &str) -> OptimizerResult<QueryDag> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| OptimizerError::ParseError(e.to_string()))?;
    let query = statements
        .into_iter()
        .find_map(|s| match s {
            Statement::Query(q) => Some(q),
            _ => None,
        })
        .ok_or_else(|| OptimizerError::ParseError("no SELECT statement found".into()))?;

    let mut dag = QueryDag::default();
    let mut seen = std::collections::HashSet::new();

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let name = cte.alias.name.value.clone();
            if !seen.insert(name.clone()) {
                return Err(OptimizerError::ParseError(format!("duplicate CTE name '{name}'")));
            }
            dag.add_node(name, cte.query.to_string());
        }

        // Wire edges: each CTE can only reference CTEs already in the
        // DAG (earlier in `with.cte_tables`), so traversal order alone
        // guarantees acyclicity.
        for cte in &with.cte_tables {
            let from = dag.node_id_by_name(&cte.alias.name.value).unwrap();
            let refs = referenced_table_names(&cte.query);
            for r in refs {
                if let Some(to) = dag.node_id_by_name(&r)
                    && to != from
                {
                    dag.edges.push((from, to));
                    dag.nodes[to].usage_count += 1;
                }
            }
        }
    }

    let final_id = dag.add_node("__final__".to_string(), query.body.to_string());
    for r in referenced_table_names(&query) {
        if let Some(to) = dag.node_id_by_name(&r)
            && to != final_id
        {
            dag.edges.push((final_id, to));
            dag.nodes[to].usage_count += 1;
        }
    }

    detect_cycle(&dag)?;
    Ok(dag)
}

fn detect_cycle(dag: &QueryDag) -> OptimizerResult<()> {
    let n = dag.nodes.len();
    let mut state = vec![0u8; n]; // 0 = unvisited, 1 = in-progress, 2 = done
    fn visit(dag: &QueryDag, node: NodeId, state: &mut [u8]) -> bool {
        match state[node] {
            1 => return true,
            2 => return false,
            _ => {}
        }
        state[node] = 1;
        for next in dag.referenced_by(node) {
            if visit(dag, next, state) {
                return true;
            }
        }
        state[node] = 2;
        false
    }
    for i in 0..n {
        if state[i] == 0 && visit(dag, i, &mut state) {
            return Err(OptimizerError::ParseError("cycle detected in query DAG".into()));
        }
    }
    Ok(())
}

fn referenced_table_names(query: &Query) -> Vec<String> {
    let mut out = Vec::new();
    collect_from_set_expr(&query.body, &mut out);
    out
}

fn collect_from_set_expr(expr: &SetExpr, out: &mut Vec<String>) {
    match expr {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_factor(&twj.relation, out);
                for j in &twj.joins {
                    collect_table_factor(&j.relation, out);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            collect_from_set_expr(left, out);
            collect_from_set_expr(right, out);
        }
        SetExpr::Query(q) => collect_from_set_expr(&q.body, out),
        _ => {}
    }
}

fn collect_table_factor(tf: &TableFactor, out: &mut Vec<String>) {
    if let TableFactor::Table { name, .. } = tf {
        out.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_select_has_one_final_node() {
        let dag = build("SELECT 1").unwrap();
        assert_eq!(dag.nodes.len(), 1);
        assert_eq!(dag.nodes[0].name, "__final__");
    }

    #[test]
    fn cte_chain_produces_edges_in_parse_order() {
        let dag = build("WITH a AS (SELECT 1 AS x), b AS (SELECT x FROM a) SELECT * FROM b").unwrap();
        assert_eq!(dag.nodes.len(), 3);
        let b_id = dag.node_id_by_name("b").unwrap();
        let a_id = dag.node_id_by_name("a").unwrap();
        assert!(dag.referenced_by(b_id).contains(&a_id));
        assert_eq!(dag.nodes[a_id].usage_count, 1);
    }
}
