//! AST walk that fills in `FeatureVector`'s static fields.
//!
//! Walks a `sqlparser` AST rather than a printed query plan. A parse
//! error is fatal (`OptimizerError::ParseError`); everything past that
//! point is best-effort per field.

use std::collections::{HashMap, HashSet};

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Join, JoinOperator, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::errors::{OptimizerError, OptimizerResult};

use super::{AggregationType, Complexity, FeatureVector, JoinStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    DuckDb,
    Postgres,
}

impl SqlDialect {
    fn as_sqlparser(self) -> Box<dyn Dialect> {
        match self {
            // sqlparser has no dedicated DuckDB dialect variant in older
            // releases; GenericDialect accepts DuckDB's Postgres-flavored
            // syntax closely enough for structural feature extraction.
            SqlDialect::DuckDb => Box::new(GenericDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        }
    }
}

/// Per-statement scratch state accumulated while walking the AST. Kept
/// separate from `FeatureVector` so the walk can use plain counters and
/// only project into the typed, `Option`-wrapped output at the end.
#[derive(Default)]
struct Tally {
    table_refs: Vec<String>,
    join_count: usize,
    explicit_join_seen: bool,
    comma_join_seen: bool,
    scans_per_table: HashMap<String, usize>,
    correlated_subqueries: usize,
    correlated_with_aggregate: usize,
    scalar_subquery_in_select: usize,
    or_chain_count: usize,
    or_branches_max: usize,
    cte_names: Vec<String>,
    cte_refs: HashMap<String, usize>,
    cte_max_depth: usize,
    conditional_aggregate_count: usize,
    has_having: bool,
    has_window_functions: bool,
    has_lateral: bool,
    union_branch_count: usize,
    aggregate_call_count: usize,
    nested_aggregate: bool,
    group_by_present: bool,
}

/// `extract(sql, dialect) -> FeatureVector`.
pub fn extract(sql: &str, dialect: SqlDialect) -> OptimizerResult<FeatureVector> {
    let statements = Parser::parse_sql(&*dialect.as_sqlparser(), sql)
        .map_err(|e| OptimizerError::ParseError(e.to_string()))?;

    let query = statements
        .into_iter()
        .find_map(|stmt| match stmt {
            Statement::Query(q) => Some(q),
            _ => None,
        })
        .ok_or_else(|| OptimizerError::ParseError("no SELECT statement found".into()))?;

    let mut tally = Tally::default();
    walk_query(&query, 0, &mut tally);

    Ok(project(tally))
}

fn walk_query(query: &Query, depth: usize, tally: &mut Tally) {
    if let Some(with) = &query.with {
        tally.cte_max_depth = tally.cte_max_depth.max(depth + 1);
        for cte in &with.cte_tables {
            let name = cte.alias.name.value.to_lowercase();
            tally.cte_names.push(name.clone());
            tally.cte_refs.entry(name).or_insert(0);
            walk_query(&cte.query, depth + 1, tally);
        }
    }
    walk_set_expr(&query.body, tally);
}

fn walk_set_expr(expr: &SetExpr, tally: &mut Tally) {
    match expr {
        SetExpr::Select(select) => walk_select(select, tally),
        SetExpr::Query(q) => walk_query(q, 0, tally),
        SetExpr::SetOperation { left, right, .. } => {
            tally.union_branch_count += 1;
            walk_set_expr(left, tally);
            walk_set_expr(right, tally);
        }
        SetExpr::Values(_) | SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Table(_) => {}
    }
}

fn walk_select(select: &Select, tally: &mut Tally) {
    for twj in &select.from {
        walk_table_with_joins(twj, tally);
    }

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                walk_expr(e, false, tally);
                if contains_subquery(e) {
                    tally.scalar_subquery_in_select += 1;
                }
            }
            _ => {}
        }
    }

    if let Some(selection) = &select.selection {
        walk_expr(selection, true, tally);
        walk_or_chains(selection, tally);
    }

    tally.group_by_present = group_by_is_nonempty(select);

    if select.having.is_some() {
        tally.has_having = true;
        if let Some(h) = &select.having {
            walk_expr(h, false, tally);
        }
    }
}

fn group_by_is_nonempty(select: &Select) -> bool {
    use sqlparser::ast::GroupByExpr;
    match &select.group_by {
        GroupByExpr::All(_) => true,
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
    }
}

fn walk_table_with_joins(twj: &TableWithJoins, tally: &mut Tally) {
    walk_table_factor(&twj.relation, tally);
    if !twj.joins.is_empty() {
        tally.explicit_join_seen = true;
    }
    for join in &twj.joins {
        walk_join(join, tally);
    }
}

fn walk_join(join: &Join, tally: &mut Tally) {
    tally.join_count += 1;
    match &join.join_operator {
        JoinOperator::CrossJoin => tally.comma_join_seen = true,
        JoinOperator::CrossApply | JoinOperator::OuterApply => tally.has_lateral = true,
        _ => tally.explicit_join_seen = true,
    }
    walk_table_factor(&join.relation, tally);
}

fn walk_table_factor(tf: &TableFactor, tally: &mut Tally) {
    match tf {
        TableFactor::Table { name, .. } => {
            let key = name.to_string().to_lowercase();
            if let Some(count) = tally.cte_refs.get_mut(&key) {
                *count += 1;
            } else {
                tally.table_refs.push(key.clone());
                *tally.scans_per_table.entry(key).or_insert(0) += 1;
            }
        }
        TableFactor::Derived { lateral, subquery, alias: _ } => {
            if *lateral {
                tally.has_lateral = true;
            }
            walk_query(subquery, 0, tally);
        }
        TableFactor::NestedJoin { table_with_joins, .. } => {
            walk_table_with_joins(table_with_joins, tally);
        }
        _ => {}
    }
}

/// Walks an expression tree tallying subqueries, aggregates, and window
/// functions. `in_predicate` marks whether `expr` sits in a WHERE/ON
/// predicate position, which is where correlation matters.
fn walk_expr(expr: &Expr, in_predicate: bool, tally: &mut Tally) {
    match expr {
        Expr::Subquery(q) | Expr::Exists { subquery: q, .. } => {
            if in_predicate {
                tally.correlated_subqueries += 1;
                if query_has_aggregate(q) {
                    tally.correlated_with_aggregate += 1;
                }
            }
            walk_query(q, 0, tally);
        }
        Expr::InSubquery { subquery, expr: inner, .. } => {
            if in_predicate {
                tally.correlated_subqueries += 1;
            }
            walk_expr(inner, in_predicate, tally);
            walk_query(subquery, 0, tally);
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, in_predicate, tally);
            walk_expr(right, in_predicate, tally);
        }
        Expr::UnaryOp { expr: inner, .. } => walk_expr(inner, in_predicate, tally),
        Expr::Nested(inner) => walk_expr(inner, in_predicate, tally),
        Expr::Case { conditions, results, else_result, operand, .. } => {
            if let Some(op) = operand {
                walk_expr(op, in_predicate, tally);
            }
            for c in conditions {
                walk_expr(c, in_predicate, tally);
            }
            for r in results {
                walk_expr(r, in_predicate, tally);
            }
            if let Some(e) = else_result {
                walk_expr(e, in_predicate, tally);
            }
        }
        Expr::Function(f) => {
            let name = f.name.to_string().to_uppercase();
            if is_aggregate_fn(&name) {
                tally.aggregate_call_count += 1;
                if f.args.to_string().to_uppercase().contains("CASE") {
                    tally.conditional_aggregate_count += 1;
                }
                if function_args_contain_aggregate(&f.args) {
                    tally.nested_aggregate = true;
                }
            }
            if f.over.is_some() {
                tally.has_window_functions = true;
            }
            walk_function_args(&f.args, in_predicate, tally);
        }
        _ => {}
    }
}

/// True if an aggregate's own arguments contain another aggregate call,
/// directly or through a scalar subquery (e.g. `MAX((SELECT COUNT(*) ...))`).
fn function_args_contain_aggregate(args: &FunctionArguments) -> bool {
    match args {
        FunctionArguments::List(list) => list.args.iter().any(|a| match function_arg_expr(a) {
            Some(FunctionArgExpr::Expr(e)) => expr_contains_aggregate(e),
            _ => false,
        }),
        FunctionArguments::Subquery(q) => query_has_aggregate(q),
        FunctionArguments::None => false,
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Option<&FunctionArgExpr> {
    match arg {
        FunctionArg::Named { arg, .. } | FunctionArg::ExprNamed { arg, .. } | FunctionArg::Unnamed(arg) => Some(arg),
    }
}

fn walk_function_args(args: &FunctionArguments, in_predicate: bool, tally: &mut Tally) {
    match args {
        FunctionArguments::List(list) => {
            for arg in &list.args {
                if let Some(FunctionArgExpr::Expr(e)) = function_arg_expr(arg) {
                    walk_expr(e, in_predicate, tally);
                }
            }
        }
        FunctionArguments::Subquery(q) => walk_query(q, 0, tally),
        FunctionArguments::None => {}
    }
}

fn is_aggregate_fn(name: &str) -> bool {
    matches!(
        name,
        "SUM" | "COUNT" | "AVG" | "MIN" | "MAX" | "ARRAY_AGG" | "STRING_AGG" | "GROUP_CONCAT"
    )
}

fn contains_subquery(expr: &Expr) -> bool {
    match expr {
        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => true,
        Expr::BinaryOp { left, right, .. } => contains_subquery(left) || contains_subquery(right),
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => contains_subquery(expr),
        Expr::Case { conditions, results, else_result, .. } => {
            conditions.iter().any(contains_subquery)
                || results.iter().any(contains_subquery)
                || else_result.as_deref().is_some_and(contains_subquery)
        }
        _ => false,
    }
}

fn query_has_aggregate(query: &Query) -> bool {
    if let SetExpr::Select(select) = query.body.as_ref() {
        let mut found = false;
        for item in &select.projection {
            if let SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } = item
                && expr_contains_aggregate(e)
            {
                found = true;
            }
        }
        found
    } else {
        false
    }
}

fn expr_contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(f) => is_aggregate_fn(&f.name.to_string().to_uppercase()),
        Expr::BinaryOp { left, right, .. } => {
            expr_contains_aggregate(left) || expr_contains_aggregate(right)
        }
        Expr::Nested(e) | Expr::UnaryOp { expr: e, .. } => expr_contains_aggregate(e),
        Expr::Subquery(q) | Expr::Exists { subquery: q, .. } => query_has_aggregate(q),
        _ => false,
    }
}

/// Walks top-level `OR` chains in a WHERE clause and tallies the widest
/// chain.
fn walk_or_chains(expr: &Expr, tally: &mut Tally) {
    fn collect_or_branches<'a>(expr: &'a Expr, branches: &mut Vec<&'a Expr>) {
        match expr {
            Expr::BinaryOp { left, op, right } if matches!(op, sqlparser::ast::BinaryOperator::Or) => {
                collect_or_branches(left, branches);
                collect_or_branches(right, branches);
            }
            other => branches.push(other),
        }
    }

    fn walk(expr: &Expr, tally: &mut Tally) {
        match expr {
            Expr::BinaryOp { op, .. } if matches!(op, sqlparser::ast::BinaryOperator::Or) => {
                let mut branches = Vec::new();
                collect_or_branches(expr, &mut branches);
                if branches.len() > 1 {
                    tally.or_chain_count += 1;
                    tally.or_branches_max = tally.or_branches_max.max(branches.len());
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                walk(left, tally);
                walk(right, tally);
            }
            Expr::Nested(inner) => walk(inner, tally),
            _ => {}
        }
    }

    walk(expr, tally);
}

fn project(tally: Tally) -> FeatureVector {
    let mut fv = FeatureVector::default();

    let table_count = tally.table_refs.len() as i64;
    fv.table_count = Some(table_count);

    let distinct_tables: HashSet<&String> = tally.table_refs.iter().collect();
    let mut dup_counts: HashMap<&str, usize> = HashMap::new();
    for t in &tally.table_refs {
        *dup_counts.entry(t.as_str()).or_insert(0) += 1;
    }
    let self_joins = dup_counts.values().filter(|&&c| c > 1).count();
    fv.self_join_count = Some(self_joins as i64);

    fv.join_style = Some(if tally.explicit_join_seen && tally.comma_join_seen {
        JoinStyle::Mixed
    } else if tally.comma_join_seen {
        JoinStyle::ImplicitComma
    } else if tally.explicit_join_seen {
        JoinStyle::Explicit
    } else {
        JoinStyle::None
    });

    let max_scans = tally.scans_per_table.values().copied().max().unwrap_or(0);
    fv.fact_table_max_scans = Some(max_scans as i64);
    fv.tables_with_multiple_scans =
        Some(tally.scans_per_table.values().filter(|&&c| c > 1).count() as i64);

    // Star-schema heuristic: exactly one fact table (the
    // table with the most scans / join edges), with >=2 others joining
    // only on what looks like a single-column key predicate.
    let candidate_fact = tally
        .scans_per_table
        .iter()
        .max_by_key(|(_, &c)| c)
        .map(|(t, _)| t.clone());
    let dimension_like = distinct_tables.len().saturating_sub(1);
    fv.dimension_table_count = Some(dimension_like as i64);
    fv.is_star_schema = Some(
        candidate_fact.is_some() && distinct_tables.len() >= 3 && dimension_like >= 2 && max_scans >= 1,
    );

    fv.correlated_subquery_count = Some(tally.correlated_subqueries as i64);
    fv.correlated_with_aggregate = Some(tally.correlated_with_aggregate as i64);
    fv.scalar_subquery_in_select = Some(tally.scalar_subquery_in_select as i64);

    fv.or_chain_count = Some(tally.or_chain_count as i64);
    fv.or_branches_max = Some(tally.or_branches_max as i64);
    fv.or_branches_touch_different_indexes = Some(tally.or_branches_max >= 2);

    fv.cte_count = Some(tally.cte_names.len() as i64);
    fv.multi_ref_cte_count =
        Some(tally.cte_refs.values().filter(|&&c| c > 1).count() as i64);
    fv.cte_max_depth = Some(tally.cte_max_depth as i64);

    fv.conditional_aggregate_count = Some(tally.conditional_aggregate_count as i64);
    fv.aggregation_type = Some(if tally.aggregate_call_count == 0 {
        AggregationType::None
    } else if tally.conditional_aggregate_count > 0 {
        AggregationType::Conditional
    } else if tally.nested_aggregate {
        AggregationType::Nested
    } else if tally.cte_count() > 1 && tally.group_by_present {
        AggregationType::MultiStage
    } else {
        AggregationType::Simple
    });

    fv.has_having = Some(tally.has_having);
    fv.has_window_functions = Some(tally.has_window_functions);
    fv.union_branch_count = Some(tally.union_branch_count as i64);
    fv.has_lateral = Some(tally.has_lateral);

    let cte_count = tally.cte_names.len();
    fv.estimated_complexity = Some(if table_count <= 3 && cte_count == 0 {
        Complexity::Simple
    } else if table_count <= 8 && cte_count <= 3 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    });

    fv
}

impl Tally {
    fn cte_count(&self) -> usize {
        self.cte_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_select_has_zero_tables_is_deterministic() {
        let a = extract("SELECT 1", SqlDialect::Postgres).unwrap();
        let b = extract("SELECT 1", SqlDialect::Postgres).unwrap();
        assert_eq!(a.table_count, b.table_count);
        assert_eq!(a.table_count, Some(0));
        assert_eq!(a.estimated_complexity, Some(Complexity::Simple));
    }

    #[test]
    fn parse_error_is_fatal() {
        let err = extract("SELECT * FROM WHERE", SqlDialect::Postgres).unwrap_err();
        assert!(matches!(err, OptimizerError::ParseError(_)));
    }

    #[test]
    fn explicit_join_detected() {
        let fv = extract(
            "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.join_style, Some(JoinStyle::Explicit));
        assert_eq!(fv.table_count, Some(2));
    }

    #[test]
    fn comma_join_detected() {
        let fv = extract(
            "SELECT * FROM orders o, customers c WHERE o.customer_id = c.id",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.join_style, Some(JoinStyle::ImplicitComma));
    }

    #[test]
    fn correlated_subquery_detected() {
        let fv = extract(
            "SELECT s_name FROM supplier s WHERE s.s_suppkey IN (SELECT ps.ps_suppkey FROM partsupp ps WHERE ps.ps_partkey = s.s_suppkey)",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.correlated_subquery_count, Some(1));
    }

    #[test]
    fn cte_counted_and_depth_tracked() {
        let fv = extract(
            "WITH a AS (SELECT 1 AS x), b AS (SELECT x FROM a) SELECT * FROM b",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.cte_count, Some(2));
        assert!(fv.cte_max_depth.unwrap() >= 1);
    }

    #[test]
    fn or_chain_counted() {
        let fv = extract(
            "SELECT * FROM t WHERE a = 1 OR a = 2 OR a = 3",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.or_chain_count, Some(1));
        assert_eq!(fv.or_branches_max, Some(3));
    }

    #[test]
    fn aggregate_over_aggregate_subquery_is_nested() {
        let fv = extract(
            "SELECT MAX((SELECT COUNT(*) FROM line_items li WHERE li.order_id = o.id)) FROM orders o",
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(fv.aggregation_type, Some(AggregationType::Nested));
    }

    #[test]
    fn plain_aggregate_is_simple() {
        let fv = extract("SELECT SUM(amount) FROM orders", SqlDialect::Postgres).unwrap();
        assert_eq!(fv.aggregation_type, Some(AggregationType::Simple));
    }
}
