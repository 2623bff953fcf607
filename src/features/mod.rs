//! Feature Extractor.
//!
//! `extract` is pure, deterministic, and tolerant of partial failure: any
//! feature that cannot be computed is omitted rather than defaulted to a
//! wrong value. The typed `FeatureVector` below is a field-per-feature
//! struct rather than a generic dictionary, with `get_value` bridging back
//! to the generic
//! lookup the predicate evaluator needs.

pub mod extractor;
pub mod vocabulary;

use serde::{Deserialize, Serialize};

pub use extractor::extract;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStyle {
    Explicit,
    ImplicitComma,
    Mixed,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    None,
    Simple,
    Conditional,
    Nested,
    MultiStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// A single feature value, type-erased for the predicate evaluator and
/// the example scorer. `FeatureVector::get_value` is the only place a
/// `FeatureValue` gets constructed from a typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
}

/// The structural feature vector of one SQL statement.
///
/// Every field is `Option` because extraction tolerates partial failure:
/// a feature that can't be computed is left `None`, never set to a
/// placeholder. The runtime-only fields additionally require an
/// `explain(sql)` capability call and stay `None` when none was supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureVector {
    pub join_style: Option<JoinStyle>,
    pub table_count: Option<i64>,
    pub dimension_table_count: Option<i64>,
    pub is_star_schema: Option<bool>,
    pub fact_table_max_scans: Option<i64>,
    pub tables_with_multiple_scans: Option<i64>,
    pub correlated_subquery_count: Option<i64>,
    pub correlated_with_aggregate: Option<i64>,
    pub scalar_subquery_in_select: Option<i64>,
    pub or_chain_count: Option<i64>,
    pub or_branches_max: Option<i64>,
    pub or_branches_touch_different_indexes: Option<bool>,
    pub cte_count: Option<i64>,
    pub multi_ref_cte_count: Option<i64>,
    pub cte_max_depth: Option<i64>,
    pub conditional_aggregate_count: Option<i64>,
    pub aggregation_type: Option<AggregationType>,
    pub has_having: Option<bool>,
    pub has_window_functions: Option<bool>,
    pub self_join_count: Option<i64>,
    pub union_branch_count: Option<i64>,
    pub has_lateral: Option<bool>,
    pub estimated_complexity: Option<Complexity>,

    // Runtime-only, populated from an `explain` capability call.
    pub has_disk_sort: Option<bool>,
    pub disk_sort_size_mb: Option<f64>,
    pub has_large_seqscan: Option<bool>,
    pub baseline_ms: Option<f64>,
    pub nested_loop_on_dimension_pk: Option<bool>,
    pub parallel_workers_used: Option<i64>,
}

impl FeatureVector {
    /// Generic lookup by vocabulary name, used by the predicate evaluator
    /// and the example scorer. Unknown names return `None`, matching the
    /// "absent feature evaluates false" invariant.
    pub fn get_value(&self, name: &str) -> Option<FeatureValue> {
        macro_rules! b {
            ($f:expr) => {
                $f.map(FeatureValue::Bool)
            };
        }
        macro_rules! i {
            ($f:expr) => {
                $f.map(FeatureValue::Int)
            };
        }
        macro_rules! f {
            ($f:expr) => {
                $f.map(FeatureValue::Float)
            };
        }
        match name {
            "join_style" => self.join_style.map(|j| FeatureValue::Enum(join_style_str(j).into())),
            "table_count" => i!(self.table_count),
            "dimension_table_count" => i!(self.dimension_table_count),
            "is_star_schema" => b!(self.is_star_schema),
            "fact_table_max_scans" => i!(self.fact_table_max_scans),
            "tables_with_multiple_scans" => i!(self.tables_with_multiple_scans),
            "correlated_subquery_count" => i!(self.correlated_subquery_count),
            "correlated_with_aggregate" => i!(self.correlated_with_aggregate),
            "scalar_subquery_in_select" => i!(self.scalar_subquery_in_select),
            "or_chain_count" => i!(self.or_chain_count),
            "or_branches_max" => i!(self.or_branches_max),
            "or_branches_touch_different_indexes" => b!(self.or_branches_touch_different_indexes),
            "cte_count" => i!(self.cte_count),
            "multi_ref_cte_count" => i!(self.multi_ref_cte_count),
            "cte_max_depth" => i!(self.cte_max_depth),
            "conditional_aggregate_count" => i!(self.conditional_aggregate_count),
            "aggregation_type" => {
                self.aggregation_type.map(|a| FeatureValue::Enum(aggregation_type_str(a).into()))
            }
            "has_having" => b!(self.has_having),
            "has_window_functions" => b!(self.has_window_functions),
            "self_join_count" => i!(self.self_join_count),
            "union_branch_count" => i!(self.union_branch_count),
            "has_lateral" => b!(self.has_lateral),
            "estimated_complexity" => {
                self.estimated_complexity.map(|c| FeatureValue::Enum(complexity_str(c).into()))
            }
            "has_disk_sort" => b!(self.has_disk_sort),
            "disk_sort_size_mb" => f!(self.disk_sort_size_mb),
            "has_large_seqscan" => b!(self.has_large_seqscan),
            "baseline_ms" => f!(self.baseline_ms),
            "nested_loop_on_dimension_pk" => b!(self.nested_loop_on_dimension_pk),
            "parallel_workers_used" => i!(self.parallel_workers_used),
            _ => None,
        }
    }
}

pub fn join_style_str(j: JoinStyle) -> &'static str {
    match j {
        JoinStyle::Explicit => "explicit",
        JoinStyle::ImplicitComma => "implicit_comma",
        JoinStyle::Mixed => "mixed",
        JoinStyle::None => "none",
    }
}

pub fn aggregation_type_str(a: AggregationType) -> &'static str {
    match a {
        AggregationType::None => "none",
        AggregationType::Simple => "simple",
        AggregationType::Conditional => "conditional",
        AggregationType::Nested => "nested",
        AggregationType::MultiStage => "multi_stage",
    }
}

pub fn complexity_str(c: Complexity) -> &'static str {
    match c {
        Complexity::Simple => "simple",
        Complexity::Moderate => "moderate",
        Complexity::Complex => "complex",
    }
}
