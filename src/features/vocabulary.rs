//! The closed feature vocabulary.
//!
//! `FeatureType` exists so `rules::validate` can statically check a
//! `DetectionRule` at load time: unknown feature names and wrong
//! operator/type pairings make the profile load fail.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    Bool,
    Int,
    Float,
    Enum(&'static [&'static str]),
}

pub const JOIN_STYLE_VALUES: &[&str] = &["explicit", "implicit_comma", "mixed", "none"];
pub const AGGREGATION_TYPE_VALUES: &[&str] =
    &["none", "simple", "conditional", "nested", "multi_stage"];
pub const COMPLEXITY_VALUES: &[&str] = &["simple", "moderate", "complex"];

/// `(name, type)` pairs for every known feature, static and runtime alike.
pub const VOCABULARY: &[(&str, FeatureType)] = &[
    ("join_style", FeatureType::Enum(JOIN_STYLE_VALUES)),
    ("table_count", FeatureType::Int),
    ("dimension_table_count", FeatureType::Int),
    ("is_star_schema", FeatureType::Bool),
    ("fact_table_max_scans", FeatureType::Int),
    ("tables_with_multiple_scans", FeatureType::Int),
    ("correlated_subquery_count", FeatureType::Int),
    ("correlated_with_aggregate", FeatureType::Int),
    ("scalar_subquery_in_select", FeatureType::Int),
    ("or_chain_count", FeatureType::Int),
    ("or_branches_max", FeatureType::Int),
    ("or_branches_touch_different_indexes", FeatureType::Bool),
    ("cte_count", FeatureType::Int),
    ("multi_ref_cte_count", FeatureType::Int),
    ("cte_max_depth", FeatureType::Int),
    ("conditional_aggregate_count", FeatureType::Int),
    ("aggregation_type", FeatureType::Enum(AGGREGATION_TYPE_VALUES)),
    ("has_having", FeatureType::Bool),
    ("has_window_functions", FeatureType::Bool),
    ("self_join_count", FeatureType::Int),
    ("union_branch_count", FeatureType::Int),
    ("has_lateral", FeatureType::Bool),
    ("estimated_complexity", FeatureType::Enum(COMPLEXITY_VALUES)),
    // Runtime-only features (require an `explain` capability call).
    ("has_disk_sort", FeatureType::Bool),
    ("disk_sort_size_mb", FeatureType::Float),
    ("has_large_seqscan", FeatureType::Bool),
    ("baseline_ms", FeatureType::Float),
    ("nested_loop_on_dimension_pk", FeatureType::Bool),
    ("parallel_workers_used", FeatureType::Int),
];

pub fn lookup(name: &str) -> Option<FeatureType> {
    VOCABULARY.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}
