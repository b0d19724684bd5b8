//! Explain output
//!
//! Deterministic summary of a prepared query and of what the coordinator
//! decided for it. Serializes to JSON and renders as text.

use std::fmt;

use serde::Serialize;

use super::errors::PrepareError;
use super::query::{JoinKind, Query};
use crate::parser::TotalsMode;
use crate::schema::KeyRange;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinExplain {
    pub table: String,
    pub kind: JoinKind,
    pub equations: Vec<String>,
    pub predicate: Option<String>,
    pub foreign_key_prefix: usize,
    pub common_key_prefix: usize,
    /// Execution strategy, once coordinated
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupExplain {
    pub keys: Vec<String>,
    pub aggregates: Vec<String>,
    pub common_prefix_with_primary_key: usize,
    pub disjoint: bool,
    pub totals: TotalsMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryExplain {
    pub accepted: bool,
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub predicate: Option<String>,
    pub joins: Vec<JoinExplain>,
    pub group: Option<GroupExplain>,
    pub having: Option<String>,
    pub order: Vec<String>,
    pub offset: u64,
    pub limit: Option<u64>,
    pub ordered_scan: bool,
    /// Key ranges left after pruning
    pub ranges: Vec<KeyRange>,
    pub fingerprint: Option<String>,
    pub rejection_code: Option<String>,
    pub rejection_reason: Option<String>,
}

impl QueryExplain {
    pub fn from_query(query: &Query) -> Self {
        let joins = query
            .joins
            .iter()
            .map(|join| JoinExplain {
                table: join.foreign_path.clone(),
                kind: join.kind,
                equations: join
                    .equations
                    .iter()
                    .map(|(lhs, rhs)| format!("{} = {}", lhs, rhs))
                    .collect(),
                predicate: join.predicate.as_ref().map(ToString::to_string),
                foreign_key_prefix: join.foreign_key_prefix,
                common_key_prefix: join.common_key_prefix,
                strategy: None,
            })
            .collect();

        let group = query.group.as_ref().map(|group| GroupExplain {
            keys: group
                .group_items
                .iter()
                .map(|item| format!("{} as {}", item.expr, item.name))
                .collect(),
            aggregates: group.aggregate_items.iter().map(|item| item.name.clone()).collect(),
            common_prefix_with_primary_key: group.common_prefix_with_primary_key,
            disjoint: group.use_disjoint_group_by,
            totals: group.totals_mode,
        });

        let order = query
            .order
            .iter()
            .flat_map(|order| order.items.iter())
            .map(|item| format!("{}{}", item.expr, if item.descending { " desc" } else { "" }))
            .collect();

        Self {
            accepted: true,
            table: Some(query.table_path.clone()),
            columns: query.output_names(),
            predicate: query.where_clause.as_ref().map(ToString::to_string),
            joins,
            group,
            having: query.having.as_ref().map(ToString::to_string),
            order,
            offset: query.offset,
            limit: query.limit,
            ordered_scan: query.ordered_scan,
            ranges: Vec::new(),
            fingerprint: None,
            rejection_code: None,
            rejection_reason: None,
        }
    }

    pub fn from_error(err: &PrepareError) -> Self {
        Self {
            accepted: false,
            table: None,
            columns: Vec::new(),
            predicate: None,
            joins: Vec::new(),
            group: None,
            having: None,
            order: Vec::new(),
            offset: 0,
            limit: None,
            ordered_scan: false,
            ranges: Vec::new(),
            fingerprint: None,
            rejection_code: Some(err.code().code().to_string()),
            rejection_reason: Some(err.message().to_string()),
        }
    }

    pub fn with_ranges(mut self, ranges: Vec<KeyRange>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Attaches one strategy name per join clause, in clause order
    pub fn with_join_strategies(mut self, strategies: impl IntoIterator<Item = String>) -> Self {
        for (join, strategy) in self.joins.iter_mut().zip(strategies) {
            join.strategy = Some(strategy);
        }
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

impl fmt::Display for QueryExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN QUERY ===")?;

        if !self.accepted {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
            return Ok(());
        }

        writeln!(f, "Status: ACCEPTED")?;
        if let Some(table) = &self.table {
            writeln!(f, "Table: {}", table)?;
        }
        writeln!(f, "Columns: {}", self.columns.join(", "))?;
        if let Some(predicate) = &self.predicate {
            writeln!(f, "Where: {}", predicate)?;
        }
        for join in &self.joins {
            writeln!(
                f,
                "Join: {:?} {} (foreign prefix {}, common prefix {}{})",
                join.kind,
                join.table,
                join.foreign_key_prefix,
                join.common_key_prefix,
                join.strategy
                    .as_ref()
                    .map(|s| format!(", {}", s))
                    .unwrap_or_default()
            )?;
            for equation in &join.equations {
                writeln!(f, "  - {}", equation)?;
            }
            if let Some(predicate) = &join.predicate {
                writeln!(f, "  on {}", predicate)?;
            }
        }
        if let Some(group) = &self.group {
            writeln!(f, "Group: {}", group.keys.join(", "))?;
            if !group.aggregates.is_empty() {
                writeln!(f, "Aggregates: {}", group.aggregates.join(", "))?;
            }
            writeln!(
                f,
                "Disjoint: {} (common prefix {})",
                group.disjoint, group.common_prefix_with_primary_key
            )?;
            if group.totals != TotalsMode::None {
                writeln!(f, "Totals: {:?}", group.totals)?;
            }
        }
        if let Some(having) = &self.having {
            writeln!(f, "Having: {}", having)?;
        }
        if !self.order.is_empty() {
            writeln!(f, "Order: {}", self.order.join(", "))?;
        }
        if self.offset > 0 {
            writeln!(f, "Offset: {}", self.offset)?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "Limit: {}", limit)?;
        }
        if self.ordered_scan {
            writeln!(f, "Ordered scan")?;
        }
        if !self.ranges.is_empty() {
            writeln!(f, "Ranges:")?;
            for range in &self.ranges {
                writeln!(f, "  {}", range)?;
            }
        }
        if let Some(fingerprint) = &self.fingerprint {
            writeln!(f, "Fingerprint: {}", fingerprint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::prepare_job_query;
    use crate::config::QueryOptions;
    use crate::functions::FunctionRegistry;
    use crate::schema::{ColumnSchema, TableSchema};
    use crate::value::ValueType;
    use std::sync::Arc;

    fn query() -> Query {
        let schema = TableSchema::new(vec![
            ColumnSchema::new("k", ValueType::Int64).sorted(),
            ColumnSchema::new("v", ValueType::String),
        ])
        .unwrap();
        prepare_job_query(
            "k, v where k > 3",
            Arc::new(schema),
            &FunctionRegistry::builtin(),
            &QueryOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_explain_accepted_query() {
        let explain = QueryExplain::from_query(&query())
            .with_ranges(vec![KeyRange::universal()])
            .with_fingerprint("abc");
        assert!(explain.accepted);
        assert_eq!(explain.columns, vec!["k".to_string(), "v".to_string()]);
        assert_eq!(explain.predicate.as_deref(), Some("k > 3"));

        let output = explain.to_string();
        assert!(output.contains("ACCEPTED"));
        assert!(output.contains("Where: k > 3"));
        assert!(output.contains("[<Min> .. <Max>)"));

        let json = serde_json::to_value(&explain).unwrap();
        assert_eq!(json["fingerprint"], "abc");
    }

    #[test]
    fn test_explain_rejected_query() {
        let err = PrepareError::limit_required("ORDER BY");
        let explain = QueryExplain::from_error(&err);
        assert!(!explain.accepted);
        let output = explain.to_string();
        assert!(output.contains("REJECTED"));
        assert!(output.contains("QL_LIMIT_REQUIRED"));
    }

    #[test]
    fn test_explain_deterministic() {
        let q = query();
        assert_eq!(
            QueryExplain::from_query(&q).to_string(),
            QueryExplain::from_query(&q).to_string()
        );
    }
}
