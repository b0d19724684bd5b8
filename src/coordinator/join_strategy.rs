//! Join strategy selection

use std::fmt;

use serde::Serialize;

use crate::planner::JoinClause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinStrategy {
    /// Both sides are read in key order and merged on the common prefix
    SortMerge,
    /// Foreign rows are fetched per batch of primary keys
    ForeignLookup,
}

impl JoinStrategy {
    /// Sort-merge needs a shared key prefix that the equations fully fix
    /// on the foreign side
    pub fn for_clause(clause: &JoinClause) -> Self {
        if clause.common_key_prefix > 0 && clause.foreign_key_prefix >= clause.common_key_prefix {
            JoinStrategy::SortMerge
        } else {
            JoinStrategy::ForeignLookup
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::SortMerge => write!(f, "SortMerge"),
            JoinStrategy::ForeignLookup => write!(f, "ForeignLookup"),
        }
    }
}
