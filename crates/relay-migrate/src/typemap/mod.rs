//! Type mapping from source column types to target column types.
//!
//! Matching is by name only and case-sensitive. Rules are tried in order and
//! the first match wins, so a name that belongs to several families (e.g.
//! `NUMBER_CHAR`) lands in the earliest one.

use crate::catalog::{ColumnDescriptor, TargetColumn};

/// Generic text type, also the fallback for unknown types.
pub const TEXT: &str = "TEXT";
/// Arbitrary-precision numeric type.
pub const NUMERIC: &str = "NUMERIC";
/// Timestamp type.
pub const TIMESTAMP: &str = "TIMESTAMP";

enum Pattern {
    Contains(&'static str),
    Exact(&'static str),
}

use Pattern::{Contains, Exact};

const RULES: &[(&[Pattern], &str)] = &[
    // Character and large text
    (&[Contains("CHAR"), Contains("CLOB"), Contains("TEXT")], TEXT),
    // Numeric family
    (
        &[
            Contains("NUMBER"),
            Contains("NUMERIC"),
            Contains("DECIMAL"),
            Contains("FLOAT"),
            Contains("DOUBLE"),
            Contains("REAL"),
            Contains("MONEY"),
            Contains("INTEGER"),
            Contains("BIGINT"),
            Contains("SMALLINT"),
            Contains("TINYINT"),
            Exact("INT"),
        ],
        NUMERIC,
    ),
    // Temporal family
    (&[Contains("TIMESTAMP"), Contains("DATE")], TIMESTAMP),
];

/// Map a source type name to a target type name. Never fails.
pub fn map_type(source_type: &str) -> &'static str {
    RULES
        .iter()
        .find(|(patterns, _)| {
            patterns.iter().any(|p| match p {
                Contains(s) => source_type.contains(s),
                Exact(s) => source_type == *s,
            })
        })
        .map(|(_, target)| *target)
        .unwrap_or(TEXT)
}

/// Translate a source column list. Column names are lower-cased for the target.
pub fn map_columns(columns: &[ColumnDescriptor]) -> Vec<TargetColumn> {
    columns
        .iter()
        .map(|c| TargetColumn {
            name: c.name.to_lowercase(),
            target_type: map_type(&c.source_type).to_string(),
        })
        .collect()
}
