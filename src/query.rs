// ABOUTME: Row-selection and row-deletion queries over one table with a half-open range filter
// ABOUTME: Select, delete and count share one predicate builder so they always target the same rows

use std::fmt;

use serde::Serialize;

use crate::error::{Result, TransferError};
use crate::utils::{quote_ident, quote_literal, validate_identifier};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("schema", &self.schema)?;
        validate_identifier("table", &self.name)
    }

    /// `"schema"."table"`, ready to splice into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    /// `column >= value`
    Gte,
    /// `column < value`
    Lt,
}

impl Comparison {
    pub fn operator(self) -> &'static str {
        match self {
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
        }
    }
}

/// One side of a half-open window.
///
/// The value is kept as the text the caller supplied and rendered as an
/// untyped literal, so Postgres compares it using the column's own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bound {
    pub column: String,
    pub comparison: Comparison,
    pub value: String,
}

impl Bound {
    fn predicate(&self) -> String {
        format!(
            "{} {} {}",
            quote_ident(&self.column),
            self.comparison.operator(),
            quote_literal(&self.value)
        )
    }
}

/// Optional `[gte, lt)` window over one or two columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RangeFilter {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl RangeFilter {
    /// No filtering: every row of the table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from the raw column/value pairs of the command line.
    ///
    /// Each pair must be fully set or fully unset; an empty string counts as
    /// unset. A half-specified pair is a configuration error.
    pub fn from_pairs(
        gte_column: Option<String>,
        gte_value: Option<String>,
        lt_column: Option<String>,
        lt_value: Option<String>,
    ) -> Result<Self> {
        let lower = pair_to_bound("gte", gte_column, gte_value, Comparison::Gte)?;
        let upper = pair_to_bound("lt", lt_column, lt_value, Comparison::Lt)?;
        Ok(Self { lower, upper })
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    pub fn bounds(&self) -> impl Iterator<Item = &Bound> {
        self.lower.iter().chain(self.upper.iter())
    }

    /// `WHERE ...` clause (with leading space), or an empty string.
    pub fn where_clause(&self) -> String {
        let predicates: Vec<String> = self.bounds().map(Bound::predicate).collect();
        if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        }
    }
}

impl fmt::Display for RangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(all rows)");
        }
        let parts: Vec<String> = self
            .bounds()
            .map(|b| format!("{} {} {}", b.column, b.comparison.operator(), b.value))
            .collect();
        write!(f, "{}", parts.join(" AND "))
    }
}

fn pair_to_bound(
    label: &str,
    column: Option<String>,
    value: Option<String>,
    comparison: Comparison,
) -> Result<Option<Bound>> {
    let column = column.filter(|c| !c.is_empty());
    let value = value.filter(|v| !v.is_empty());

    match (column, value) {
        (None, None) => Ok(None),
        (Some(column), Some(value)) => {
            validate_identifier("column", &column)?;
            Ok(Some(Bound {
                column,
                comparison,
                value,
            }))
        }
        _ => Err(TransferError::config(format!(
            "{label}_column and {label}_value must be both set or both unset"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Delete,
    Count,
}

/// A statement over one table restricted by a [`RangeFilter`].
///
/// Kept structured (rather than as bare SQL) so every consumer sees the same
/// table and predicate; [`Query::sql`] renders it for Postgres.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryKind,
    pub table: TableRef,
    pub filter: RangeFilter,
}

impl Query {
    pub fn sql(&self) -> String {
        let target = self.table.quoted();
        let predicate = self.filter.where_clause();
        match self.kind {
            QueryKind::Select => format!("SELECT * FROM {}{}", target, predicate),
            QueryKind::Delete => format!("DELETE FROM {}{}", target, predicate),
            QueryKind::Count => format!("SELECT COUNT(*) FROM {}{}", target, predicate),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// `SELECT *` over `schema.table`, restricted by `filter`.
///
/// No ORDER BY is added; rows come back in whatever order the source yields.
/// Table existence is not checked here; an unknown table surfaces when the
/// query executes.
pub fn build_select(table: &str, schema: &str, filter: &RangeFilter) -> Result<Query> {
    build(QueryKind::Select, table, schema, filter)
}

/// `DELETE` of exactly the rows [`build_select`] would return for the same arguments.
pub fn build_delete(table: &str, schema: &str, filter: &RangeFilter) -> Result<Query> {
    build(QueryKind::Delete, table, schema, filter)
}

pub fn build_count(table: &str, schema: &str, filter: &RangeFilter) -> Result<Query> {
    build(QueryKind::Count, table, schema, filter)
}

fn build(kind: QueryKind, table: &str, schema: &str, filter: &RangeFilter) -> Result<Query> {
    let table = TableRef::new(schema, table);
    table.validate()?;
    for bound in filter.bounds() {
        validate_identifier("column", &bound.column)?;
    }
    Ok(Query {
        kind,
        table,
        filter: filter.clone(),
    })
}
