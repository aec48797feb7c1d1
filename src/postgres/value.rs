// ABOUTME: Raw wire-format pass-through of Postgres values via Cell
// ABOUTME: Also renders source column types as SQL type names for target DDL

use std::error::Error;

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::Row;

use crate::batch::{Cell, Column};
use crate::utils::quote_ident;

impl<'a> FromSql<'a> for Cell {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Cell::from_bytes(raw))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Cell::null())
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl ToSql for Cell {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.as_bytes() {
            Some(raw) => {
                out.extend_from_slice(raw);
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// SQL spelling of a column type, usable in `CREATE TABLE`.
///
/// Built-in types keep their catalog name (`int4`, `timestamptz`), arrays
/// get a `[]` suffix, and anything outside `pg_catalog` is schema-qualified.
pub fn sql_type_name(ty: &Type) -> String {
    match ty.kind() {
        Kind::Array(inner) => format!("{}[]", sql_type_name(inner)),
        // Unquoted, `char` means character(1)
        _ if *ty == Type::CHAR => quote_ident(ty.name()),
        _ if ty.schema() == "pg_catalog" => ty.name().to_string(),
        _ => format!("{}.{}", quote_ident(ty.schema()), quote_ident(ty.name())),
    }
}

/// Column layout of a fetched row, tagged with the source type OIDs.
pub fn columns_of(row: &Row) -> Vec<Column> {
    row.columns()
        .iter()
        .map(|c| {
            let ty = c.type_();
            Column::new(c.name(), sql_type_name(ty)).with_type_oid(ty.oid())
        })
        .collect()
}

pub fn row_to_cells(row: &Row) -> Result<Vec<Cell>, tokio_postgres::Error> {
    (0..row.len())
        .map(|idx| row.try_get::<_, Cell>(idx))
        .collect()
}
