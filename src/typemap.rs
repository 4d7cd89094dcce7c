//! MySQL-source column type mapping, against the `mysql`/`mysql_common`
//! `ColumnType` enum.

use mysql::consts::ColumnType;

use crate::error::{Result, SyncError};

/// Destination type family a MySQL column is rendered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Timestamp,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
}

impl TypeFamily {
    /// Whether values of this family are emitted unquoted: smallint,
    /// integer, bigint, oid, real, double precision, and numeric are.
    pub fn is_unquoted(self) -> bool {
        !matches!(self, TypeFamily::Text)
    }
}

/// Map a MySQL column type to its destination family, or fail the task if
/// there's no mapping.
pub fn map_column_type(col_type: ColumnType) -> Result<TypeFamily> {
    use ColumnType::*;
    match col_type {
        MYSQL_TYPE_VARCHAR | MYSQL_TYPE_VAR_STRING | MYSQL_TYPE_STRING | MYSQL_TYPE_BIT => {
            Ok(TypeFamily::Text)
        }
        MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_DATE
        | MYSQL_TYPE_TIME
        | MYSQL_TYPE_DATETIME
        | MYSQL_TYPE_YEAR
        | MYSQL_TYPE_NEWDATE => Ok(TypeFamily::Timestamp),
        MYSQL_TYPE_SHORT => Ok(TypeFamily::Int2),
        MYSQL_TYPE_TINY | MYSQL_TYPE_LONG => Ok(TypeFamily::Int4),
        MYSQL_TYPE_LONGLONG => Ok(TypeFamily::Int8),
        MYSQL_TYPE_FLOAT => Ok(TypeFamily::Float4),
        MYSQL_TYPE_DOUBLE => Ok(TypeFamily::Float8),
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Ok(TypeFamily::Numeric),
        other => Err(SyncError::UnsupportedType(format!("{other:?}"))),
    }
}

/// Render one column's raw text value for the destination `COPY ... WITH
/// CSV` stream, quoting per family.
pub fn quote_value(raw: &str, family: TypeFamily) -> String {
    if family.is_unquoted() {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', "''"))
    }
}

/// `NULL` is rendered the same way regardless of family (an empty field in
/// the pipe-delimited stream the worker writes, see `crate::worker`).
pub const NULL_TOKEN: &str = "";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_text_family() {
        assert_eq!(map_column_type(ColumnType::MYSQL_TYPE_VARCHAR).unwrap(), TypeFamily::Text);
        assert_eq!(map_column_type(ColumnType::MYSQL_TYPE_BIT).unwrap(), TypeFamily::Text);
    }

    #[test]
    fn maps_numeric_families_unquoted() {
        assert!(map_column_type(ColumnType::MYSQL_TYPE_SHORT).unwrap().is_unquoted());
        assert!(map_column_type(ColumnType::MYSQL_TYPE_LONGLONG).unwrap().is_unquoted());
        assert!(map_column_type(ColumnType::MYSQL_TYPE_DECIMAL).unwrap().is_unquoted());
    }

    #[test]
    fn fails_on_unmapped_type() {
        assert!(map_column_type(ColumnType::MYSQL_TYPE_BLOB).is_err());
    }

    #[test]
    fn quotes_text_and_doubles_interior_quotes() {
        assert_eq!(quote_value("o'brien", TypeFamily::Text), "'o''brien'");
    }

    #[test]
    fn leaves_numeric_unquoted() {
        assert_eq!(quote_value("42", TypeFamily::Int4), "42");
    }
}
