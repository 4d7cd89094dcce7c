//! Relation naming. Key columns for a row arrive from the decoder's `'M'`
//! key section (see `crate::decode::record`), and column names arrive from
//! the change record's own column metadata rather than a fresh catalog
//! query.

use std::fmt;
use std::str::FromStr;

/// A schema-qualified relation name. `schema` is `None` for a MySQL source,
/// which has no schema concept distinct from its database.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Relation {
    pub schema: Option<String>,
    pub name: String,
}

impl FromStr for Relation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((schema, name)) = s.split_once('.') {
            Ok(Relation {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            })
        } else {
            Ok(Relation {
                schema: None,
                name: s.to_string(),
            })
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Relation {
    pub fn new(full_name: &str) -> Self {
        full_name.parse().unwrap()
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Relation {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Relation {
            schema: None,
            name: name.into(),
        }
    }

    /// Double-quoted, dot-joined identifier suitable for interpolation into
    /// `COPY`/`SELECT` statements.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

/// Double the embedded quotes and wrap in double quotes, same as Postgres's
/// own `quote_ident`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
