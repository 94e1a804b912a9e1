//! SQL dialect differences between the supported warehouses.
//!
//! Statements are written once with `PostgreSQL` conventions (`$n`
//! placeholders, `ON CONFLICT` upserts). `SQLite` accepts nearly the same
//! text; the helpers here cover the remaining gaps.

use std::borrow::Cow;
use std::sync::LazyLock;

use pg_escape::quote_identifier;
use regex::Regex;

use crate::error::{Result, StateError};

static PG_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)").expect("placeholder regex is valid")
});

/// Destination SQL flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Rewrite `$n` placeholders for the backend.
    ///
    /// `SQLite` reads `$1` as a *named* parameter whose index depends on
    /// first appearance, so positional `?n` is substituted instead.
    #[must_use]
    pub fn bind_placeholders(self, sql: &str) -> Cow<'_, str> {
        match self {
            Self::Postgres => Cow::Borrowed(sql),
            Self::Sqlite => PG_PLACEHOLDER.replace_all(sql, "?$1"),
        }
    }

    /// Column definition of an auto-increment surrogate primary key.
    #[must_use]
    pub fn serial_primary_key(self) -> &'static str {
        match self {
            Self::Postgres => "SERIAL PRIMARY KEY",
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    #[must_use]
    pub fn timestamp_type(self) -> &'static str {
        match self {
            Self::Postgres => "TIMESTAMP",
            Self::Sqlite => "TEXT",
        }
    }

    #[must_use]
    pub fn date_type(self) -> &'static str {
        match self {
            Self::Postgres => "DATE",
            Self::Sqlite => "TEXT",
        }
    }

    #[must_use]
    pub fn time_type(self) -> &'static str {
        match self {
            Self::Postgres => "TIME",
            Self::Sqlite => "TEXT",
        }
    }

    /// Two-argument maximum scalar function.
    #[must_use]
    pub fn greatest(self) -> &'static str {
        match self {
            Self::Postgres => "GREATEST",
            Self::Sqlite => "MAX",
        }
    }

    /// Expand the type tokens of a DDL template:
    /// `{serial}`, `{timestamp}`, `{date}`, `{time}`.
    #[must_use]
    pub fn render_ddl(self, template: &str) -> String {
        template
            .replace("{serial}", self.serial_primary_key())
            .replace("{timestamp}", self.timestamp_type())
            .replace("{date}", self.date_type())
            .replace("{time}", self.time_type())
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote a possibly schema-qualified name (`stg.users`) part by part.
#[must_use]
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(|part| quote_identifier(part).to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Accept only plain identifiers (letters, digits, underscore) for names
/// that are spliced into statements, such as schema aliases.
///
/// # Errors
///
/// Returns [`StateError::InvalidIdentifier`] otherwise.
pub fn checked_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StateError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_placeholders_become_positional() {
        let sql = "SELECT * FROM t WHERE a > $1 OR (a = $1 AND b > $2) LIMIT $10";
        assert_eq!(
            Dialect::Sqlite.bind_placeholders(sql),
            "SELECT * FROM t WHERE a > ?1 OR (a = ?1 AND b > ?2) LIMIT ?10"
        );
        assert_eq!(Dialect::Postgres.bind_placeholders(sql), sql);
    }

    #[test]
    fn ddl_tokens_expand_per_dialect() {
        let tpl = "id {serial}, ts {timestamp}, d {date}";
        assert_eq!(
            Dialect::Sqlite.render_ddl(tpl),
            "id INTEGER PRIMARY KEY AUTOINCREMENT, ts TEXT, d TEXT"
        );
        assert_eq!(
            Dialect::Postgres.render_ddl(tpl),
            "id SERIAL PRIMARY KEY, ts TIMESTAMP, d DATE"
        );
    }

    #[test]
    fn qualified_names_quote_each_part() {
        assert_eq!(quote_qualified("stg.users"), "stg.users");
        assert_eq!(quote_qualified("stg.Odd Name"), "stg.\"Odd Name\"");
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(checked_identifier("dds").is_ok());
        assert!(checked_identifier("dds; DROP").is_err());
        assert!(checked_identifier("1abc").is_err());
        assert!(checked_identifier("").is_err());
    }
}
