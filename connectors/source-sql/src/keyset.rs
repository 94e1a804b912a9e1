//! Keyset (seek) query generation from a list of key columns.

use std::fmt::Write as _;

use settle_state::SqlValue;
use settle_types::key::Watermark;

use settle_core::PipelineError;

/// Token a query template may carry to place the keyset predicate itself,
/// for example before a `GROUP BY`.
pub const KEYSET_TOKEN: &str = "{keyset}";

/// How the last key column compares with the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Strictly after the watermark.
    Exclusive,
    /// At or after the watermark; recomputes the latest period.
    Inclusive,
}

/// `SELECT` template plus the key columns it is paged by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetQuery {
    template: String,
    key_columns: Vec<String>,
    tie_breakers: Vec<String>,
    bound: Bound,
}

impl KeysetQuery {
    /// `template` selects the record columns; `key_columns` are the SQL
    /// expressions of the comparison key, in key order.
    pub fn new<I, S>(template: impl Into<String>, key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            template: template.into(),
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            tie_breakers: Vec::new(),
            bound: Bound::Exclusive,
        }
    }

    #[must_use]
    pub fn inclusive(mut self) -> Self {
        self.bound = Bound::Inclusive;
        self
    }

    /// Extra `ORDER BY` columns after the key, for queries whose key is
    /// not unique per row.
    #[must_use]
    pub fn then_order_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tie_breakers.extend(columns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn bound(&self) -> Bound {
        self.bound
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        self.key_columns.len()
    }

    /// The lexicographic predicate, expanded:
    /// `a > $1 OR (a = $1 AND b > $2)`.
    #[must_use]
    pub fn predicate(&self) -> String {
        let last = self.key_columns.len().saturating_sub(1);
        let mut disjuncts = Vec::with_capacity(self.key_columns.len());
        for (i, column) in self.key_columns.iter().enumerate() {
            let op = if i == last && self.bound == Bound::Inclusive {
                ">="
            } else {
                ">"
            };
            let mut terms: Vec<String> = self.key_columns[..i]
                .iter()
                .enumerate()
                .map(|(j, prev)| format!("{prev} = ${}", j + 1))
                .collect();
            terms.push(format!("{column} {op} ${}", i + 1));
            disjuncts.push(if terms.len() == 1 {
                terms.remove(0)
            } else {
                format!("({})", terms.join(" AND "))
            });
        }
        disjuncts.join(" OR ")
    }

    /// Full statement: template with the predicate, ordering, and
    /// `LIMIT`/`OFFSET` placeholders numbered after the key parameters.
    #[must_use]
    pub fn sql(&self) -> String {
        let predicate = format!("({})", self.predicate());
        let mut sql = if self.template.contains(KEYSET_TOKEN) {
            self.template.replace(KEYSET_TOKEN, &predicate)
        } else {
            format!("{} WHERE {predicate}", self.template.trim_end())
        };
        let order: Vec<&str> = self
            .key_columns
            .iter()
            .chain(&self.tie_breakers)
            .map(String::as_str)
            .collect();
        let n = self.key_columns.len();
        let _ = write!(
            sql,
            " ORDER BY {} LIMIT ${} OFFSET ${}",
            order.join(", "),
            n + 1,
            n + 2
        );
        sql
    }

    /// Parameters for [`KeysetQuery::sql`]: the leading watermark values,
    /// then limit and offset.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the watermark is shorter than
    /// the key column list.
    pub fn params(
        &self,
        watermark: &Watermark,
        limit: usize,
        offset: u64,
    ) -> Result<Vec<SqlValue>, PipelineError> {
        if watermark.len() < self.key_columns.len() {
            return Err(PipelineError::Config(format!(
                "watermark {watermark} has fewer fields than key columns {:?}",
                self.key_columns
            )));
        }
        let mut params: Vec<SqlValue> = watermark
            .values()
            .iter()
            .take(self.key_columns.len())
            .map(SqlValue::from)
            .collect();
        params.push(SqlValue::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        params.push(SqlValue::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
        Ok(params)
    }
}
