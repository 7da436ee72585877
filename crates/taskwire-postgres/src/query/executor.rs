//! Parameterized query execution through the connector's pool.

use std::future::Future;
use std::time::Instant;

use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{Array, BigInt, Bool, Double, Text};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;
use serde_json::Value;

use super::params::{BindValue, BoundQuery, bind_named};
use super::retry::StaleConnectionRetry;
use crate::client::acquire;
use crate::error::{DriverError, classify};
use crate::{JsonCodec, PgConnector, PgError, PgResult, QueryArgs, TRACING_TARGET_QUERY};

/// A fetched row: column names mapped to their JSON-decoded values.
pub type PgRow = serde_json::Map<String, Value>;

/// Runs parameterized SQL and returns rows as key-value mappings.
///
/// Each call borrows one connection for its duration. A call that hits a
/// connection the server already closed is retried on another connection, up
/// to the pool's maximum size plus one times; what still fails is reported as
/// a [`PgError`].
pub trait QueryExecutor {
    /// Runs a statement and discards its result.
    fn execute_query(
        &self,
        query: &str,
        args: &QueryArgs,
    ) -> impl Future<Output = PgResult<()>> + Send;

    /// Runs a query and returns its first row, or `None` when nothing matched.
    fn execute_query_one(
        &self,
        query: &str,
        args: &QueryArgs,
    ) -> impl Future<Output = PgResult<Option<PgRow>>> + Send;

    /// Runs a query and returns all rows.
    fn execute_query_all(
        &self,
        query: &str,
        args: &QueryArgs,
    ) -> impl Future<Output = PgResult<Vec<PgRow>>> + Send;
}

/// Single text column holding one row encoded by the server.
#[derive(QueryableByName)]
struct EncodedRow {
    #[diesel(sql_type = Text)]
    row_json: String,
}

impl QueryExecutor for PgConnector {
    #[tracing::instrument(skip(self, args), target = TRACING_TARGET_QUERY)]
    async fn execute_query(&self, query: &str, args: &QueryArgs) -> PgResult<()> {
        let bound = bind_named(strip_terminator(query), args, self.json_codec())?;
        let retry = self.retry_policy()?;
        let pool = self.pool()?;
        let start = Instant::now();

        let affected = classify(retry.run(|| {
            let pool = pool.clone();
            let statement = prepare(&bound);
            async move {
                let mut conn = acquire(&pool).await?;
                let affected = statement.execute(&mut *conn).await?;
                Ok::<_, DriverError>(affected)
            }
        }))
        .await?;

        tracing::debug!(
            target: TRACING_TARGET_QUERY,
            affected,
            elapsed = ?start.elapsed(),
            "Statement executed"
        );

        Ok(())
    }

    #[tracing::instrument(skip(self, args), target = TRACING_TARGET_QUERY)]
    async fn execute_query_one(&self, query: &str, args: &QueryArgs) -> PgResult<Option<PgRow>> {
        let mut rows = self.fetch(query, args, true).await?;
        Ok(rows.pop())
    }

    #[tracing::instrument(skip(self, args), target = TRACING_TARGET_QUERY)]
    async fn execute_query_all(&self, query: &str, args: &QueryArgs) -> PgResult<Vec<PgRow>> {
        self.fetch(query, args, false).await
    }
}

impl PgConnector {
    fn retry_policy(&self) -> PgResult<StaleConnectionRetry> {
        Ok(StaleConnectionRetry::for_pool_size(self.max_size()?))
    }

    async fn fetch(&self, query: &str, args: &QueryArgs, first_only: bool) -> PgResult<Vec<PgRow>> {
        let bound = bind_named(&wrap_rows(query, first_only), args, self.json_codec())?;
        let retry = self.retry_policy()?;
        let pool = self.pool()?;
        let start = Instant::now();

        let encoded = classify(retry.run(|| {
            let pool = pool.clone();
            let statement = prepare(&bound);
            async move {
                let mut conn = acquire(&pool).await?;
                let rows = statement.load::<EncodedRow>(&mut *conn).await?;
                Ok::<_, DriverError>(rows)
            }
        }))
        .await?;

        tracing::debug!(
            target: TRACING_TARGET_QUERY,
            rows = encoded.len(),
            elapsed = ?start.elapsed(),
            "Query fetched"
        );

        encoded
            .iter()
            .map(|row| decode_row(self.json_codec(), &row.row_json))
            .collect()
    }
}

/// Builds a diesel statement for one attempt.
fn prepare(bound: &BoundQuery) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    let mut statement = diesel::sql_query(bound.sql.clone()).into_boxed::<Pg>();

    for value in &bound.binds {
        statement = match value.clone() {
            BindValue::Bool(value) => statement.bind::<Bool, _>(value),
            BindValue::BigInt(value) => statement.bind::<BigInt, _>(value),
            BindValue::Double(value) => statement.bind::<Double, _>(value),
            BindValue::Text(value) => statement.bind::<Text, _>(value),
            BindValue::TextArray(value) => statement.bind::<Array<Text>, _>(value),
        };
    }

    statement
}

fn strip_terminator(query: &str) -> &str {
    query.trim_end().trim_end_matches(';').trim_end()
}

/// Wraps a row-returning statement so each row comes back as one JSON object.
fn wrap_rows(query: &str, first_only: bool) -> String {
    let limit = if first_only { " LIMIT 1" } else { "" };
    format!(
        "WITH result_rows AS ({}) SELECT to_jsonb(result_rows)::text AS row_json FROM result_rows{limit}",
        strip_terminator(query)
    )
}

fn decode_row(codec: &JsonCodec, text: &str) -> PgResult<PgRow> {
    match codec.decode(text) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(PgError::connector_with_message(
            format!("decoded row is not a mapping: {other}"),
            None,
        )),
        Err(e) => Err(PgError::connector_with_message(
            "failed to decode row",
            Some(Box::new(e)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wrap_rows() {
        assert_eq!(
            wrap_rows("SELECT id FROM jobs;  ", false),
            "WITH result_rows AS (SELECT id FROM jobs) SELECT to_jsonb(result_rows)::text AS row_json FROM result_rows"
        );
        assert!(wrap_rows("SELECT 1", true).ends_with("FROM result_rows LIMIT 1"));
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("DELETE FROM jobs ;\n"), "DELETE FROM jobs");
        assert_eq!(strip_terminator("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_decode_row() {
        let codec = JsonCodec::default();
        let row = decode_row(&codec, r#"{"id": 1, "args": {"a": true}}"#).unwrap();
        assert_eq!(row["id"], json!(1));
        assert_eq!(row["args"], json!({"a": true}));

        assert!(decode_row(&codec, "[1]").is_err());
        assert!(decode_row(&codec, "not json").is_err());
    }

    #[test]
    fn test_decode_row_uses_codec() {
        let codec = JsonCodec::default().with_decoder(|_| Ok(json!({"decoded": true})));
        let row = decode_row(&codec, "{}").unwrap();
        assert_eq!(row["decoded"], json!(true));
    }

    #[tokio::test]
    async fn test_queries_before_open_fail() {
        let connector = PgConnector::new(crate::PgConfig::default());
        let args = QueryArgs::new();

        let error = connector.execute_query("SELECT 1", &args).await.unwrap_err();
        assert!(matches!(error, PgError::NotOpen));

        let error = connector
            .execute_query_one("SELECT 1", &args)
            .await
            .unwrap_err();
        assert!(matches!(error, PgError::NotOpen));
    }

    #[tokio::test]
    async fn test_invalid_query_fails_before_round_trip() {
        let connector = PgConnector::new(crate::PgConfig::default());
        let error = connector
            .execute_query_all("SELECT :missing", &QueryArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(error, PgError::InvalidQuery(_)));
    }
}
