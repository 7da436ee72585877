//! Subcommands and their arguments.

use clap::{Args, Subcommand, ValueEnum};
use serde_json::Value;
use taskwire_postgres::{QueryArgs, QueryValue};

/// Available subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Listen for notifications and log every wake-up until interrupted.
    Listen(ListenCommand),
    /// Run one parameterized query and print the rows as JSON.
    Query(QueryCommand),
    /// Check that the database is reachable.
    Ping,
}

/// Arguments of the `listen` command.
#[derive(Debug, Clone, Args)]
pub struct ListenCommand {
    /// Channel to subscribe to (repeatable)
    #[arg(long = "channel", short = 'c', required = true)]
    pub channels: Vec<String>,
}

/// Arguments of the `query` command.
#[derive(Debug, Clone, Args)]
pub struct QueryCommand {
    /// SQL text, with `:name` placeholders
    pub sql: String,

    /// Parameter as `name=value`; the value is read as JSON, or as text if it is not valid JSON
    #[arg(long = "arg", short = 'a', value_parser = parse_query_arg)]
    pub args: Vec<(String, QueryValue)>,

    /// What to return
    #[arg(long, value_enum, default_value_t = FetchMode::All)]
    pub mode: FetchMode,
}

impl QueryCommand {
    /// Collects the parsed parameters; a repeated name keeps its last value.
    pub fn query_args(&self) -> QueryArgs {
        self.args.iter().cloned().collect()
    }
}

/// How many rows the `query` command returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchMode {
    /// Run the statement and print nothing.
    Execute,
    /// Print the first row, or `null`.
    One,
    /// Print every row.
    All,
}

fn parse_query_arg(raw: &str) -> Result<(String, QueryValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;

    let name = name.trim();
    if name.is_empty() {
        return Err("parameter name cannot be empty".to_owned());
    }

    let value = match serde_json::from_str::<Value>(value) {
        Ok(json) => QueryValue::from(json),
        Err(_) => QueryValue::Text(value.to_owned()),
    };

    Ok((name.to_owned(), value))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_query_arg() {
        assert_eq!(
            parse_query_arg("queue=default").unwrap(),
            ("queue".to_owned(), QueryValue::Text("default".into()))
        );
        assert_eq!(
            parse_query_arg("priority=5").unwrap(),
            ("priority".to_owned(), QueryValue::Int(5))
        );
        assert_eq!(
            parse_query_arg(r#"args={"a":1}"#).unwrap().1,
            QueryValue::Json(json!({"a": 1}))
        );
        assert_eq!(
            parse_query_arg("lock=null").unwrap().1,
            QueryValue::Null
        );
        assert_eq!(
            parse_query_arg("expr=a=b").unwrap().1,
            QueryValue::Text("a=b".into())
        );
    }

    #[test]
    fn test_parse_query_arg_rejects_malformed() {
        assert!(parse_query_arg("no_equals").is_err());
        assert!(parse_query_arg("=value").is_err());
    }

    #[test]
    fn test_repeated_names_keep_last_value() {
        let command = QueryCommand {
            sql: "SELECT :a".into(),
            args: vec![
                ("a".into(), QueryValue::Int(1)),
                ("a".into(), QueryValue::Int(2)),
            ],
            mode: FetchMode::One,
        };
        assert_eq!(command.query_args().get("a"), Some(&QueryValue::Int(2)));
    }
}
