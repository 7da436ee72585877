//! Named SQL templates with identifier substitution.

use std::borrow::Cow;
use std::fmt;

use crate::{PgError, PgResult};

/// Subscribes the current session to one notification channel.
pub const LISTEN_QUEUE: QueryTemplate = QueryTemplate::from_static("listen_queue", "LISTEN {channel_name}");

/// A SQL statement registered under a logical operation name.
///
/// Templates may contain `{key}` slots for identifiers (channel, table or
/// column names) and `:name` placeholders for values. Slots are filled by
/// [`format_identifiers`], which always quotes what it inserts; values are
/// bound by the executor and never spliced into the text.
///
/// [`format_identifiers`]: QueryTemplate::format_identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    name: Cow<'static, str>,
    text: Cow<'static, str>,
}

impl QueryTemplate {
    /// Creates a template from static strings.
    pub const fn from_static(name: &'static str, text: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            text: Cow::Borrowed(text),
        }
    }

    /// Creates a template.
    pub fn new(name: impl Into<Cow<'static, str>>, text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Returns the logical operation name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw template text.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fills every `{key}` slot with the quoted identifier given for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::InvalidQuery`] when a slot has no identifier, a slot
    /// is not closed, or an identifier cannot be quoted.
    pub fn format_identifiers(&self, identifiers: &[(&str, &str)]) -> PgResult<String> {
        let mut formatted = String::with_capacity(self.text.len());
        let mut rest = self.text.as_ref();

        while let Some(open) = rest.find('{') {
            formatted.push_str(&rest[..open]);

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                PgError::InvalidQuery(format!("unclosed slot in template {}", self.name))
            })?;
            let key = &after[..close];

            let (_, identifier) = identifiers
                .iter()
                .find(|(name, _)| *name == key)
                .ok_or_else(|| {
                    PgError::InvalidQuery(format!(
                        "no identifier for slot {{{key}}} in template {}",
                        self.name
                    ))
                })?;

            formatted.push_str(&quote_identifier(identifier)?);
            rest = &after[close + 1..];
        }

        formatted.push_str(rest);
        Ok(formatted)
    }
}

impl AsRef<str> for QueryTemplate {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Quotes a SQL identifier so it is always read as a single name.
///
/// Embedded double quotes are doubled. Empty names and names containing a NUL
/// byte are rejected since the server would refuse them anyway.
pub fn quote_identifier(identifier: &str) -> PgResult<String> {
    if identifier.is_empty() {
        return Err(PgError::InvalidQuery("identifier cannot be empty".into()));
    }

    if identifier.contains('\0') {
        return Err(PgError::InvalidQuery(
            "identifier cannot contain a NUL byte".into(),
        ));
    }

    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');

    Ok(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("jobs").unwrap(), r#""jobs""#);
        assert_eq!(quote_identifier("Mixed Case").unwrap(), r#""Mixed Case""#);
        assert_eq!(
            quote_identifier(r#"x"; DROP TABLE jobs; --"#).unwrap(),
            r#""x""; DROP TABLE jobs; --""#
        );
    }

    #[test]
    fn test_quote_identifier_rejects_unusable_names() {
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("a\0b").is_err());
    }

    #[test]
    fn test_listen_template() {
        let sql = LISTEN_QUEUE
            .format_identifiers(&[("channel_name", "queue#default")])
            .unwrap();
        assert_eq!(sql, r#"LISTEN "queue#default""#);
        assert_eq!(LISTEN_QUEUE.name(), "listen_queue");
    }

    #[test]
    fn test_missing_identifier() {
        let error = LISTEN_QUEUE.format_identifiers(&[]).unwrap_err();
        assert!(matches!(error, PgError::InvalidQuery(_)));
    }

    #[test]
    fn test_unclosed_slot() {
        let template = QueryTemplate::new("broken", "SELECT * FROM {table");
        assert!(template.format_identifiers(&[("table", "jobs")]).is_err());
    }

    #[test]
    fn test_template_without_slots() {
        let template = QueryTemplate::new("count", String::from("SELECT count(*) FROM jobs"));
        assert_eq!(
            template.format_identifiers(&[]).unwrap(),
            "SELECT count(*) FROM jobs"
        );
        assert_eq!(template.to_string(), template.text());
    }
}
