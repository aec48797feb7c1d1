// ABOUTME: Identifier validation, SQL quoting and retry helpers
// ABOUTME: Shared by query building, the Postgres plumbing and connection setup

use std::time::Duration;

use crate::error::{Result, TransferError};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a schema, table or column name before it reaches any SQL text.
///
/// Identifiers are always double-quoted when rendered, so mixed case, spaces
/// and hyphens are allowed. What is rejected is what quoting cannot make safe
/// or what Postgres would silently mangle: empty names, control characters and
/// names over 63 bytes.
///
/// # Examples
///
/// ```
/// # use db_to_db::utils::validate_identifier;
/// assert!(validate_identifier("table", "orders").is_ok());
/// assert!(validate_identifier("table", "Order Lines").is_ok());
/// assert!(validate_identifier("table", "").is_err());
/// assert!(validate_identifier("table", "bad\0name").is_err());
/// ```
pub fn validate_identifier(kind: &str, identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        return Err(TransferError::config(format!(
            "{} name cannot be empty or whitespace-only",
            kind
        )));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(TransferError::config(format!(
            "{} name '{}' exceeds maximum length of {} bytes (got {})",
            kind,
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LEN,
            identifier.len()
        )));
    }

    if let Some((i, c)) = identifier.chars().enumerate().find(|(_, c)| c.is_control()) {
        return Err(TransferError::config(format!(
            "{} name '{}' contains control character \\x{:02x} at position {}",
            kind,
            sanitize_identifier(identifier),
            c as u32,
            i
        )));
    }

    Ok(())
}

/// Sanitize an identifier for display
///
/// Removes control characters and limits length to keep log lines readable.
/// This is for display only; SQL text goes through [`quote_ident`].
///
/// ```
/// # use db_to_db::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier (schema, table, column)
///
/// Escapes embedded quotes and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a SQL string literal
///
/// The result is an untyped literal, so the server resolves it against the
/// column it is compared with instead of the client picking a type.
///
/// ```
/// use db_to_db::utils::quote_literal;
/// assert_eq!(quote_literal("hello"), "'hello'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal(""), "''");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Retry a function with exponential backoff
///
/// Used for establishing connections only. Batch reads and writes are never
/// retried here.
///
/// # Arguments
///
/// * `operation` - Async function to retry
/// * `max_retries` - Maximum number of retry attempts (0 = just the initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            // Configuration problems will not fix themselves
            Err(e @ TransferError::Configuration(_)) => return Err(e),
            Err(e) if attempt >= max_retries => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}; retrying in {:?}...",
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_quoted_forms() {
        assert!(validate_identifier("table", "orders").is_ok());
        assert!(validate_identifier("table", "landing__orders").is_ok());
        assert!(validate_identifier("schema", "Sales-2024").is_ok());
        assert!(validate_identifier("column", "created at").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_bad_names() {
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "   ").is_err());
        assert!(validate_identifier("table", "tab\tle").is_err());
        assert!(validate_identifier("table", &"a".repeat(64)).is_err());
        assert!(validate_identifier("table", &"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("table\x00name"), "tablename");
        let long_name = "a".repeat(200);
        assert_eq!(sanitize_identifier(&long_name).len(), 100);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_success() {
        let mut attempts = 0;
        let result = retry_with_backoff(
            || {
                attempts += 1;
                async move {
                    if attempts < 3 {
                        Err(TransferError::transport("connect", "refused"))
                    } else {
                        Ok("connected")
                    }
                }
            },
            5,
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_failure() {
        let mut attempts = 0;
        let result: Result<()> = retry_with_backoff(
            || {
                attempts += 1;
                async move { Err(TransferError::transport("connect", "refused")) }
            },
            2,
            Duration::from_millis(10),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_retry_with_backoff_does_not_retry_configuration_errors() {
        let mut attempts = 0;
        let result: Result<()> = retry_with_backoff(
            || {
                attempts += 1;
                async move { Err(TransferError::config("bad TLS setup")) }
            },
            4,
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(result, Err(TransferError::Configuration(_))));
        assert_eq!(attempts, 1);
    }
}
