use std::fmt;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TooLong { max: usize, actual: usize },
    NullBytes,
    EmptyInput,
    InvalidConnectionString(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLong { max, actual } => {
                write!(f, "Input length {} exceeds maximum of {}", actual, max)
            }
            ValidationError::NullBytes => write!(f, "Input contains null bytes"),
            ValidationError::EmptyInput => write!(f, "Input must not be empty"),
            ValidationError::InvalidConnectionString(reason) => {
                write!(f, "Invalid connection string: {}", reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Validate a schema object name as it appears in a snapshot.
///
/// Any name PostgreSQL can store is accepted, quoted or not; the generator
/// takes care of quoting. Empty names, NUL bytes and names PostgreSQL would
/// silently truncate are rejected.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if name.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(ValidationError::TooLong {
            max: MAX_IDENTIFIER_BYTES,
            actual: name.len(),
        });
    }

    Ok(())
}

/// Fragments that never belong in a connection string.
const SUSPICIOUS_PATTERNS: [&str; 4] = ["DROP TABLE", "DROP DATABASE", "DELETE FROM", ";--"];

/// Check a PostgreSQL connection string before handing it to the driver.
///
/// Accepts libpq key/value strings and `postgres://`/`postgresql://` URIs.
/// Embedded SQL and shell substitution are rejected outright.
pub fn validate_connection_string(conn_str: &str) -> Result<(), ValidationError> {
    if conn_str.trim().is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if conn_str.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if let Some(scheme_end) = conn_str.find("://") {
        let scheme = conn_str[..scheme_end].to_ascii_lowercase();
        if scheme != "postgres" && scheme != "postgresql" {
            return Err(ValidationError::InvalidConnectionString(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }
    }

    let upper = conn_str.to_uppercase();
    if let Some(pattern) = SUSPICIOUS_PATTERNS.iter().find(|p| upper.contains(*p)) {
        return Err(ValidationError::InvalidConnectionString(format!(
            "suspicious pattern: {}",
            pattern
        )));
    }

    if conn_str.contains('`') || conn_str.contains("$(") {
        return Err(ValidationError::InvalidConnectionString(
            "shell substitution is not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Strip control characters from a string for safe display.
/// Preserves newlines, carriage returns, and tabs.
pub fn sanitize_for_display(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\r' || *c == '\t')
        .collect()
}

/// Replace the password of a connection string with `***` so it can be
/// logged. Handles both URI (`postgres://user:pw@host`) and key/value
/// (`password=pw`) forms.
pub fn redact_connection_string(conn_str: &str) -> String {
    if let Some(scheme_end) = conn_str.find("://") {
        let rest = &conn_str[scheme_end + 3..];
        if let Some(at) = rest.find('@') {
            let userinfo = &rest[..at];
            if let Some(colon) = userinfo.find(':') {
                return format!(
                    "{}{}:***{}",
                    &conn_str[..scheme_end + 3],
                    &userinfo[..colon],
                    &rest[at..]
                );
            }
        }
        return conn_str.to_string();
    }

    conn_str
        .split_whitespace()
        .map(|pair| {
            if pair.to_ascii_lowercase().starts_with("password=") {
                "password=***".to_string()
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
