pub mod validation;

// Re-export key types and functions for convenient access
pub use validation::{
    redact_connection_string, sanitize_for_display, validate_connection_string,
    validate_identifier, ValidationError,
};
