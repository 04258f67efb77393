//! Payload shape validation shared by workflow implementations.
//!
//! A workflow declares its payload as a `Deserialize + Validate` struct and
//! calls [`parse_payload`]; every failure is reported as
//! [`CoreError::InvalidPayload`] so the submission path can reject it before
//! a job row is written.

use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::error::CoreError;

/// Deserialize and validate a JSON payload into `T`.
pub fn parse_payload<T>(payload: &serde_json::Value) -> Result<T, CoreError>
where
    T: DeserializeOwned + Validate,
{
    if !payload.is_object() {
        return Err(CoreError::InvalidPayload(
            "Payload must be a JSON object".to_string(),
        ));
    }

    let parsed: T = serde_json::from_value(payload.clone())
        .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;

    parsed
        .validate()
        .map_err(|e| CoreError::InvalidPayload(describe(&e)))?;

    Ok(parsed)
}

/// Flatten field errors into a stable, human-readable message.
///
/// Fields are sorted so the message does not depend on hash order.
fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let reasons: Vec<String> = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            format!("{field}: {}", reasons.join(", "))
        })
        .collect();
    fields.sort();
    fields.join("; ")
}
