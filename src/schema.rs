#![allow(
    clippy::missing_errors_doc,
    clippy::explicit_auto_deref,
    clippy::non_std_lazy_statics
)]
use jsonschema::{Draft, JSONSchema};
use serde_json::json;
use serde_json::Value;

use crate::error::{Error, Result};

// Structure only; agreement and ledger checks happen after decoding.
pub static CREDENTIAL_SCHEMA: std::sync::LazyLock<Value> = std::sync::LazyLock::new(|| {
    let date = json!({"type": "string", "format": "date"});
    let text = json!({"type": "string", "minLength": 1});
    let credits = json!({"type": "integer", "minimum": 0});
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "https://mobility-ledger.dev/schema/credential.json",
        "type": "object",
        "required": ["metadata"],
        "properties": {
            "metadata": {
                "type": "object",
                "required": [
                    "internal_serial_id", "external_serial_id", "name", "surname",
                    "home_university", "host_university",
                    "internal_referrer", "external_referrer",
                    "emission_date", "expiration_date",
                    "exchange_period_start", "exchange_period_end"
                ],
                "properties": {
                    "internal_serial_id": {"type": "string", "pattern": "^[^#]+#[^#]+$"},
                    "external_serial_id": {"type": "string", "pattern": "^[^#]+#[^#]+$"},
                    "name": text,
                    "surname": text,
                    "home_university": text,
                    "host_university": text,
                    "internal_referrer": {"type": "string"},
                    "external_referrer": {"type": "string"},
                    "emission_date": date,
                    "expiration_date": date,
                    "exchange_period_start": date,
                    "exchange_period_end": date
                },
                "additionalProperties": false
            },
            "exams_results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "grade", "date", "prof", "study_plan_name", "cfus"],
                    "properties": {
                        "name": text,
                        "grade": {"type": ["integer", "boolean"]},
                        "honours": {"type": "boolean"},
                        "date": date,
                        "prof": {"type": "string"},
                        "study_plan_name": {"type": "string"},
                        "cfus": credits
                    },
                    "additionalProperties": false
                }
            },
            "activities_results": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "type", "start_date", "end_date", "cfus", "prof"],
                    "properties": {
                        "name": text,
                        "type": {"type": "string"},
                        "start_date": date,
                        "end_date": date,
                        "cfus": credits,
                        "prof": {"type": "string"}
                    },
                    "additionalProperties": false
                }
            }
        },
        "additionalProperties": false
    })
});

pub fn validate_credential(v: &Value) -> Result<()> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&*CREDENTIAL_SCHEMA)
        .map_err(|e| Error::Schema(format!("invalid credential schema: {e}")))?;
    if let Err(errs) = compiled.validate(v) {
        let msgs: Vec<String> = errs.map(|e| e.to_string()).collect();
        return Err(Error::Schema(msgs.join("; ")));
    }
    Ok(())
}
