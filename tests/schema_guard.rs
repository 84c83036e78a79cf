use serde_json::json;

use mobility_ledger::academic::Credential;
use mobility_ledger::schema;

// Helper: a credential as a relying university would receive it
fn valid_credential_json() -> serde_json::Value {
    json!({
        "metadata": {
            "internal_serial_id": "S#U2",
            "external_serial_id": "S#U1",
            "name": "Ada",
            "surname": "Lovelace",
            "home_university": "U1",
            "host_university": "U2",
            "internal_referrer": "Verdi",
            "external_referrer": "Bianchi",
            "emission_date": "2026-03-01",
            "expiration_date": "2027-03-01",
            "exchange_period_start": "2026-01-01",
            "exchange_period_end": "2026-05-01"
        },
        "exams_results": [{
            "name": "Databases",
            "grade": 30,
            "honours": true,
            "date": "2026-02-10",
            "prof": "Neri",
            "study_plan_name": "ext",
            "cfus": 4
        }],
        "activities_results": [{
            "name": "Lab",
            "type": "laboratory",
            "start_date": "2026-02-01",
            "end_date": "2026-02-20",
            "cfus": 2,
            "prof": "Rossi"
        }]
    })
}

#[test]
fn valid_credential_passes_and_decodes() {
    let v = valid_credential_json();
    schema::validate_credential(&v).expect("credential valid");
    let c: Credential = serde_json::from_value(v).unwrap();
    assert_eq!(c.leaf_hashes().unwrap().len(), 3);
}

#[test]
fn pass_fail_grades_are_accepted() {
    let mut v = valid_credential_json();
    v["exams_results"][0]["grade"] = json!(true);
    schema::validate_credential(&v).expect("boolean grade valid");
}

#[test]
fn redacted_credential_with_metadata_only_is_valid() {
    let mut v = valid_credential_json();
    v["exams_results"] = json!([]);
    v.as_object_mut().unwrap().remove("activities_results");
    schema::validate_credential(&v).expect("metadata-only credential valid");
}

#[test]
fn missing_metadata_field_is_rejected() {
    let mut v = valid_credential_json();
    v["metadata"].as_object_mut().unwrap().remove("expiration_date");
    let err = schema::validate_credential(&v).unwrap_err();
    assert!(err.to_string().contains("credential schema violation"));
}

#[test]
fn malformed_serial_id_is_rejected() {
    let mut v = valid_credential_json();
    v["metadata"]["external_serial_id"] = json!("S-U1");
    assert!(schema::validate_credential(&v).is_err());
}

#[test]
fn unknown_fields_are_rejected() {
    let mut v = valid_credential_json();
    v["exams_results"][0]["bonus"] = json!(3);
    assert!(schema::validate_credential(&v).is_err());

    let mut v = valid_credential_json();
    v["signature"] = json!("forged");
    assert!(schema::validate_credential(&v).is_err());
}

#[test]
fn negative_credits_are_rejected() {
    let mut v = valid_credential_json();
    v["activities_results"][0]["cfus"] = json!(-2);
    assert!(schema::validate_credential(&v).is_err());
}
