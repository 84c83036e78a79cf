//! Study plans, results, exchange agreements and the credential itself.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::error::{Error, Result};

/// Study plan name given to incoming exchange students.
pub const EXCHANGE_PLAN: &str = "ext";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub name: String,
    pub cfus: u32,
}

impl Exam {
    pub fn new(name: impl Into<String>, cfus: u32) -> Self {
        Self {
            name: name.into(),
            cfus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub cfus: u32,
}

impl Activity {
    pub fn new(name: impl Into<String>, cfus: u32) -> Self {
        Self {
            name: name.into(),
            cfus,
        }
    }
}

pub type StudyPlan = Vec<Exam>;

/// A numeric mark or a plain pass/fail outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grade {
    Mark(u8),
    Passed(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub name: String,
    pub grade: Grade,
    #[serde(default)]
    pub honours: bool,
    pub date: NaiveDate,
    pub prof: String,
    pub study_plan_name: String,
    pub cfus: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityResult {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cfus: u32,
    pub prof: String,
}

/// Negotiated credit map for one student's stay, held by both universities.
///
/// Referrer roles are named from the home university's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAgreement {
    pub student: String,
    pub home_university: String,
    pub host_university: String,
    /// `studentCode#homeUniversityCode`
    pub home_serial_id: String,
    pub exams: BTreeMap<String, u32>,
    pub activities: BTreeMap<String, u32>,
    pub internal_referrer: String,
    pub external_referrer: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ExchangeAgreement {
    /// # Errors
    /// `Error::PolicyViolation` if the exam was not negotiated or carries
    /// fewer credits than agreed.
    pub fn check_exam(&self, result: &ExamResult) -> Result<()> {
        check_credit("exam", &self.exams, &result.name, result.cfus)
    }

    pub fn check_activity(&self, result: &ActivityResult) -> Result<()> {
        check_credit("activity", &self.activities, &result.name, result.cfus)
    }
}

fn check_credit(what: &str, agreed: &BTreeMap<String, u32>, name: &str, cfus: u32) -> Result<()> {
    match agreed.get(name) {
        None => Err(Error::PolicyViolation(format!(
            "{what} {name} is not part of the exchange agreement"
        ))),
        Some(&required) if cfus < required => Err(Error::PolicyViolation(format!(
            "{what} {name} carries {cfus} credits, agreement requires {required}"
        ))),
        Some(_) => Ok(()),
    }
}

/// Leaf 0 of every credential tree. Field order here is the hashing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub internal_serial_id: String,
    pub external_serial_id: String,
    pub name: String,
    pub surname: String,
    pub home_university: String,
    pub host_university: String,
    pub internal_referrer: String,
    pub external_referrer: String,
    pub emission_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub exchange_period_start: NaiveDate,
    pub exchange_period_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub metadata: CredentialMetadata,
    #[serde(default)]
    pub exams_results: Vec<ExamResult>,
    #[serde(default)]
    pub activities_results: Vec<ActivityResult>,
}

impl Credential {
    /// Leaf hashes in canonical order: metadata, exams, then activities.
    pub fn leaf_hashes(&self) -> Result<Vec<String>> {
        let mut leaves = Vec::with_capacity(1 + self.exams_results.len() + self.activities_results.len());
        leaves.push(hash(&serde_json::to_string(&self.metadata)?));
        for exam in &self.exams_results {
            leaves.push(hash(&serde_json::to_string(exam)?));
        }
        for activity in &self.activities_results {
            leaves.push(hash(&serde_json::to_string(activity)?));
        }
        Ok(leaves)
    }

    /// Copy without the named exams and activities. Metadata always stays.
    pub fn redact(&self, exams: &[&str], activities: &[&str]) -> Self {
        Self {
            metadata: self.metadata.clone(),
            exams_results: self
                .exams_results
                .iter()
                .filter(|e| !exams.contains(&e.name.as_str()))
                .cloned()
                .collect(),
            activities_results: self
                .activities_results
                .iter()
                .filter(|a| !activities.contains(&a.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today > self.metadata.expiration_date
    }
}

/// A credential together with the ledger id that certifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub id: String,
}
