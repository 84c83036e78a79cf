//! Students and universities: principals plus the records they keep.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use log::info;
use serde::{Deserialize, Serialize};

use crate::academic::{
    Activity, ActivityResult, Credential, CredentialMetadata, Exam, ExamResult,
    ExchangeAgreement, IssuedCredential, StudyPlan, EXCHANGE_PLAN,
};
use crate::certificate::Certificate;
use crate::channel::Principal;
use crate::crypto::{hash, Capability};
use crate::error::{Error, Result};
use crate::identity::{random_bytes, serial_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    principal: Principal,
    pub name: String,
    pub surname: String,
    passwords: BTreeMap<String, String>,
    credentials: Vec<IssuedCredential>,
}

impl Student {
    pub fn new(code: impl Into<String>, name: impl Into<String>, surname: impl Into<String>) -> Self {
        Self {
            principal: Principal::new(code),
            name: name.into(),
            surname: surname.into(),
            passwords: BTreeMap::new(),
            credentials: Vec::new(),
        }
    }

    pub fn code(&self) -> &str {
        self.principal.code()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_mut(&mut self) -> &mut Principal {
        &mut self.principal
    }

    pub fn set_password(&mut self, university: &str, password: impl Into<String>) {
        self.passwords.insert(university.to_string(), password.into());
    }

    pub fn password_for(&self, university: &str) -> Result<&str> {
        self.passwords
            .get(university)
            .map(String::as_str)
            .ok_or_else(|| Error::NotFound(format!("{} has no password for {university}", self.code())))
    }

    pub fn store_credential(&mut self, issued: IssuedCredential) {
        self.credentials.push(issued);
    }

    pub fn credentials(&self) -> &[IssuedCredential] {
        &self.credentials
    }

    pub fn latest_credential(&self) -> Result<&IssuedCredential> {
        self.credentials
            .last()
            .ok_or_else(|| Error::NotFound(format!("{} holds no credential", self.code())))
    }
}

/// A student as seen by one university, keyed `studentCode#universityCode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub surname: String,
    pub study_plan: String,
    /// Absent on the placeholder a host creates when it accepts an exchange.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub passed_exams: BTreeMap<String, ExamResult>,
    #[serde(default)]
    pub passed_activities: BTreeMap<String, ActivityResult>,
}

impl StudentRecord {
    pub fn is_placeholder(&self) -> bool {
        self.password_hash.is_none()
    }
}

fn salted_hash(salt: &str, password: &str) -> String {
    hash(&format!("{salt}{password}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct University {
    principal: Principal,
    pub name: String,
    /// Staff member who signs off exchanges on this side.
    pub referrer: String,
    #[serde(default)]
    study_plans: BTreeMap<String, StudyPlan>,
    #[serde(default)]
    activities: BTreeMap<String, Activity>,
    #[serde(default)]
    students: BTreeMap<String, StudentRecord>,
    #[serde(default)]
    outgoing: BTreeMap<String, ExchangeAgreement>,
    #[serde(default)]
    incoming: BTreeMap<String, ExchangeAgreement>,
    #[serde(default)]
    issued: BTreeMap<String, IssuedCredential>,
    #[serde(default)]
    cached: BTreeMap<String, Credential>,
    #[serde(default)]
    verified: BTreeMap<String, IssuedCredential>,
    #[serde(default)]
    certificate: Option<Certificate>,
}

impl University {
    pub fn new(code: impl Into<String>, name: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self {
            principal: Principal::new(code),
            name: name.into(),
            referrer: referrer.into(),
            study_plans: BTreeMap::new(),
            activities: BTreeMap::new(),
            students: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            issued: BTreeMap::new(),
            cached: BTreeMap::new(),
            verified: BTreeMap::new(),
            certificate: None,
        }
    }

    pub fn code(&self) -> &str {
        self.principal.code()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_mut(&mut self) -> &mut Principal {
        &mut self.principal
    }

    pub fn public_capability(&self) -> Result<Capability> {
        self.principal
            .own_public()
            .ok_or_else(|| Error::missing_key(self.code(), self.code()))
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    pub fn set_certificate(&mut self, cert: Certificate) {
        self.certificate = Some(cert);
    }

    pub fn add_study_plan(&mut self, name: impl Into<String>, plan: StudyPlan) {
        self.study_plans.insert(name.into(), plan);
    }

    pub fn add_activity(&mut self, activity: Activity) {
        self.activities.insert(activity.name.clone(), activity);
    }

    pub fn has_study_plan(&self, name: &str) -> bool {
        self.study_plans.contains_key(name)
    }

    pub fn serial_id(&self, student: &str) -> String {
        serial_id(student, self.code())
    }

    pub fn record(&self, student: &str) -> Result<&StudentRecord> {
        let key = self.serial_id(student);
        self.students
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("{key} is not enrolled at {}", self.name)))
    }

    fn record_mut(&mut self, student: &str) -> Result<&mut StudentRecord> {
        let key = self.serial_id(student);
        let name = self.name.clone();
        self.students
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("{key} is not enrolled at {name}")))
    }

    pub fn is_enrolled(&self, student: &str) -> bool {
        self.record(student).is_ok_and(|r| !r.is_placeholder())
    }

    /// A host-side placeholder exists and still waits for a password.
    pub fn is_incoming(&self, student: &str) -> bool {
        self.record(student).is_ok_and(StudentRecord::is_placeholder)
    }

    /// # Errors
    /// `Error::PolicyViolation` for a second enrollment of the same student,
    /// unless it completes an exchange placeholder.
    pub fn ensure_can_enroll(&self, student: &str, study_plan: &str) -> Result<()> {
        if self.is_enrolled(student) {
            return Err(Error::PolicyViolation(format!(
                "{} is already enrolled at {}",
                self.serial_id(student),
                self.name
            )));
        }
        if !self.is_incoming(student) && !self.has_study_plan(study_plan) {
            return Err(Error::NotFound(format!(
                "study plan {study_plan} at {}",
                self.name
            )));
        }
        Ok(())
    }

    pub fn enroll(
        &mut self,
        student: &str,
        name: &str,
        surname: &str,
        study_plan: &str,
        password: &str,
    ) -> Result<()> {
        self.ensure_can_enroll(student, study_plan)?;
        let salt = hex::encode(random_bytes::<16>()?);
        let password_hash = Some(salted_hash(&salt, password));
        let key = self.serial_id(student);
        match self.students.get_mut(&key) {
            Some(placeholder) => {
                placeholder.password_hash = password_hash;
                placeholder.salt = Some(salt);
            }
            None => {
                self.students.insert(
                    key.clone(),
                    StudentRecord {
                        name: name.to_string(),
                        surname: surname.to_string(),
                        study_plan: study_plan.to_string(),
                        password_hash,
                        salt: Some(salt),
                        passed_exams: BTreeMap::new(),
                        passed_activities: BTreeMap::new(),
                    },
                );
            }
        }
        info!("{}: enrolled {key}", self.name);
        Ok(())
    }

    pub fn check_password(&self, student: &str, password: &str) -> bool {
        self.record(student).is_ok_and(|r| match (&r.salt, &r.password_hash) {
            (Some(salt), Some(expected)) => salted_hash(salt, password) == *expected,
            _ => false,
        })
    }

    pub fn pass_exam(&mut self, student: &str, result: ExamResult) -> Result<()> {
        let record = self.record_mut(student)?;
        record.passed_exams.insert(result.name.clone(), result);
        Ok(())
    }

    pub fn pass_activity(&mut self, student: &str, result: ActivityResult) -> Result<()> {
        let record = self.record_mut(student)?;
        record.passed_activities.insert(result.name.clone(), result);
        Ok(())
    }

    /// Some study plan offers an exam of that name worth at least the requested credits.
    pub fn offers_exam(&self, exam: &Exam) -> bool {
        self.study_plans
            .values()
            .flatten()
            .any(|e| e.name == exam.name && e.cfus >= exam.cfus)
    }

    pub fn offers_activity(&self, activity: &Activity) -> bool {
        self.activities
            .get(&activity.name)
            .is_some_and(|a| a.cfus >= activity.cfus)
    }

    pub fn outgoing_agreement(&self, student: &str) -> Result<&ExchangeAgreement> {
        self.outgoing
            .get(student)
            .ok_or_else(|| Error::NotFound(format!("{} has no outgoing agreement for {student}", self.name)))
    }

    pub fn incoming_agreement(&self, student: &str) -> Result<&ExchangeAgreement> {
        self.incoming
            .get(student)
            .ok_or_else(|| Error::NotFound(format!("{} has no incoming agreement for {student}", self.name)))
    }

    pub fn record_outgoing(&mut self, agreement: ExchangeAgreement) {
        self.outgoing.insert(agreement.student.clone(), agreement);
    }

    /// Store the host side of an agreement and open a passwordless placeholder
    /// record so the student can later enroll under the exchange plan.
    pub fn accept_incoming(&mut self, agreement: ExchangeAgreement, name: &str, surname: &str) {
        let key = self.serial_id(&agreement.student);
        self.students.entry(key).or_insert_with(|| StudentRecord {
            name: name.to_string(),
            surname: surname.to_string(),
            study_plan: EXCHANGE_PLAN.to_string(),
            password_hash: None,
            salt: None,
            passed_exams: BTreeMap::new(),
            passed_activities: BTreeMap::new(),
        });
        self.incoming.insert(agreement.student.clone(), agreement);
    }

    /// Credential for an incoming student, reused while the cached copy has
    /// not expired. Only results named in the agreement are included.
    pub fn credential_for(
        &mut self,
        student: &str,
        today: NaiveDate,
        validity_days: i64,
    ) -> Result<Credential> {
        if let Some(cached) = self.cached.get(student) {
            if !cached.is_expired(today) {
                return Ok(cached.clone());
            }
        }
        let agreement = self.incoming_agreement(student)?;
        let record = self.record(student)?;
        let exams_results = record
            .passed_exams
            .values()
            .filter(|r| agreement.exams.contains_key(&r.name))
            .cloned()
            .collect();
        let activities_results = record
            .passed_activities
            .values()
            .filter(|r| agreement.activities.contains_key(&r.name))
            .cloned()
            .collect();
        let credential = Credential {
            metadata: CredentialMetadata {
                internal_serial_id: self.serial_id(student),
                external_serial_id: agreement.home_serial_id.clone(),
                name: record.name.clone(),
                surname: record.surname.clone(),
                home_university: agreement.home_university.clone(),
                host_university: self.code().to_string(),
                internal_referrer: agreement.external_referrer.clone(),
                external_referrer: agreement.internal_referrer.clone(),
                emission_date: today,
                expiration_date: today + Duration::days(validity_days),
                exchange_period_start: agreement.start,
                exchange_period_end: agreement.end,
            },
            exams_results,
            activities_results,
        };
        self.cached.insert(student.to_string(), credential.clone());
        Ok(credential)
    }

    pub fn record_issued(&mut self, student: &str, issued: IssuedCredential) {
        self.issued.insert(student.to_string(), issued);
    }

    pub fn issued_credential(&self, student: &str) -> Result<&IssuedCredential> {
        self.issued
            .get(student)
            .ok_or_else(|| Error::NotFound(format!("{} issued no credential to {student}", self.name)))
    }

    /// Check a presented credential against this (home) university's
    /// outgoing agreement for the student.
    ///
    /// # Errors
    /// `Error::PolicyViolation` on a serial or university mismatch, an
    /// expired credential, or any entry outside the negotiated credits.
    pub fn check_presented(&self, student: &str, credential: &Credential, today: NaiveDate) -> Result<()> {
        let agreement = self.outgoing_agreement(student)?;
        let meta = &credential.metadata;
        if meta.external_serial_id != self.serial_id(student) || meta.external_serial_id != agreement.home_serial_id {
            return Err(Error::PolicyViolation(format!(
                "credential names serial {}, expected {}",
                meta.external_serial_id,
                self.serial_id(student)
            )));
        }
        if meta.host_university != agreement.host_university {
            return Err(Error::PolicyViolation(format!(
                "credential issued by {}, agreement is with {}",
                meta.host_university, agreement.host_university
            )));
        }
        if credential.is_expired(today) {
            return Err(Error::PolicyViolation(format!(
                "credential expired on {}",
                meta.expiration_date
            )));
        }
        for exam in &credential.exams_results {
            agreement.check_exam(exam)?;
        }
        for activity in &credential.activities_results {
            agreement.check_activity(activity)?;
        }
        Ok(())
    }

    pub fn accept_verified(&mut self, student: &str, issued: IssuedCredential) {
        self.verified.insert(student.to_string(), issued);
    }

    pub fn verified_credential(&self, student: &str) -> Option<&IssuedCredential> {
        self.verified.get(student)
    }

    pub fn forget_verified(&mut self, student: &str) -> Option<IssuedCredential> {
        self.verified.remove(student)
    }
}
