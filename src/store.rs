//! JSON persistence for the registry and the parties around it.
//!
//! Layout under the store root:
//!
//! ```text
//! registry.json
//! universities/<code>.json
//! students/<code>.json
//! authorities/<code>.json
//! ```
//!
//! Every write goes to a sibling temp file first and is renamed over the
//! target, so a reader never sees a half-written document.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::actors::{Student, University};
use crate::certificate::CertificationAuthority;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::ledger::{Block, Ledger};
use crate::registry::TrustRegistry;

const REGISTRY_FILE: &str = "registry.json";
const UNIVERSITIES: &str = "universities";
const STUDENTS: &str = "students";
const AUTHORITIES: &str = "authorities";

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::open(settings.data_dir()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_registry(&self) -> bool {
        self.root.join(REGISTRY_FILE).exists()
    }

    pub fn save_registry(&self, registry: &TrustRegistry) -> Result<()> {
        self.write_json(&self.root.join(REGISTRY_FILE), registry)
    }

    /// The ledger is replayed block by block before the rest of the registry
    /// is decoded.
    ///
    /// # Errors
    /// `Error::ChainLink` for a stored chain with a broken link;
    /// `Error::NotFound` when nothing has been saved yet.
    pub fn load_registry(&self) -> Result<TrustRegistry> {
        let path = self.root.join(REGISTRY_FILE);
        let value: Value = self.read_json(&path)?;
        let blocks: Vec<Block> = match value.get("ledger") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => Vec::new(),
        };
        Ledger::from_blocks(blocks)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn save_university(&self, university: &University) -> Result<()> {
        self.write_json(&self.entry(UNIVERSITIES, university.code()), university)
    }

    pub fn load_university(&self, code: &str) -> Result<University> {
        self.read_json(&self.entry(UNIVERSITIES, code))
    }

    pub fn save_student(&self, student: &Student) -> Result<()> {
        self.write_json(&self.entry(STUDENTS, student.code()), student)
    }

    pub fn load_student(&self, code: &str) -> Result<Student> {
        self.read_json(&self.entry(STUDENTS, code))
    }

    pub fn save_authority(&self, ca: &CertificationAuthority) -> Result<()> {
        self.write_json(&self.entry(AUTHORITIES, ca.code()), ca)
    }

    pub fn load_authority(&self, code: &str) -> Result<CertificationAuthority> {
        self.read_json(&self.entry(AUTHORITIES, code))
    }

    /// Codes of every saved university, sorted.
    pub fn universities(&self) -> Result<Vec<String>> {
        let dir = self.root.join(UNIVERSITIES);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut codes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let p = entry?.path();
            if p.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = p.file_stem().and_then(|s| s.to_str()) {
                    codes.push(stem.to_string());
                }
            }
        }
        codes.sort();
        Ok(codes)
    }

    fn entry(&self, kind: &str, code: &str) -> PathBuf {
        self.root.join(kind).join(format!("{code}.json"))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        debug!("saved {}", path.display());
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Err(Error::NotFound(format!("{}", path.display())));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
