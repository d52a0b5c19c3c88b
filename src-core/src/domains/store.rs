use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{normalize_domain, AuthorizedDomain, DomainStore};
use crate::error::{Error, Result};

type Records = BTreeMap<String, AuthorizedDomain>;

fn lock(records: &Mutex<Records>) -> Result<std::sync::MutexGuard<'_, Records>> {
    records
        .lock()
        .map_err(|_| Error::Store("domain store lock poisoned".to_string()))
}

/// Process-local store, for tests and deployments without a domains file.
#[derive(Default)]
pub struct MemoryDomainStore {
    records: Mutex<Records>,
}

impl MemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainStore for MemoryDomainStore {
    async fn load(&self) -> Result<Vec<AuthorizedDomain>> {
        Ok(lock(&self.records)?.values().cloned().collect())
    }

    async fn insert(&self, domain: &str) -> Result<bool> {
        let mut records = lock(&self.records)?;
        if records.contains_key(domain) {
            return Ok(false);
        }
        records.insert(domain.to_string(), AuthorizedDomain::new(domain.to_string()));
        Ok(true)
    }

    async fn remove(&self, domain: &str) -> Result<bool> {
        Ok(lock(&self.records)?.remove(domain).is_some())
    }
}

/// Authorized domains persisted as a JSON array of records.
///
/// Every mutation rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written file behind.
pub struct JsonDomainStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonDomainStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let data = fs::read_to_string(&path)?;
            if data.trim().is_empty() {
                Records::new()
            } else {
                let list: Vec<AuthorizedDomain> = serde_json::from_str(&data).map_err(|e| {
                    Error::Store(format!("failed to parse {}: {}", path.display(), e))
                })?;
                normalize_records(list)
            }
        } else {
            info!("Domains file {} does not exist yet, starting empty", path.display());
            Records::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let list: Vec<&AuthorizedDomain> = records.values().collect();
        let data = serde_json::to_string_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!("Failed to replace {}: {}", self.path.display(), e);
            Error::Io(e)
        })
    }
}

/// Lower-cases hand-edited entries and drops the ones that are not domains.
/// The first record of a duplicated domain wins.
fn normalize_records(list: Vec<AuthorizedDomain>) -> Records {
    let mut records = Records::new();
    for mut record in list {
        match normalize_domain(&record.domain) {
            Ok(domain) => {
                record.domain = domain.clone();
                records.entry(domain).or_insert(record);
            }
            Err(_) => warn!("Ignoring invalid domain {:?} in domains file", record.domain),
        }
    }
    records
}

#[async_trait]
impl DomainStore for JsonDomainStore {
    async fn load(&self) -> Result<Vec<AuthorizedDomain>> {
        Ok(lock(&self.records)?.values().cloned().collect())
    }

    async fn insert(&self, domain: &str) -> Result<bool> {
        let mut records = lock(&self.records)?;
        if let Some(existing) = records.get_mut(domain) {
            let previous = std::mem::replace(&mut existing.updated_at, Utc::now());
            if let Err(e) = self.persist(&records) {
                if let Some(existing) = records.get_mut(domain) {
                    existing.updated_at = previous;
                }
                return Err(e);
            }
            return Ok(false);
        }
        records.insert(domain.to_string(), AuthorizedDomain::new(domain.to_string()));
        if let Err(e) = self.persist(&records) {
            records.remove(domain);
            return Err(e);
        }
        Ok(true)
    }

    async fn remove(&self, domain: &str) -> Result<bool> {
        let mut records = lock(&self.records)?;
        let Some(previous) = records.remove(domain) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&records) {
            records.insert(domain.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}
