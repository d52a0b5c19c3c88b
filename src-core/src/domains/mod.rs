//! Domain authorization: which recipient domains may use the service.
//!
//! The gate keeps an in-memory snapshot of the store. It is loaded once when
//! the engine starts and reloaded after every mutation made through the gate;
//! there is no background refresh.

mod store;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};

pub use store::{JsonDomainStore, MemoryDomainStore};

static ADDRESS_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedDomain {
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorizedDomain {
    pub fn new(domain: String) -> Self {
        let now = Utc::now();
        Self {
            domain,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence for authorized domains. Domains handed to a store are
/// already normalized.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn load(&self) -> Result<Vec<AuthorizedDomain>>;

    /// Returns false when the domain was already present.
    async fn insert(&self, domain: &str) -> Result<bool>;

    /// Returns false when the domain was not present.
    async fn remove(&self, domain: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "domain")]
pub enum DomainMutation {
    Added(String),
    AlreadyAuthorized(String),
    Removed(String),
    NotAuthorized(String),
}

impl DomainMutation {
    pub fn message(&self) -> String {
        match self {
            DomainMutation::Added(d) => format!("Domain {} authorized", d),
            DomainMutation::AlreadyAuthorized(d) => format!("Domain {} is already authorized", d),
            DomainMutation::Removed(d) => format!("Domain {} removed", d),
            DomainMutation::NotAuthorized(d) => format!("Domain {} is not authorized", d),
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, DomainMutation::Added(_) | DomainMutation::Removed(_))
    }
}

pub struct DomainGate {
    store: Arc<dyn DomainStore>,
    authorized: RwLock<BTreeSet<String>>,
}

impl DomainGate {
    pub async fn load(store: Arc<dyn DomainStore>) -> Result<Self> {
        let gate = Self {
            store,
            authorized: RwLock::new(BTreeSet::new()),
        };
        gate.reload().await?;
        Ok(gate)
    }

    pub async fn reload(&self) -> Result<()> {
        let records = self.store.load().await?;
        let fresh: BTreeSet<String> = records.into_iter().map(|r| r.domain).collect();
        info!("Loaded {} authorized domain(s)", fresh.len());
        *self.authorized.write().await = fresh;
        Ok(())
    }

    /// Whether the domain of `address` is authorized. Malformed addresses
    /// are never authorized.
    pub async fn is_authorized(&self, address: &str) -> bool {
        let Ok(address) = normalize_address(address) else {
            return false;
        };
        match domain_of(&address) {
            Some(domain) => self.authorized.read().await.contains(domain),
            None => false,
        }
    }

    pub async fn add_domain(&self, domain: &str) -> Result<DomainMutation> {
        let domain = normalize_domain(domain)?;
        let added = self.store.insert(&domain).await?;
        self.reload().await?;
        Ok(if added {
            DomainMutation::Added(domain)
        } else {
            DomainMutation::AlreadyAuthorized(domain)
        })
    }

    pub async fn remove_domain(&self, domain: &str) -> Result<DomainMutation> {
        let domain = normalize_domain(domain)?;
        let removed = self.store.remove(&domain).await?;
        self.reload().await?;
        Ok(if removed {
            DomainMutation::Removed(domain)
        } else {
            DomainMutation::NotAuthorized(domain)
        })
    }

    pub async fn list_domains(&self) -> BTreeSet<String> {
        self.authorized.read().await.clone()
    }

    /// Full records straight from the store, for administration output.
    pub async fn records(&self) -> Result<Vec<AuthorizedDomain>> {
        self.store.load().await
    }
}

/// Trims and lower-cases `raw` and checks it has the shape `local@host.tld`.
pub fn normalize_address(raw: &str) -> Result<String> {
    let address = raw.trim().to_lowercase();
    let valid = ADDRESS_SHAPE
        .as_ref()
        .map(|re| re.is_match(&address))
        .unwrap_or(false);
    if valid {
        Ok(address)
    } else {
        Err(Error::InvalidAddress(raw.trim().to_string()))
    }
}

pub fn normalize_domain(raw: &str) -> Result<String> {
    let domain = raw.trim().trim_start_matches('@').trim_end_matches('.').to_lowercase();
    let valid = !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.contains("..")
        && domain
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(domain)
    } else {
        Err(Error::InvalidAddress(format!("invalid domain {:?}", raw.trim())))
    }
}

/// Domain part of an already-normalized address.
pub fn domain_of(address: &str) -> Option<&str> {
    address.rsplit_once('@').map(|(_, domain)| domain)
}
