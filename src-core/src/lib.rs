//! MailCode core: finds the newest valid verification code or action link a
//! streaming provider sent to an address, inside a shared central mailbox.
//!
//! The entry point is [`Engine::retrieve_artifact`]. Everything the engine
//! talks to from outside (the mailbox server, the credential store, the
//! authorized-domain store) sits behind a trait so it can be swapped.

pub mod body;
pub mod config;
pub mod credentials;
pub mod domains;
pub mod error;
pub mod extract;
pub mod freshness;
pub mod imap;
pub mod matcher;
pub mod message;
pub mod retrieve;
pub mod search;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{EngineConfig, ProviderProfile, CODE_VALIDITY_SECONDS};
pub use credentials::{CredentialSource, EnvCredentials, StaticCredential};
pub use domains::{
    normalize_address, AuthorizedDomain, DomainGate, DomainMutation, DomainStore, JsonDomainStore,
    MemoryDomainStore,
};
pub use error::{Error, Result};
pub use extract::{ActionLink, Artifact, ExtractionResult};
pub use retrieve::{Engine, FailureReason, ImapEngine, RetrievalOutcome, RetrievalState};
pub use transport::{Connector, MailTransport};
