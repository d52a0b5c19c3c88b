use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::transport::{Connector, MailTransport};

struct CachedSession<T> {
    transport: T,
    created_at: Instant,
    last_used: Instant,
}

type Slot<T> = Option<CachedSession<T>>;

/// Single-slot session cache for one mailbox identity.
///
/// At most one warm session is kept. [`SessionManager::acquire`] holds the
/// slot's lock until the lease is released or invalidated, so concurrent
/// retrievals queue behind each other instead of interleaving commands on the
/// same connection.
pub struct SessionManager<C: Connector> {
    connector: C,
    slot: Arc<Mutex<Slot<C::Transport>>>,
    reuse_window: Duration,
    connect_timeout: Duration,
}

/// Exclusive use of the mailbox session for the duration of one retrieval.
///
/// Dropping a lease without handing it back discards the session; the next
/// `acquire` opens a fresh one.
pub struct SessionLease<T> {
    guard: OwnedMutexGuard<Slot<T>>,
    transport: T,
    created_at: Instant,
}

impl<T> Deref for SessionLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T> DerefMut for SessionLease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, config: &SessionConfig) -> Self {
        Self {
            connector,
            slot: Arc::new(Mutex::new(None)),
            reuse_window: config.reuse_window(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn identity(&self) -> String {
        self.connector.identity()
    }

    /// Returns the warm session if it is recent and answers a NOOP, otherwise
    /// closes it and opens a new one.
    pub async fn acquire(&self) -> Result<SessionLease<C::Transport>> {
        let mut guard = Arc::clone(&self.slot).lock_owned().await;

        if let Some(mut cached) = guard.take() {
            let idle = cached.last_used.elapsed();
            if idle < self.reuse_window {
                match cached.transport.noop().await {
                    Ok(()) => {
                        debug!(
                            "Reusing mailbox session for {} (idle {:?}, age {:?})",
                            self.identity(),
                            idle,
                            cached.created_at.elapsed()
                        );
                        return Ok(SessionLease {
                            guard,
                            transport: cached.transport,
                            created_at: cached.created_at,
                        });
                    }
                    Err(e) => {
                        warn!("Cached session stale for {}: {}, creating new", self.identity(), e);
                    }
                }
            } else {
                debug!("Cached session for {} idle {:?}, replacing", self.identity(), idle);
            }
            let _ = cached.transport.logout().await;
        }

        info!("Creating new mailbox session for {}", self.identity());
        let connect = tokio::time::timeout(self.connect_timeout, self.connector.connect());
        let transport = match connect.await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!("Mailbox connection failed for {}: {}", self.identity(), e);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Mailbox connection to {} exceeded {:?}",
                    self.identity(),
                    self.connect_timeout
                );
                return Err(Error::TransportTimeout("connect"));
            }
        };

        Ok(SessionLease {
            guard,
            transport,
            created_at: Instant::now(),
        })
    }

    /// Hands the session back so the next caller can reuse it.
    pub fn release(&self, lease: SessionLease<C::Transport>) {
        let SessionLease {
            mut guard,
            transport,
            created_at,
        } = lease;
        *guard = Some(CachedSession {
            transport,
            created_at,
            last_used: Instant::now(),
        });
    }

    /// Closes the session (best-effort) and leaves the slot empty.
    pub async fn invalidate(&self, lease: SessionLease<C::Transport>) {
        let SessionLease {
            guard,
            mut transport,
            ..
        } = lease;
        let _ = transport.logout().await;
        drop(guard);
        info!("Invalidated mailbox session for {}", self.identity());
    }

    /// Opens a throwaway session, selects `mailbox` and logs out. Leaves the
    /// cached session untouched.
    pub async fn probe(&self, mailbox: &str) -> Result<()> {
        let mut transport = tokio::time::timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| Error::TransportTimeout("connect"))??;
        let selected = transport.select_mailbox(mailbox).await;
        let _ = transport.logout().await;
        selected
    }

    /// Logs out the cached session, if any (for shutdown).
    pub async fn disconnect(&self) {
        if let Some(mut cached) = self.slot.lock().await.take() {
            let _ = cached.transport.logout().await;
            info!("Disconnected mailbox session for {}", self.identity());
        }
    }
}
