//! Worker directory actor
//!
//! One task owns the table of known workers; everyone else talks to it
//! through a [`DirectoryHandle`]. Admission of a registration is decided
//! inside the actor and the endpoint is marked pending, so concurrent
//! duplicates are turned away before anybody fetches metadata. The fetch
//! itself happens outside the actor and is handed back with
//! [`DirectoryHandle::complete`].
//!
//! An entry for an endpoint is replaced only when the completed record
//! carries a different pid, so the table never holds two entries for one
//! `ip:port`.

use std::collections::{BTreeMap, HashMap};

use jm_core::{EndpointId, WorkerRecord};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the command channel
const COMMAND_BUFFER: usize = 256;

/// Outcome of asking the directory to admit a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Endpoint unknown; caller should fetch metadata and complete
    Fresh,
    /// Endpoint known under another pid; caller should fetch and complete,
    /// the old entry stays until then
    Replace {
        /// Pid of the entry that will be replaced
        previous_pid: u32,
    },
    /// Same endpoint and pid already in the table
    AlreadyRegistered,
    /// Same endpoint and pid is being fetched by someone else
    AlreadyPending,
}

impl Admission {
    /// Whether the caller owns the pending slot and must complete or abort it
    pub fn needs_fetch(&self) -> bool {
        matches!(self, Admission::Fresh | Admission::Replace { .. })
    }
}

enum Command {
    Admit {
        endpoint: EndpointId,
        pid: u32,
        reply: oneshot::Sender<Admission>,
    },
    Complete {
        record: WorkerRecord,
        reply: oneshot::Sender<bool>,
    },
    Abort {
        endpoint: EndpointId,
        pid: u32,
    },
    Remove {
        endpoint: EndpointId,
        expected_pid: Option<u32>,
        reply: oneshot::Sender<Option<WorkerRecord>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<WorkerRecord>>,
    },
}

/// Cloneable handle to the directory actor
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<Command>,
}

impl DirectoryHandle {
    /// Start the actor; it runs until every handle is dropped
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(Directory::default().run(rx));
        (Self { tx }, task)
    }

    /// Decide what to do with a registration of `endpoint` by `pid`
    ///
    /// When the answer [`needs_fetch`](Admission::needs_fetch), the
    /// endpoint is pending until [`complete`](Self::complete) or
    /// [`abort`](Self::abort) is called.
    pub async fn admit(&self, endpoint: EndpointId, pid: u32) -> Admission {
        self.request(|reply| Command::Admit { endpoint, pid, reply })
            .await
            .unwrap_or(Admission::AlreadyPending)
    }

    /// Insert a fetched record; returns false when the registration was
    /// superseded or removed while it was pending
    pub async fn complete(&self, record: WorkerRecord) -> bool {
        self.request(|reply| Command::Complete { record, reply })
            .await
            .unwrap_or(false)
    }

    /// Give up a pending registration
    pub async fn abort(&self, endpoint: EndpointId, pid: u32) {
        let _ = self.tx.send(Command::Abort { endpoint, pid }).await;
    }

    /// Remove an entry
    ///
    /// With `expected_pid`, the entry is only removed if it still has
    /// that pid.
    pub async fn remove(
        &self,
        endpoint: EndpointId,
        expected_pid: Option<u32>,
    ) -> Option<WorkerRecord> {
        self.request(|reply| Command::Remove {
            endpoint,
            expected_pid,
            reply,
        })
        .await
        .flatten()
    }

    /// Copy of all entries, ordered by endpoint
    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        self.request(|reply| Command::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    /// Entries keyed by `ip:port`, as returned by `list`
    pub async fn list(&self) -> BTreeMap<String, WorkerRecord> {
        self.snapshot()
            .await
            .into_iter()
            .map(|record| (record.endpoint.to_string(), record))
            .collect()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).await.is_err() {
            tracing::warn!("Directory actor is gone");
            return None;
        }
        rx.await.ok()
    }
}

#[derive(Default)]
struct Directory {
    entries: BTreeMap<EndpointId, WorkerRecord>,
    pending: HashMap<EndpointId, u32>,
}

impl Directory {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Admit {
                    endpoint,
                    pid,
                    reply,
                } => {
                    let _ = reply.send(self.admit(endpoint, pid));
                }
                Command::Complete { record, reply } => {
                    let _ = reply.send(self.complete(record));
                }
                Command::Abort { endpoint, pid } => {
                    if self.pending.get(&endpoint) == Some(&pid) {
                        self.pending.remove(&endpoint);
                    }
                }
                Command::Remove {
                    endpoint,
                    expected_pid,
                    reply,
                } => {
                    let _ = reply.send(self.remove(endpoint, expected_pid));
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.entries.values().cloned().collect());
                }
            }
        }
        tracing::debug!("Directory actor stopped with {} entries", self.entries.len());
    }

    fn admit(&mut self, endpoint: EndpointId, pid: u32) -> Admission {
        if self.pending.get(&endpoint) == Some(&pid) {
            tracing::debug!("Registration of {} (pid {}) already in progress", endpoint, pid);
            return Admission::AlreadyPending;
        }

        let admission = match self.entries.get(&endpoint) {
            Some(existing) if existing.process.pid == pid => {
                tracing::warn!("Server {} already registered", endpoint);
                return Admission::AlreadyRegistered;
            }
            Some(existing) => {
                tracing::warn!(
                    "Server {} changed pid from {} to {}",
                    endpoint,
                    existing.process.pid,
                    pid
                );
                Admission::Replace {
                    previous_pid: existing.process.pid,
                }
            }
            None => Admission::Fresh,
        };

        self.pending.insert(endpoint, pid);
        admission
    }

    fn complete(&mut self, record: WorkerRecord) -> bool {
        let endpoint = record.endpoint.clone();
        if self.pending.get(&endpoint) != Some(&record.process.pid) {
            tracing::debug!(
                "Dropping stale registration of {} (pid {})",
                endpoint,
                record.process.pid
            );
            return false;
        }
        self.pending.remove(&endpoint);

        tracing::info!("Inserted {} with pid {}", endpoint, record.process.pid);
        self.entries.insert(endpoint, record);
        true
    }

    fn remove(&mut self, endpoint: EndpointId, expected_pid: Option<u32>) -> Option<WorkerRecord> {
        if expected_pid.is_none() {
            self.pending.remove(&endpoint);
        }

        match (self.entries.get(&endpoint), expected_pid) {
            (None, _) => {
                tracing::debug!("Server {} not registered", endpoint);
                None
            }
            (Some(existing), Some(pid)) if existing.process.pid != pid => {
                tracing::debug!(
                    "Not removing {}: pid is now {}, not {}",
                    endpoint,
                    existing.process.pid,
                    pid
                );
                None
            }
            (Some(_), _) => {
                tracing::info!("Removed {}", endpoint);
                self.entries.remove(&endpoint)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jm_core::{ProcessId, WorkerMetadata};

    fn record(port: u16, pid: u32) -> WorkerRecord {
        WorkerRecord {
            endpoint: EndpointId::new("10.0.0.5", port),
            process: ProcessId::new("10.0.0.5", pid),
            ssl: false,
            metadata: WorkerMetadata::default(),
        }
    }

    async fn register(directory: &DirectoryHandle, port: u16, pid: u32) -> Admission {
        let admission = directory.admit(EndpointId::new("10.0.0.5", port), pid).await;
        if admission.needs_fetch() {
            assert!(directory.complete(record(port, pid)).await);
        }
        admission
    }

    #[tokio::test]
    async fn test_fresh_then_already_registered() {
        let (directory, _task) = DirectoryHandle::spawn();

        assert_eq!(register(&directory, 18000, 7).await, Admission::Fresh);
        assert_eq!(
            register(&directory, 18000, 7).await,
            Admission::AlreadyRegistered
        );
        assert_eq!(directory.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_pid_replaces_entry() {
        let (directory, _task) = DirectoryHandle::spawn();

        register(&directory, 18000, 7).await;
        assert_eq!(
            register(&directory, 18000, 8).await,
            Admission::Replace { previous_pid: 7 }
        );

        let entries = directory.snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].process.pid, 8);
    }

    #[tokio::test]
    async fn test_old_entry_visible_until_replacement_completes() {
        let (directory, _task) = DirectoryHandle::spawn();
        register(&directory, 18000, 7).await;

        let endpoint = EndpointId::new("10.0.0.5", 18000);
        assert!(directory.admit(endpoint.clone(), 8).await.needs_fetch());
        assert_eq!(directory.snapshot().await[0].process.pid, 7);

        directory.abort(endpoint, 8).await;
        assert_eq!(directory.snapshot().await[0].process.pid, 7);
    }

    #[tokio::test]
    async fn test_pending_duplicate_is_turned_away() {
        let (directory, _task) = DirectoryHandle::spawn();
        let endpoint = EndpointId::new("10.0.0.5", 18000);

        assert_eq!(directory.admit(endpoint.clone(), 7).await, Admission::Fresh);
        assert_eq!(
            directory.admit(endpoint.clone(), 7).await,
            Admission::AlreadyPending
        );
        assert!(directory.complete(record(18000, 7)).await);
        assert_eq!(
            directory.admit(endpoint, 7).await,
            Admission::AlreadyRegistered
        );
    }

    #[tokio::test]
    async fn test_later_registration_supersedes_pending_one() {
        let (directory, _task) = DirectoryHandle::spawn();
        let endpoint = EndpointId::new("10.0.0.5", 18000);

        directory.admit(endpoint.clone(), 7).await;
        directory.admit(endpoint, 8).await;

        assert!(!directory.complete(record(18000, 7)).await);
        assert!(directory.complete(record(18000, 8)).await);
        assert_eq!(directory.snapshot().await[0].process.pid, 8);
    }

    #[tokio::test]
    async fn test_remove_with_expected_pid() {
        let (directory, _task) = DirectoryHandle::spawn();
        register(&directory, 18000, 7).await;
        register(&directory, 18000, 8).await;

        let endpoint = EndpointId::new("10.0.0.5", 18000);
        assert!(directory.remove(endpoint.clone(), Some(7)).await.is_none());
        assert_eq!(directory.snapshot().await.len(), 1);

        let removed = directory.remove(endpoint, Some(8)).await.unwrap();
        assert_eq!(removed.process.pid, 8);
        assert!(directory.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_during_fetch_drops_completion() {
        let (directory, _task) = DirectoryHandle::spawn();
        let endpoint = EndpointId::new("10.0.0.5", 18000);

        directory.admit(endpoint.clone(), 7).await;
        assert!(directory.remove(endpoint, None).await.is_none());
        assert!(!directory.complete(record(18000, 7)).await);
        assert!(directory.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_keyed_by_endpoint() {
        let (directory, _task) = DirectoryHandle::spawn();
        register(&directory, 18001, 9).await;
        register(&directory, 18000, 7).await;

        let list = directory.list().await;
        let keys: Vec<_> = list.keys().cloned().collect();
        assert_eq!(keys, vec!["10.0.0.5:18000", "10.0.0.5:18001"]);
    }
}
