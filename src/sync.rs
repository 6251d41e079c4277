//! The synchronizer task.
//!
//! All backend-manager events funnel through one broadcast channel drained
//! here, which decouples event arrival from rebuild timing: a burst of
//! rapid events is coalesced into a single resync pass over the union of
//! their affected kinds. Every trigger follows the same shape - resync,
//! then notify only the kinds whose key set actually changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendHost;
use crate::notify::broadcast_list_changed;
use crate::protocol::{CapabilityKind, Identity};
use crate::registry::RegistrySet;
use crate::session::SessionTable;

/// Drains backend events and keeps the registries live.
pub struct Synchronizer;

impl Synchronizer {
    /// Spawn the synchronizer task.
    ///
    /// The subscription is taken before the task is spawned, so no event
    /// sent after `spawn` returns can be missed. The task runs until the
    /// shutdown token fires or the event channel closes.
    pub fn spawn(
        host: Arc<dyn BackendHost>,
        registries: Arc<RegistrySet>,
        sessions: Arc<SessionTable>,
        hub_identity: Identity,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut events = host.events();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("synchronizer stopping on shutdown");
                        break;
                    }
                    received = events.recv() => match received {
                        Ok(event) => {
                            let mut kinds: BTreeSet<CapabilityKind> =
                                event.affected_kinds().iter().copied().collect();

                            // Coalesce whatever else already arrived into
                            // this same pass.
                            loop {
                                match events.try_recv() {
                                    Ok(next) => {
                                        kinds.extend(next.affected_kinds().iter().copied());
                                    }
                                    Err(TryRecvError::Lagged(missed)) => {
                                        warn!(missed, "event backlog overflowed; widening to full resync");
                                        kinds.extend(CapabilityKind::ALL);
                                    }
                                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                                }
                            }

                            let kinds: Vec<CapabilityKind> = kinds.into_iter().collect();
                            resync(&*host, &registries, &sessions, &hub_identity, &kinds);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "event receiver lagged; full resync");
                            resync(&*host, &registries, &sessions, &hub_identity, &CapabilityKind::ALL);
                        }
                        Err(RecvError::Closed) => {
                            debug!("event channel closed; synchronizer stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// One resync pass: rebuild, then notify only what changed.
fn resync(
    host: &dyn BackendHost,
    registries: &RegistrySet,
    sessions: &SessionTable,
    hub_identity: &Identity,
    kinds: &[CapabilityKind],
) {
    debug!(kinds = ?kinds, "resyncing registries");
    let changed = registries.sync(&host.snapshots(), hub_identity, kinds);

    if changed.is_empty() {
        debug!("resync produced no catalog changes");
        return;
    }

    info!(changed = ?changed, "capability catalog changed");
    broadcast_list_changed(sessions, &changed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendEvent, BackendSnapshot, BackendStatus, CapabilityLists,
                         HubLifecycleState};
    use crate::error::CrossbarError;
    use crate::protocol::JsonRpcRequest;
    use crate::session::TransportKind;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Host whose fleet snapshot can be rewritten mid-test.
    struct MutableHost {
        snapshots: Mutex<Vec<BackendSnapshot>>,
        tx: broadcast::Sender<BackendEvent>,
    }

    impl MutableHost {
        fn new() -> Self {
            let (tx, _) = broadcast::channel(16);
            Self {
                snapshots: Mutex::new(Vec::new()),
                tx,
            }
        }

        fn set_tools(&self, tools: Value) {
            *self.snapshots.lock().unwrap() = vec![BackendSnapshot {
                name: "b1".to_string(),
                status: BackendStatus::Connected,
                disabled: false,
                prefix: None,
                identity: None,
                capabilities: CapabilityLists {
                    tools,
                    ..Default::default()
                },
            }];
        }
    }

    #[async_trait]
    impl BackendHost for MutableHost {
        fn snapshots(&self) -> Vec<BackendSnapshot> {
            self.snapshots.lock().unwrap().clone()
        }

        fn events(&self) -> broadcast::Receiver<BackendEvent> {
            self.tx.subscribe()
        }

        async fn raw_request(
            &self,
            _backend: &str,
            _request: JsonRpcRequest,
            _timeout: Duration,
        ) -> Result<Value, CrossbarError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_capability_event_resyncs_and_notifies() {
        let host = Arc::new(MutableHost::new());
        let registries = Arc::new(RegistrySet::new());
        let sessions = Arc::new(SessionTable::new());
        let session = sessions.create(TransportKind::Sse);
        let mut rx = session.take_stream().expect("stream");

        let token = CancellationToken::new();
        let _task = Synchronizer::spawn(
            host.clone(),
            registries.clone(),
            sessions.clone(),
            Identity::hub(),
            token.clone(),
        );

        host.set_tools(json!([{"name": "search"}]));
        host.tx
            .send(BackendEvent::CapabilityChanged {
                backend: "b1".to_string(),
                kind: CapabilityKind::Tools,
            })
            .expect("subscriber exists");

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notified in time")
            .expect("stream open");
        assert!(message.contains("notifications/tools/list_changed"));
        assert_eq!(registries.size(CapabilityKind::Tools), 1);

        token.cancel();
    }

    #[tokio::test]
    async fn test_no_net_change_sends_no_notification() {
        let host = Arc::new(MutableHost::new());
        host.set_tools(json!([{"name": "search"}]));

        let registries = Arc::new(RegistrySet::new());
        // Pre-sync so the event below rebuilds into an identical key set.
        registries.sync(&host.snapshots(), &Identity::hub(), &CapabilityKind::ALL);

        let sessions = Arc::new(SessionTable::new());
        let session = sessions.create(TransportKind::Sse);
        let mut rx = session.take_stream().expect("stream");

        let token = CancellationToken::new();
        let _task = Synchronizer::spawn(
            host.clone(),
            registries.clone(),
            sessions.clone(),
            Identity::hub(),
            token.clone(),
        );

        host.tx
            .send(BackendEvent::CapabilityChanged {
                backend: "b1".to_string(),
                kind: CapabilityKind::Tools,
            })
            .expect("subscriber exists");

        let outcome = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(outcome.is_err(), "no notification expected without change");

        token.cancel();
    }

    #[tokio::test]
    async fn test_lifecycle_event_resyncs_all_kinds() {
        let host = Arc::new(MutableHost::new());
        let registries = Arc::new(RegistrySet::new());
        let sessions = Arc::new(SessionTable::new());

        let token = CancellationToken::new();
        let _task = Synchronizer::spawn(
            host.clone(),
            registries.clone(),
            sessions.clone(),
            Identity::hub(),
            token.clone(),
        );

        host.set_tools(json!([{"name": "late-arrival"}]));
        host.tx
            .send(BackendEvent::Lifecycle(HubLifecycleState::Restarted))
            .expect("subscriber exists");

        // No sessions to observe a notification; poll the registry.
        for _ in 0..20 {
            if registries.size(CapabilityKind::Tools) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(registries.size(CapabilityKind::Tools), 1);

        token.cancel();
    }
}
