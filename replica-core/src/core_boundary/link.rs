/*
    link.rs - Simulated boundary between a host and a remote context

    The host side is an actor owning the real DeltaSource (usually a
    DeltaPublisher). The remote side holds a LinkHandle, which implements the
    same DeltaSource trait, so a Reconciler cannot tell whether it talks to the
    publisher directly or across the link.

    Everything crossing the link is JSON:
    - commands are answered with encoded snapshots or plain acknowledgements
    - publications travel as frames { callback_id, bytes } through a
      fault injector that may drop or reorder them

    Architecture:

        Reconciler ──► LinkHandle ──commands──► LinkHost ──► DeltaPublisher
            ▲                                       │
            └── dispatcher ◄──frames (faulty)── proxy callbacks

    Shutting the host down tears down every subscription it made on behalf of
    the remote side.
*/

use super::faults::{FaultInjector, FaultStats};
use super::retention::RefId;
use crate::core_sync::delta::{Payload, Snapshot, VersionInfo};
use crate::core_sync::errors::{SyncError, SyncResult};
use crate::core_sync::map_array::{EntryKey, EntryValue};
use crate::core_sync::source::{DeltaCallback, DeltaSource, Teardown};
use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Keys that can cross the link
pub trait WireKey: EntryKey + Serialize + DeserializeOwned {}
impl<T: EntryKey + Serialize + DeserializeOwned> WireKey for T {}

/// Values that can cross the link
pub trait WireValue: EntryValue + Serialize + DeserializeOwned {}
impl<T: EntryValue + Serialize + DeserializeOwned> WireValue for T {}

/// Fault injection settings for a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Probability of dropping a publication frame
    pub drop_rate: f64,

    /// Probability of holding a frame back behind the next one
    pub reorder_rate: f64,

    /// RNG seed; unseeded links are not reproducible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig { drop_rate: 0.0, reorder_rate: 0.0, seed: None }
    }
}

/// One encoded publication addressed to a remote callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub callback_id: RefId,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>"
))]
struct WireMessage<K, V> {
    version: u64,
    payload: Payload<K, V>,
}

/// Encode a publication as a frame body
pub fn encode_publication<K: Serialize, V: Serialize>(
    payload: Payload<K, V>,
    info: VersionInfo,
) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(&WireMessage { version: info.version, payload })
        .map_err(|e| SyncError::Encoding(e.to_string()))
}

/// Decode a frame body back into a publication
pub fn decode_publication<K: WireKey, V: WireValue>(bytes: &[u8]) -> SyncResult<(Payload<K, V>, VersionInfo)> {
    let message: WireMessage<K, V> =
        serde_json::from_slice(bytes).map_err(|e| SyncError::Decoding(e.to_string()))?;
    Ok((message.payload, VersionInfo::new(message.version)))
}

/// Commands sent to the host actor
#[derive(Debug)]
pub enum LinkCommand {
    /// Fetch the encoded current snapshot
    GetCurrent { response_tx: oneshot::Sender<SyncResult<Vec<u8>>> },
    /// Subscribe a proxy for the remote callback `callback_id`
    Subscribe { callback_id: RefId, response_tx: oneshot::Sender<SyncResult<VersionInfo>> },
    /// Tear down the proxy for `callback_id`
    Unsubscribe { callback_id: RefId, response_tx: oneshot::Sender<SyncResult<()>> },
    /// Tear down everything and stop
    Shutdown { response_tx: oneshot::Sender<()> },
}

type Faults = Arc<Mutex<FaultInjector<Frame>>>;
type Registry<K, V> = Arc<Mutex<HashMap<RefId, DeltaCallback<K, V>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct LinkHost<K, V> {
    source: Arc<dyn DeltaSource<K, V>>,
    command_rx: mpsc::Receiver<LinkCommand>,
    frame_tx: mpsc::UnboundedSender<Frame>,
    faults: Faults,
    subscriptions: HashMap<RefId, Teardown>,
}

impl<K: WireKey, V: WireValue> LinkHost<K, V> {
    async fn run(mut self) {
        while let Some(command) = self.command_rx.recv().await {
            match command {
                LinkCommand::GetCurrent { response_tx } => {
                    let result = match self.source.get_current().await {
                        Ok(snapshot) => {
                            serde_json::to_vec(&snapshot).map_err(|e| SyncError::Encoding(e.to_string()))
                        }
                        Err(err) => Err(err),
                    };
                    let _ = response_tx.send(result);
                }
                LinkCommand::Subscribe { callback_id, response_tx } => {
                    let result = self.subscribe(callback_id).await;
                    let _ = response_tx.send(result);
                }
                LinkCommand::Unsubscribe { callback_id, response_tx } => {
                    let result = match self.subscriptions.remove(&callback_id) {
                        Some(teardown) => teardown.run().await,
                        None => Ok(()),
                    };
                    debug!(callback_id = %callback_id, "link subscription removed");
                    let _ = response_tx.send(result);
                }
                LinkCommand::Shutdown { response_tx } => {
                    self.teardown_all().await;
                    let _ = response_tx.send(());
                    break;
                }
            }
        }

        self.teardown_all().await;
        info!("link host stopped");
    }

    async fn subscribe(&mut self, callback_id: RefId) -> SyncResult<VersionInfo> {
        if self.subscriptions.contains_key(&callback_id) {
            return Err(SyncError::SubscriptionSetup(format!("callback {} already subscribed", callback_id)));
        }

        let (teardown, info) = self.source.subscribe(self.proxy(callback_id)).await?;
        self.subscriptions.insert(callback_id, teardown);
        debug!(callback_id = %callback_id, version = info.version, "link subscription added");
        Ok(info)
    }

    /// Host-side stand-in for a remote callback; encodes and ships frames
    fn proxy(&self, callback_id: RefId) -> DeltaCallback<K, V> {
        let frame_tx = self.frame_tx.clone();
        let faults = self.faults.clone();

        DeltaCallback::with_id(callback_id, move |payload, info| {
            let bytes = match encode_publication(payload, info) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(callback_id = %callback_id, version = info.version, error = %err, "frame encoding failed");
                    return;
                }
            };
            counter!("replica.link.frames_sent").increment(1);

            let deliver = {
                let mut faults = lock(&faults);
                let before = faults.stats();
                let deliver = faults.admit(Frame { callback_id, bytes });
                let after = faults.stats();
                if after.dropped > before.dropped {
                    counter!("replica.link.frames_dropped").increment(1);
                    trace!(version = info.version, "frame dropped");
                }
                if after.reordered > before.reordered {
                    counter!("replica.link.frames_reordered").increment(1);
                    trace!(version = info.version, "frame held back");
                }
                deliver
            };

            for frame in deliver {
                if frame_tx.send(frame).is_err() {
                    trace!(callback_id = %callback_id, "remote dispatcher gone");
                }
            }
        })
    }

    async fn teardown_all(&mut self) {
        for (callback_id, teardown) in self.subscriptions.drain() {
            if let Err(err) = teardown.run().await {
                warn!(callback_id = %callback_id, error = %err, "link teardown failed");
            }
        }
    }
}

async fn dispatch<K: WireKey, V: WireValue>(mut frame_rx: mpsc::UnboundedReceiver<Frame>, registry: Registry<K, V>) {
    while let Some(frame) = frame_rx.recv().await {
        let Some(callback) = lock(&registry).get(&frame.callback_id).cloned() else {
            trace!(callback_id = %frame.callback_id, "frame for unknown callback");
            continue;
        };

        match decode_publication::<K, V>(&frame.bytes) {
            Ok((payload, info)) => callback.call(payload, info),
            Err(err) => {
                counter!("replica.link.frames_undecodable").increment(1);
                warn!(callback_id = %frame.callback_id, error = %err, "dropping undecodable frame");
            }
        }
    }
    trace!("link dispatcher stopped");
}

async fn request<T>(
    command_tx: &mpsc::Sender<LinkCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> LinkCommand,
) -> SyncResult<T> {
    let (response_tx, response_rx) = oneshot::channel();

    command_tx
        .send(build(response_tx))
        .await
        .map_err(|e| SyncError::LinkClosed(format!("Failed to send link command: {}", e)))?;

    response_rx
        .await
        .map_err(|e| SyncError::LinkClosed(format!("Link response channel closed: {}", e)))
}

/// Remote-side proxy of a host DeltaSource
pub struct LinkHandle<K, V> {
    id: RefId,
    command_tx: mpsc::Sender<LinkCommand>,
    registry: Registry<K, V>,
    faults: Faults,
}

/// Spawn the host actor and remote dispatcher for `source`
pub fn spawn_link<K, V, S>(source: Arc<S>, config: &LinkConfig) -> LinkHandle<K, V>
where
    K: WireKey,
    V: WireValue,
    S: DeltaSource<K, V> + 'static,
{
    let source: Arc<dyn DeltaSource<K, V>> = source;
    let (command_tx, command_rx) = mpsc::channel(100);
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let faults: Faults = Arc::new(Mutex::new(FaultInjector::new(config.drop_rate, config.reorder_rate, config.seed)));
    let registry: Registry<K, V> = Arc::new(Mutex::new(HashMap::new()));

    let host = LinkHost { source, command_rx, frame_tx, faults: faults.clone(), subscriptions: HashMap::new() };
    tokio::spawn(host.run());
    tokio::spawn(dispatch(frame_rx, registry.clone()));

    let id = RefId::generate();
    info!(
        link = %id,
        drop_rate = config.drop_rate,
        reorder_rate = config.reorder_rate,
        seed = ?config.seed,
        "link started"
    );

    LinkHandle { id, command_tx, registry, faults }
}

impl<K: WireKey, V: WireValue> LinkHandle<K, V> {
    /// Fault decisions taken on this link so far
    pub fn fault_stats(&self) -> FaultStats {
        lock(&self.faults).stats()
    }

    /// Callbacks currently registered on the remote side
    pub fn registered_callbacks(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Stop the host actor; later calls fail with `LinkClosed`
    pub async fn shutdown(&self) -> SyncResult<()> {
        request(&self.command_tx, |response_tx| LinkCommand::Shutdown { response_tx }).await?;
        lock(&self.registry).clear();
        if lock(&self.faults).flush().is_some() {
            trace!(link = %self.id, "discarded held frame on shutdown");
        }
        info!(link = %self.id, "link shut down");
        Ok(())
    }
}

#[async_trait]
impl<K: WireKey, V: WireValue> DeltaSource<K, V> for LinkHandle<K, V> {
    fn ref_id(&self) -> RefId {
        self.id
    }

    async fn subscribe(&self, callback: DeltaCallback<K, V>) -> SyncResult<(Teardown, VersionInfo)> {
        let callback_id = callback.id();
        lock(&self.registry).insert(callback_id, callback);

        let result = request(&self.command_tx, |response_tx| LinkCommand::Subscribe { callback_id, response_tx })
            .await
            .and_then(|result| result);
        let info = match result {
            Ok(info) => info,
            Err(err) => {
                lock(&self.registry).remove(&callback_id);
                return Err(err);
            }
        };

        let command_tx = self.command_tx.clone();
        let registry = self.registry.clone();
        let teardown = Teardown::new(async move {
            lock(&registry).remove(&callback_id);
            match request(&command_tx, |response_tx| LinkCommand::Unsubscribe { callback_id, response_tx }).await {
                Ok(result) => result,
                // A stopped host has already torn the subscription down.
                Err(SyncError::LinkClosed(_)) => {
                    debug!(callback_id = %callback_id, "link already closed at teardown");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        });

        Ok((teardown, info))
    }

    async fn get_current(&self) -> SyncResult<Snapshot<K, V>> {
        let bytes = request(&self.command_tx, |response_tx| LinkCommand::GetCurrent { response_tx }).await??;
        serde_json::from_slice(&bytes).map_err(|e| SyncError::Decoding(e.to_string()))
    }
}
