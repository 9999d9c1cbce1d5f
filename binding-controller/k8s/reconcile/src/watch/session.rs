use super::Mirror;
use crate::{Error, Result};
use binding_controller_k8s_api::{DynamicObject, Event, Watch};
use binding_controller_k8s_store::EventStream;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::oneshot, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};

/// How long a new watch may take to deliver its initial listing.
pub const SYNC_TIMEOUT: time::Duration = time::Duration::from_secs(60);

/// A running watch that mirrors one remote namespace.
///
/// Events observed before the initial listing completes are ignored: they
/// describe records that existed before the session started, and acting on
/// them could resurrect records deleted in the meantime.
#[derive(Debug)]
pub struct Session {
    token: CancellationToken,
    synced: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Session {
    /// Starts mirroring `events` and waits until the initial listing has
    /// been delivered, for at most [`SYNC_TIMEOUT`].
    pub async fn start<M: Mirror>(key: String, events: EventStream, mirror: M) -> Result<Self> {
        let token = CancellationToken::new();
        let synced = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let span = info_span!("watch", %key);
        let watch = Watch::from(events).instrument(span.clone());
        let task = tokio::spawn(
            run(watch, mirror, token.clone(), synced.clone(), ready_tx).instrument(span),
        );

        if !matches!(time::timeout(SYNC_TIMEOUT, ready_rx).await, Ok(Ok(()))) {
            token.cancel();
            return Err(Error::WatchSync(key));
        }
        debug!(%key, "Watch synced");
        Ok(Self {
            token,
            synced,
            task,
        })
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// True once the watch stopped, either cancelled or because its stream
    /// ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run<M: Mirror>(
    mut watch: Watch<DynamicObject>,
    mirror: M,
    token: CancellationToken,
    synced: Arc<AtomicBool>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        let event = tokio::select! {
            ev = watch.recv() => match ev {
                Some(ev) => ev,
                None => {
                    debug!("Watch ended");
                    return;
                }
            },
            _ = token.cancelled() => {
                debug!("Watch stopped");
                return;
            }
        };

        match event {
            Event::Init => {}
            Event::InitDone => {
                synced.store(true, Ordering::Release);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            Event::InitApply(obj) | Event::Apply(obj) => {
                if !synced.load(Ordering::Acquire) {
                    trace!(name = ?obj.metadata.name, "Ignoring event before sync");
                    continue;
                }
                let Some(obj) = decode::<M>(obj) else { continue };
                if let Err(error) = mirror.apply(obj).await {
                    warn!(%error, "Failed to mirror record");
                }
            }
            Event::Delete(obj) => {
                if !synced.load(Ordering::Acquire) {
                    trace!(name = ?obj.metadata.name, "Ignoring event before sync");
                    continue;
                }
                let Some(obj) = decode::<M>(obj) else { continue };
                if let Err(error) = mirror.delete(obj).await {
                    warn!(%error, "Failed to remove mirrored record");
                }
            }
        }
    }
}

fn decode<M: Mirror>(obj: DynamicObject) -> Option<M::Resource> {
    let name = obj.metadata.name.clone();
    match obj.try_parse::<M::Resource>() {
        Ok(obj) => Some(obj),
        Err(error) => {
            warn!(?name, %error, "Failed to decode record");
            None
        }
    }
}
