// MIT License - Copyright (c) 2026 Peter Wright
// Routing of decoded frames to waiting requests

//! Routes decoded frames to the requests waiting for them and to
//! persistent subscribers.
//!
//! Frames enter a bounded queue and are handled one at a time by a single
//! worker task, so handlers for one frame never run concurrently. A full
//! queue makes [`FrameSink::push`] wait, which in turn pauses the transport
//! reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ParadoxError, Result};
use crate::variants::{Message, MessageKind, NeutralPanel, Panel};

/// Decides whether a handler wants a frame.
pub type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Invoked for every frame a persistent handler matches.
pub type Callback = Box<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// Identifies a registered handler for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What happened to one dispatched frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub kind: MessageKind,
    /// A waiting request received the frame.
    pub resolved: bool,
    /// Persistent handlers that matched.
    pub notified: usize,
}

struct OneShot {
    id: HandlerId,
    predicate: Predicate,
    reply: oneshot::Sender<Message>,
}

struct Persistent {
    id: HandlerId,
    predicate: Predicate,
    callback: Arc<Callback>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    one_shots: Vec<OneShot>,
    persistent: Vec<Persistent>,
}

impl Registry {
    fn next(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }
}

/// Counters kept by the dispatch worker.
#[derive(Debug, Default)]
pub struct ManagerStats {
    pub dispatched: AtomicU64,
    pub rejected: AtomicU64,
    pub unhandled: AtomicU64,
}

struct Job {
    frame: Bytes,
    done: Option<oneshot::Sender<Result<Dispatched>>>,
}

/// Producer end of the frame queue, handed to the transport reader.
#[derive(Clone)]
pub struct FrameSink {
    queue: mpsc::Sender<Job>,
}

impl FrameSink {
    /// Queue a frame, waiting while the queue is at its high-water mark.
    pub async fn push(&self, frame: Bytes) -> Result<()> {
        self.queue
            .send(Job { frame, done: None })
            .await
            .map_err(|_| ParadoxError::ChannelClosed)
    }
}

/// A one-shot handler registered before its request was sent.
pub struct PendingReply {
    id: HandlerId,
    rx: oneshot::Receiver<Message>,
    registry: Arc<Mutex<Registry>>,
}

impl PendingReply {
    /// Wait for the matching frame; `what` names the request in the timeout error.
    pub async fn wait(self, limit: Duration, what: &str) -> Result<Message> {
        match timeout(limit, self.rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(ParadoxError::ChannelClosed),
            Err(_) => {
                self.registry.lock().await.one_shots.retain(|h| h.id != self.id);
                debug!("Timed out waiting for {}", what);
                Err(ParadoxError::Timeout { what: what.to_string() })
            }
        }
    }
}

/// Message manager: a handler registry and the worker that feeds it.
pub struct MessageManager {
    registry: Arc<Mutex<Registry>>,
    panel: Arc<RwLock<Arc<dyn Panel>>>,
    queue: mpsc::Sender<Job>,
    stats: Arc<ManagerStats>,
    worker: JoinHandle<()>,
}

impl MessageManager {
    /// Start the dispatch worker. `high_water` bounds the frame queue.
    pub fn new(high_water: usize) -> Self {
        let (tx, rx) = mpsc::channel(high_water.max(1));
        let registry = Arc::new(Mutex::new(Registry::default()));
        let panel: Arc<RwLock<Arc<dyn Panel>>> = Arc::new(RwLock::new(Arc::new(NeutralPanel::new())));
        let stats = Arc::new(ManagerStats::default());
        let worker = tokio::spawn(run_worker(rx, registry.clone(), panel.clone(), stats.clone()));
        Self {
            registry,
            panel,
            queue: tx,
            stats,
            worker,
        }
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink { queue: self.queue.clone() }
    }

    pub fn stats(&self) -> Arc<ManagerStats> {
        self.stats.clone()
    }

    /// Switch the variant used to decode frames.
    pub async fn set_parser(&self, panel: Arc<dyn Panel>) {
        *self.panel.write().await = panel;
    }

    pub async fn parser(&self) -> Arc<dyn Panel> {
        self.panel.read().await.clone()
    }

    /// Register a one-shot handler now; await [`PendingReply::wait`] later.
    pub async fn expect<F>(&self, predicate: F) -> PendingReply
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.registry.lock().await;
        let id = registry.next();
        registry.one_shots.push(OneShot {
            id,
            predicate: Box::new(predicate),
            reply: tx,
        });
        PendingReply {
            id,
            rx,
            registry: self.registry.clone(),
        }
    }

    /// Wait for the first frame matching `predicate`.
    pub async fn wait_for<F>(&self, predicate: F, limit: Duration) -> Result<Message>
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.expect(predicate).await.wait(limit, "message").await
    }

    pub async fn register_persistent<P, C>(&self, predicate: P, callback: C) -> HandlerId
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        C: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().await;
        let id = registry.next();
        registry.persistent.push(Persistent {
            id,
            predicate: Box::new(predicate),
            callback: Arc::new(Box::new(callback)),
        });
        id
    }

    /// Remove a handler of either kind. Returns whether it was registered.
    pub async fn unregister(&self, id: HandlerId) -> bool {
        let mut registry = self.registry.lock().await;
        let before = registry.one_shots.len() + registry.persistent.len();
        registry.one_shots.retain(|h| h.id != id);
        registry.persistent.retain(|h| h.id != id);
        before != registry.one_shots.len() + registry.persistent.len()
    }

    /// Drop every waiting one-shot; their waiters see `ChannelClosed`.
    pub async fn cancel_pending(&self) {
        let dropped = {
            let mut registry = self.registry.lock().await;
            std::mem::take(&mut registry.one_shots).len()
        };
        if dropped > 0 {
            debug!("Cancelled {} pending replies", dropped);
        }
    }

    /// Queue a frame and get a handle that completes once it was dispatched.
    pub async fn schedule_dispatch(&self, frame: Bytes) -> Result<oneshot::Receiver<Result<Dispatched>>> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(Job { frame, done: Some(tx) })
            .await
            .map_err(|_| ParadoxError::ChannelClosed)?;
        Ok(rx)
    }
}

impl Drop for MessageManager {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Job>,
    registry: Arc<Mutex<Registry>>,
    panel: Arc<RwLock<Arc<dyn Panel>>>,
    stats: Arc<ManagerStats>,
) {
    while let Some(job) = rx.recv().await {
        let parser = panel.read().await.clone();
        let outcome = match parser.parse_message(&job.frame) {
            Ok(msg) => Ok(dispatch(&registry, &msg, &stats).await),
            Err(e) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(frame = %hex::encode(&job.frame), error = %e, "Discarding undecodable frame");
                Err(ParadoxError::Frame(e))
            }
        };
        if let Some(done) = job.done {
            let _ = done.send(outcome);
        }
    }
    debug!("Dispatch worker stopped");
}

async fn dispatch(registry: &Mutex<Registry>, msg: &Message, stats: &ManagerStats) -> Dispatched {
    stats.dispatched.fetch_add(1, Ordering::Relaxed);
    let (resolved, persistent) = {
        let mut registry = registry.lock().await;
        registry.one_shots.retain(|h| !h.reply.is_closed());

        let mut resolved = false;
        while let Some(pos) = registry.one_shots.iter().position(|h| (h.predicate)(msg)) {
            let handler = registry.one_shots.remove(pos);
            if handler.reply.send(msg.clone()).is_ok() {
                resolved = true;
                break;
            }
        }

        let persistent: Vec<(HandlerId, Arc<Callback>)> = registry
            .persistent
            .iter()
            .filter(|h| (h.predicate)(msg))
            .map(|h| (h.id, h.callback.clone()))
            .collect();
        (resolved, persistent)
    };

    for (id, callback) in &persistent {
        if let Err(e) = callback(msg) {
            warn!(handler = id.0, kind = %msg.kind, error = %e, "Persistent handler failed");
        }
    }

    if !resolved && persistent.is_empty() {
        stats.unhandled.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %msg.kind, frame = %hex::encode(&msg.raw), "No handler for frame");
    }
    Dispatched {
        kind: msg.kind,
        resolved,
        notified: persistent.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // ErrorMessage "panel not connected", decodable by the neutral parser.
    fn error_frame() -> Bytes {
        Bytes::from_static(&[0x70, 0x04, 0x10, 0x84])
    }

    fn is_error(msg: &Message) -> bool {
        msg.kind == MessageKind::ErrorMessage
    }

    async fn dispatch_one(manager: &MessageManager, frame: Bytes) -> Result<Dispatched> {
        manager.schedule_dispatch(frame).await.unwrap().await.unwrap()
    }

    #[tokio::test]
    async fn test_one_shot_resolves_first_registered_only() {
        let manager = MessageManager::new(8);
        let first = manager.expect(is_error).await;
        let second = manager.expect(is_error).await;

        let outcome = dispatch_one(&manager, error_frame()).await.unwrap();
        assert!(outcome.resolved);
        assert!(first.wait(Duration::from_millis(100), "first").await.is_ok());

        let outcome = dispatch_one(&manager, error_frame()).await.unwrap();
        assert!(outcome.resolved);
        assert!(second.wait(Duration::from_millis(100), "second").await.is_ok());
    }

    #[tokio::test]
    async fn test_persistent_handlers_all_notified_and_survive_errors() {
        let manager = MessageManager::new(8);
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        manager
            .register_persistent(is_error, move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
                Err(ParadoxError::Disconnected)
            })
            .await;
        let c2 = count.clone();
        let id = manager
            .register_persistent(is_error, move |_| {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        let outcome = dispatch_one(&manager, error_frame()).await.unwrap();
        assert_eq!(outcome.notified, 2);
        assert!(!outcome.resolved);

        assert!(manager.unregister(id).await);
        dispatch_one(&manager, error_frame()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out_and_is_removed() {
        let manager = MessageManager::new(8);
        let err = manager.wait_for(is_error, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ParadoxError::Timeout { .. }));
        let outcome = dispatch_one(&manager, error_frame()).await.unwrap();
        assert!(!outcome.resolved);
        assert_eq!(manager.stats().unhandled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let manager = MessageManager::new(8);
        drop(manager.expect(is_error).await);
        let live = manager.expect(is_error).await;
        assert!(dispatch_one(&manager, error_frame()).await.unwrap().resolved);
        assert!(live.wait(Duration::from_millis(100), "live").await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_frames_are_rejected() {
        let manager = MessageManager::new(8);
        let outcome = dispatch_one(&manager, Bytes::from_static(&[0x70, 0x04, 0x10, 0x85])).await;
        assert!(matches!(outcome, Err(ParadoxError::Frame(_))));
        assert_eq!(manager.stats().rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_closes_waiters() {
        let manager = MessageManager::new(8);
        let pending = manager.expect(is_error).await;
        manager.cancel_pending().await;
        assert!(matches!(
            pending.wait(Duration::from_secs(1), "cancelled").await,
            Err(ParadoxError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_frames_dispatch_in_arrival_order() {
        let manager = MessageManager::new(4);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        manager
            .register_persistent(|_| true, move |msg| {
                s.lock().unwrap().push(msg.raw.clone());
                Ok(())
            })
            .await;
        let sink = manager.sink();
        let other = Bytes::from_static(&[0x70, 0x04, 0x05, 0x79]);
        sink.push(error_frame()).await.unwrap();
        sink.push(other.clone()).await.unwrap();
        dispatch_one(&manager, error_frame()).await.unwrap();
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![error_frame(), other, error_frame()]);
    }
}
