use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aegis_core::InternalEvent;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler = Arc<dyn Fn(InternalEvent) -> BoxFuture + Send + Sync>;

/// Single-process pub/sub for ingested chain events.
///
/// Handlers run sequentially in registration order for every event, so a
/// subscriber registered earlier (the state engine) always observes an event
/// before one registered later (the orchestrator / policy path) reads the
/// state it mutated. Publication order is preserved per publisher.
pub struct EventBus {
    tx: mpsc::UnboundedSender<InternalEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<InternalEvent>>>,
    handlers: Arc<RwLock<Vec<(String, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(Some(rx)), handlers: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Register a handler. Order of registration is dispatch order.
    pub async fn subscribe<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(InternalEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |ev| Box::pin(handler(ev)) as BoxFuture);
        self.handlers.write().await.push((name.to_string(), boxed));
    }

    pub fn publish(&self, event: InternalEvent) {
        if self.tx.send(event).is_err() {
            warn!("event bus dispatcher is gone; event dropped");
        }
    }

    /// Spawn the dispatcher. Call once, after the startup-order subscribers
    /// are registered.
    pub async fn start(&self, cancel: CancellationToken) {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("event bus started twice");
        let handlers = Arc::clone(&self.handlers);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("event bus dispatcher stopping");
                        break;
                    }
                    maybe = rx.recv() => {
                        let Some(event) = maybe else { break };
                        let snapshot = handlers.read().await.clone();
                        for (name, handler) in &snapshot {
                            debug!(subscriber = %name, variant = event.variant(), "dispatching event");
                            handler(event.clone()).await;
                        }
                    }
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::events::EventMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sell_event(id: &str) -> InternalEvent {
        InternalEvent::DevWalletSell {
            meta: EventMeta { id: id.into(), slot: 1, timestamp_ms: aegis_core::now_ms(), signature: String::new() },
            mint_address: "Mint".into(),
            dev_wallet: "Dev".into(),
            amount: "100".into(),
            percentage_of_holdings: 1.0,
        }
    }

    #[tokio::test]
    async fn dispatches_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let o1 = Arc::clone(&order);
        bus.subscribe("first", move |_| {
            let o = Arc::clone(&o1);
            async move { o.lock().await.push("first") }
        })
        .await;

        let o2 = Arc::clone(&order);
        bus.subscribe("second", move |_| {
            let o = Arc::clone(&o2);
            async move { o.lock().await.push("second") }
        })
        .await;

        bus.start(CancellationToken::new()).await;
        bus.publish(sell_event("a"));
        bus.publish(sell_event("b"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*order.lock().await, vec!["first", "second", "first", "second"]);
    }

    #[tokio::test]
    async fn all_published_events_are_seen() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        bus.subscribe("counter", move |_| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        bus.start(CancellationToken::new()).await;

        for i in 0..25 {
            bus.publish(sell_event(&format!("ev-{i}")));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 25);
    }
}
