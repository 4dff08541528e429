//! Routes channel events to per-conversation lanes.
//!
//! Every conversation key gets a lane: a task that applies that key's
//! events one at a time, in arrival order. Different keys run
//! concurrently. A lane that sees no events for a while closes itself; the
//! next event for that key opens a new lane, which first waits for the old
//! one to finish draining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event::{ConversationKey, InboundEvent};
use super::machine::StageMachine;
use super::store::{self, SessionStore};
use crate::channels::Channel;
use crate::error::Error;
use crate::notifier::{self, Notifier, Outbox};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bound on one operator delivery.
    pub notify_timeout: Duration,
    /// Sessions idle for longer than this are dropped.
    pub session_idle_timeout: Duration,
    /// How often idle sessions are pruned.
    pub prune_interval: Duration,
    /// A lane with no events for this long exits.
    pub lane_idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(10),
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            prune_interval: Duration::from_secs(60),         // 1 minute
            lane_idle_timeout: Duration::from_secs(300),     // 5 minutes
        }
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

/// Shared by every lane.
struct LaneContext {
    channel: Arc<dyn Channel>,
    machine: Arc<StageMachine>,
    store: Arc<SessionStore>,
    outbox: Outbox,
}

impl LaneContext {
    /// Apply one event: load, transition, persist, notify, render.
    async fn process(&self, event: InboundEvent) {
        let key = event.key;
        let session = self.store.take(&key).await.unwrap_or_default();
        let from = session.stage;

        let step = self.machine.handle(session, &event.kind, &event.caller);

        match step.rejection {
            Some(ref rejection) => {
                tracing::debug!(chat_id = %key, stage = %from, "Event rejected: {rejection}");
            }
            None => {
                tracing::debug!(chat_id = %key, from = %from, to = %step.stage, "Stage transition");
            }
        }

        if let Some(session) = step.session {
            self.store.put(key.clone(), session).await;
        }

        if let Some(request) = step.completed {
            tracing::info!(
                chat_id = %key,
                request_id = %request.id,
                user_id = %request.caller.user_id,
                category = %request.category,
                "Request completed"
            );
            self.outbox.submit(request);
        }

        for action in &step.replies {
            if let Err(e) = self.channel.render(&key, action).await {
                tracing::warn!(chat_id = %key, channel = self.channel.name(), "Render failed: {e}");
            }
        }
    }
}

async fn run_lane(
    ctx: Arc<LaneContext>,
    key: ConversationKey,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    previous: Option<JoinHandle<()>>,
    idle_timeout: Duration,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            tracing::error!(chat_id = %key, "Previous lane task failed: {e}");
        }
    }

    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => ctx.process(event).await,
            Ok(None) => break,
            Err(_) => {
                // Refuse new events, then finish the ones already queued.
                rx.close();
                while let Some(event) = rx.recv().await {
                    ctx.process(event).await;
                }
                tracing::debug!(chat_id = %key, "Lane idle, closed");
                break;
            }
        }
    }
}

/// Owns the channel stream and the conversation lanes.
pub struct Dispatcher {
    config: DispatcherConfig,
    channel: Arc<dyn Channel>,
    machine: Arc<StageMachine>,
    store: Arc<SessionStore>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        channel: Arc<dyn Channel>,
        machine: Arc<StageMachine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            channel,
            machine,
            store: Arc::new(SessionStore::new()),
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Run until the channel stream ends or Ctrl+C.
    ///
    /// On exit every queued event is still processed and every submitted
    /// request gets its delivery attempt before the channel shuts down.
    pub async fn run(self) -> Result<(), Error> {
        let mut events = self.channel.start().await?;

        let (outbox, outbox_handle) =
            notifier::spawn_outbox(Arc::clone(&self.notifier), self.config.notify_timeout);

        let prune_handle = store::spawn_prune_task(
            Arc::clone(&self.store),
            self.config.prune_interval,
            self.config.session_idle_timeout,
        );

        let ctx = Arc::new(LaneContext {
            channel: Arc::clone(&self.channel),
            machine: Arc::clone(&self.machine),
            store: Arc::clone(&self.store),
            outbox,
        });

        let mut lanes: HashMap<ConversationKey, Lane> = HashMap::new();
        let mut reap = tokio::time::interval(self.config.lane_idle_timeout);
        reap.tick().await; // Skip immediate first tick

        tracing::info!(channel = self.channel.name(), "Intake ready and listening");

        loop {
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(event) => self.dispatch(&ctx, &mut lanes, event),
                        None => {
                            tracing::info!("Channel stream ended, shutting down...");
                            break;
                        }
                    }
                }
                _ = reap.tick() => {
                    lanes.retain(|_, lane| !lane.handle.is_finished());
                }
            }
        }

        // Cleanup
        tracing::info!(active_lanes = lanes.len(), "Intake shutting down...");
        let handles: Vec<JoinHandle<()>> = lanes.into_values().map(|lane| lane.handle).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Lane task failed: {e}");
            }
        }
        prune_handle.abort();

        drop(ctx);
        if let Err(e) = outbox_handle.await {
            tracing::error!("Outbox task failed: {e}");
        }

        self.channel.shutdown().await?;
        Ok(())
    }

    fn dispatch(
        &self,
        ctx: &Arc<LaneContext>,
        lanes: &mut HashMap<ConversationKey, Lane>,
        event: InboundEvent,
    ) {
        let event = match lanes.get(&event.key) {
            Some(lane) => match lane.tx.send(event) {
                Ok(()) => return,
                // The lane closed on idle; hand the event to a successor.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let key = event.key.clone();
        let previous = lanes.remove(&key).map(|lane| lane.handle);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);

        let handle = tokio::spawn(run_lane(
            Arc::clone(ctx),
            key.clone(),
            rx,
            previous,
            self.config.lane_idle_timeout,
        ));
        lanes.insert(key, Lane { tx, handle });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::channels::EventStream;
    use crate::error::{ChannelError, NotifierError};
    use crate::intake::{Caller, Catalog, CompletedRequest, EventKind, Outbound, Stage};

    /// Replays a fixed list of events, optionally with a pause before each.
    struct ScriptedChannel {
        events: Mutex<Option<Vec<InboundEvent>>>,
        pause: Duration,
        rendered: Mutex<Vec<(ConversationKey, Outbound)>>,
    }

    impl ScriptedChannel {
        fn new(events: Vec<InboundEvent>, pause: Duration) -> Self {
            Self {
                events: Mutex::new(Some(events)),
                pause,
                rendered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            let events = self.events.lock().await.take().unwrap_or_default();
            let pause = self.pause;
            let stream = futures::stream::iter(events).then(move |event| async move {
                tokio::time::sleep(pause).await;
                event
            });
            Ok(Box::pin(stream))
        }

        async fn render(
            &self,
            key: &ConversationKey,
            action: &Outbound,
        ) -> Result<(), ChannelError> {
            self.rendered.lock().await.push((key.clone(), action.clone()));
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<CompletedRequest>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
            self.requests.lock().await.push(request.clone());
            Ok(())
        }
    }

    fn event(key: &str, kind: EventKind) -> InboundEvent {
        InboundEvent::new(ConversationKey::new(key), Caller::new(key), kind)
    }

    fn full_flow(key: &str) -> Vec<InboundEvent> {
        vec![
            event(key, EventKind::ConversationStarted),
            event(key, EventKind::CategorySelected("iPhone".into())),
            event(key, EventKind::ModelSelected("IPhone 16".into())),
            event(key, EventKind::ServiceSelected("Замена аккумулятора (оригинал)".into())),
            event(key, EventKind::ContactsSubmitted(format!("contact {key}"))),
        ]
    }

    async fn run(
        events: Vec<InboundEvent>,
        pause: Duration,
        config: DispatcherConfig,
    ) -> (Arc<ScriptedChannel>, Arc<Recorder>, Arc<SessionStore>) {
        let channel = Arc::new(ScriptedChannel::new(events, pause));
        let recorder = Arc::new(Recorder::default());
        let machine = Arc::new(StageMachine::new(Arc::new(Catalog::builtin())));
        let dispatcher = Dispatcher::new(config, channel.clone(), machine, recorder.clone());
        let store = Arc::clone(dispatcher.store());
        dispatcher.run().await.unwrap();
        (channel, recorder, store)
    }

    #[tokio::test]
    async fn completes_request_and_notifies_once() {
        let (channel, recorder, store) =
            run(full_flow("1"), Duration::ZERO, DispatcherConfig::default()).await;

        let requests = recorder.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].contacts, "contact 1");
        assert!(store.get(&ConversationKey::new("1")).await.is_none());
        assert!(!channel.rendered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn interleaved_keys_are_independent() {
        let mut a = full_flow("a").into_iter();
        let mut b = full_flow("b").into_iter();
        let mut events = Vec::new();
        loop {
            match (a.next(), b.next()) {
                (None, None) => break,
                (x, y) => events.extend(x.into_iter().chain(y)),
            }
        }

        let (_, recorder, _) = run(events, Duration::ZERO, DispatcherConfig::default()).await;

        let requests = recorder.requests.lock().await;
        assert_eq!(requests.len(), 2);
        let mut contacts: Vec<&str> = requests.iter().map(|r| r.contacts.as_str()).collect();
        contacts.sort();
        assert_eq!(contacts, vec!["contact a", "contact b"]);
    }

    #[tokio::test]
    async fn order_survives_lane_idle_restart() {
        // Lanes time out between every event, forcing successor lanes.
        let config = DispatcherConfig {
            lane_idle_timeout: Duration::from_millis(1),
            ..DispatcherConfig::default()
        };
        let (_, recorder, _) = run(full_flow("1"), Duration::from_millis(5), config).await;

        let requests = recorder.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].service.to_string(), "Замена аккумулятора (оригинал)");
    }

    #[tokio::test]
    async fn lane_runs_after_failed_predecessor() {
        let channel = Arc::new(ScriptedChannel::new(Vec::new(), Duration::ZERO));
        let (outbox, outbox_handle) =
            notifier::spawn_outbox(Arc::new(Recorder::default()), Duration::from_secs(1));
        let ctx = Arc::new(LaneContext {
            channel: channel.clone(),
            machine: Arc::new(StageMachine::new(Arc::new(Catalog::builtin()))),
            store: Arc::new(SessionStore::new()),
            outbox,
        });

        let previous = tokio::spawn(async { panic!("lane crashed") });
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(event("1", EventKind::ConversationStarted)).unwrap();
        drop(tx);

        let key = ConversationKey::new("1");
        run_lane(Arc::clone(&ctx), key.clone(), rx, Some(previous), Duration::from_secs(1)).await;

        let session = ctx.store.get(&key).await.unwrap();
        assert_eq!(session.stage, Stage::AwaitingCategory);
        assert!(!channel.rendered.lock().await.is_empty());

        drop(ctx);
        outbox_handle.await.unwrap();
    }

    #[tokio::test]
    async fn unfinished_conversation_stays_in_store() {
        let events = vec![
            event("1", EventKind::ConversationStarted),
            event("1", EventKind::CategorySelected("iPhone".into())),
        ];
        let (_, recorder, store) = run(events, Duration::ZERO, DispatcherConfig::default()).await;

        assert!(recorder.requests.lock().await.is_empty());
        let session = store.get(&ConversationKey::new("1")).await.unwrap();
        assert_eq!(session.stage, Stage::AwaitingModel);
    }
}
