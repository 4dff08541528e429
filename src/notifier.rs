//! Operator notification.
//!
//! Completed requests are handed to an [`Outbox`], which delivers them in
//! the background so a slow or failing operator channel never holds up a
//! conversation. Delivery failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::channels::BotApi;
use crate::error::NotifierError;
use crate::intake::CompletedRequest;
use crate::intake::prompts;

/// Delivers completed requests to the operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError>;
}

/// Accepts every request and delivers nothing.
///
/// Used when no operator chat is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn name(&self) -> &str {
        "noop"
    }

    async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
        tracing::debug!(request_id = %request.id, "No operator configured, request not forwarded");
        Ok(())
    }
}

/// Sends the request summary to an operator chat through the Bot API.
pub struct TelegramNotifier {
    api: BotApi,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(api: BotApi, chat_id: i64) -> Self {
        Self { api, chat_id }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
        self.api
            .send_text(&self.chat_id.to_string(), &prompts::operator_summary(request))
            .await
            .map_err(|e| NotifierError::Unavailable {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Retries a notifier with exponential backoff and jitter.
pub struct RetryingNotifier {
    inner: Arc<dyn Notifier>,
    max_attempts: u32,
    base_delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl RetryingNotifier {
    pub fn new(inner: Arc<dyn Notifier>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout: None,
        }
    }

    /// Bound each attempt, so one stuck call still leaves room for retries.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Longest time a bounded `notify` can take: every attempt timing out
    /// plus the largest possible backoff between them.
    ///
    /// `None` when attempts are unbounded.
    pub fn budget(&self) -> Option<Duration> {
        let per_attempt = self.attempt_timeout?;
        let backoff: Duration = (1..self.max_attempts)
            .map(|attempt| {
                self.base_delay
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .saturating_add(self.base_delay)
            })
            .sum();
        Some(
            per_attempt
                .saturating_mul(self.max_attempts)
                .saturating_add(backoff),
        )
    }

    async fn attempt(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
        let Some(limit) = self.attempt_timeout else {
            return self.inner.notify(request).await;
        };
        match tokio::time::timeout(limit, self.inner.notify(request)).await {
            Ok(result) => result,
            Err(_) => Err(NotifierError::Timeout {
                name: self.inner.name().to_string(),
                timeout: limit,
            }),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64);
        exp + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl Notifier for RetryingNotifier {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match self.attempt(request).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.id,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Operator notification failed: {e}"
                    );
                    last = e.to_string();
                }
            }
            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                tokio::time::sleep(delay).await;
            }
        }
        Err(NotifierError::Exhausted {
            name: self.name().to_string(),
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Handle for submitting completed requests for delivery.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<CompletedRequest>,
}

impl Outbox {
    /// Queue a request. Returns immediately.
    pub fn submit(&self, request: CompletedRequest) {
        let id = request.id;
        if self.tx.send(request).is_err() {
            tracing::error!(request_id = %id, "Outbox closed, request dropped");
        }
    }
}

/// Spawn the delivery worker.
///
/// Each delivery runs concurrently and is bounded by `timeout`. The worker
/// exits once every [`Outbox`] clone is dropped and in-flight deliveries
/// have finished.
pub fn spawn_outbox(notifier: Arc<dyn Notifier>, timeout: Duration) -> (Outbox, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<CompletedRequest>();

    let handle = tokio::spawn(async move {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(request) = received else { break };
                    let notifier = Arc::clone(&notifier);
                    in_flight.spawn(deliver(notifier, request, timeout));
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        tracing::debug!("Outbox drained");
    });

    (Outbox { tx }, handle)
}

async fn deliver(notifier: Arc<dyn Notifier>, request: CompletedRequest, timeout: Duration) {
    match tokio::time::timeout(timeout, notifier.notify(&request)).await {
        Ok(Ok(())) => {
            tracing::info!(
                request_id = %request.id,
                notifier = notifier.name(),
                category = %request.category,
                "Operator notified"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(request_id = %request.id, "Operator notification failed: {e}");
        }
        Err(_) => {
            let e = NotifierError::Timeout {
                name: notifier.name().to_string(),
                timeout,
            };
            tracing::warn!(request_id = %request.id, "Operator notification failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use secrecy::SecretString;
    use tokio::sync::Mutex;

    use super::*;
    use crate::intake::{Caller, Session, Slot, Stage};

    fn request() -> CompletedRequest {
        let session = Session {
            stage: Stage::Completed,
            category: Some("iPhone".into()),
            model: Some(Slot::Chosen("IPhone 16".into())),
            service: Some(Slot::Chosen("Диагностика".into())),
            contacts: Some("Ivan, +1000".into()),
        };
        CompletedRequest::from_session(&session, &Caller::new("77")).unwrap()
    }

    /// Fails the first `failures` calls, then records successes.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<CompletedRequest>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn notify(&self, request: &CompletedRequest) -> Result<(), NotifierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(NotifierError::Unavailable {
                    name: "flaky".into(),
                    reason: format!("call {call}"),
                });
            }
            self.delivered.lock().await.push(request.clone());
            Ok(())
        }
    }

    struct Hanging;

    #[async_trait]
    impl Notifier for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn notify(&self, _request: &CompletedRequest) -> Result<(), NotifierError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn noop_accepts_everything() {
        assert!(NoopNotifier.notify(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn retry_recovers_after_failures() {
        let flaky = Arc::new(Flaky::new(2));
        let retrying = RetryingNotifier::new(flaky.clone(), 3, Duration::from_millis(1));
        retrying.notify(&request()).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(flaky.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn retry_gives_up() {
        let flaky = Arc::new(Flaky::new(10));
        let retrying = RetryingNotifier::new(flaky.clone(), 2, Duration::from_millis(1));
        let err = retrying.notify(&request()).await.unwrap_err();
        assert!(matches!(err, NotifierError::Exhausted { attempts: 2, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    /// Hangs on the first call, succeeds afterwards.
    struct HangsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for HangsOnce {
        fn name(&self) -> &str {
            "hangs-once"
        }

        async fn notify(&self, _request: &CompletedRequest) -> Result<(), NotifierError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                futures::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stuck_attempt_times_out_and_retries() {
        let inner = Arc::new(HangsOnce {
            calls: AtomicU32::new(0),
        });
        let retrying = RetryingNotifier::new(inner.clone(), 3, Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_millis(20));
        let budget = retrying.budget().unwrap();

        tokio::time::timeout(budget, retrying.notify(&request()))
            .await
            .expect("retries should finish within the budget")
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn every_attempt_stuck_reports_timeout() {
        let retrying = RetryingNotifier::new(Arc::new(Hanging), 2, Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_millis(10));
        let err = retrying.notify(&request()).await.unwrap_err();
        match err {
            NotifierError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(last.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn budget_covers_attempts_and_backoff() {
        let retrying = RetryingNotifier::new(Arc::new(NoopNotifier), 3, Duration::from_millis(100));
        assert!(retrying.budget().is_none());

        let retrying = retrying.with_attempt_timeout(Duration::from_secs(1));
        // 3 attempts of 1 s, backoffs of at most 200 ms and 300 ms.
        assert_eq!(retrying.budget(), Some(Duration::from_millis(3500)));
    }

    #[tokio::test]
    async fn outbox_delivers_and_drains() {
        let flaky = Arc::new(Flaky::new(0));
        let (outbox, handle) = spawn_outbox(flaky.clone(), Duration::from_secs(1));
        let req = request();
        outbox.submit(req.clone());
        drop(outbox);
        handle.await.unwrap();

        let delivered = flaky.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, req.id);
    }

    #[tokio::test]
    async fn outbox_survives_failing_and_hanging_notifiers() {
        let (outbox, handle) = spawn_outbox(Arc::new(Hanging), Duration::from_millis(20));
        outbox.submit(request());
        outbox.submit(request());
        drop(outbox);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("outbox worker should finish after timeouts")
            .unwrap();

        let (outbox, handle) = spawn_outbox(Arc::new(Flaky::new(5)), Duration::from_secs(1));
        outbox.submit(request());
        drop(outbox);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn telegram_notifier_reports_unavailable() {
        let api = BotApi::new(SecretString::from("1:X".to_string()))
            .with_base_url("http://127.0.0.1:9");
        let notifier = TelegramNotifier::new(api, 42);
        let err = notifier.notify(&request()).await.unwrap_err();
        assert!(matches!(err, NotifierError::Unavailable { .. }));
    }
}
