//! In-memory traffic and security counters backed by the store.
//!
//! Reads are served from memory.  Durable writes go through a bounded job
//! queue drained by a fixed set of background workers, so the request path
//! never waits on SQLite.  Traffic deltas are folded into the single summary
//! row with additive updates; security events are appended one row each.
//!
//! Lifecycle: [`MetricsStore::hydrate`] at boot, [`MetricsStore::shutdown`]
//! before the pool closes.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::PersistConfig;
use crate::store::{security, traffic, Result};
use crate::telemetry::{EventLogFields, EventSink};
use crate::util::now_timestamp;

/// Summaries kept for the recent-activity view.
pub const RECENT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityEventKind {
    #[serde(rename = "RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "PROMPT_INJECTION")]
    PromptInjection,
    #[serde(rename = "SQLI")]
    SqlPattern,
    #[serde(rename = "BANNED_TOPIC")]
    BannedTopic,
    #[serde(rename = "SYSTEM_WARNING")]
    SystemWarning,
    #[serde(rename = "SYSTEM_ERROR")]
    SystemError,
}

impl SecurityEventKind {
    pub const ALL: [SecurityEventKind; 6] = [
        SecurityEventKind::RateLimit,
        SecurityEventKind::PromptInjection,
        SecurityEventKind::SqlPattern,
        SecurityEventKind::BannedTopic,
        SecurityEventKind::SystemWarning,
        SecurityEventKind::SystemError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::RateLimit => "RATE_LIMIT",
            SecurityEventKind::PromptInjection => "PROMPT_INJECTION",
            SecurityEventKind::SqlPattern => "SQLI",
            SecurityEventKind::BannedTopic => "BANNED_TOPIC",
            SecurityEventKind::SystemWarning => "SYSTEM_WARNING",
            SecurityEventKind::SystemError => "SYSTEM_ERROR",
        }
    }

    /// Kinds that count as a blocked request.
    pub fn is_block(self) -> bool {
        matches!(
            self,
            SecurityEventKind::RateLimit
                | SecurityEventKind::PromptInjection
                | SecurityEventKind::SqlPattern
                | SecurityEventKind::BannedTopic
        )
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SecurityEventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown security event kind: {}", s))
    }
}

#[derive(Debug, Clone)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub detail: String,
    pub client_key: Option<String>,
    pub created_at: String,
}

/// Work handed to the persistence workers.
#[derive(Debug)]
pub enum PersistJob {
    RecordEvent(SecurityEvent),
    /// Carries no data: the worker drains whatever deltas are pending when it
    /// runs, so a dropped flush job loses nothing.
    FlushTraffic,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrafficSnapshot {
    pub total_requests: u64,
    pub average_latency_ms: f64,
    pub uptime_seconds: i64,
    pub first_started_at: String,
}

#[derive(Debug, Default)]
struct TrafficState {
    total_requests: u64,
    total_latency_ms: f64,
    pending_requests: u64,
    pending_latency_ms: f64,
    since_flush: u64,
}

/// Bounded FIFO; when full the oldest job is discarded.
struct PersistQueue {
    jobs: Mutex<VecDeque<PersistJob>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl PersistQueue {
    fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, job: PersistJob) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(?job, "persistence queue closed; job discarded");
            return;
        }
        if let Ok(mut jobs) = self.jobs.lock() {
            if jobs.len() >= self.capacity {
                jobs.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(capacity = self.capacity, "persistence queue full; dropped oldest job");
            }
            jobs.push_back(job);
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<PersistJob> {
        self.jobs.lock().ok().and_then(|mut jobs| jobs.pop_front())
    }

    /// Next job, or `None` once closed and drained.
    async fn pop(&self) -> Option<PersistJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

struct Inner {
    pool: SqlitePool,
    sink: EventSink,
    flush_every: u64,
    first_started_at: DateTime<Utc>,
    traffic: Mutex<TrafficState>,
    event_counts: [AtomicU64; 6],
    recent: Mutex<VecDeque<String>>,
    queue: PersistQueue,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

/// Shared metrics service.  Cheap to clone.
#[derive(Clone)]
pub struct MetricsStore {
    inner: Arc<Inner>,
}

impl MetricsStore {
    /// Load durable counters, seed the traffic row on first boot, re-seed the
    /// recent log and start the background workers and flush timer.
    pub async fn hydrate(pool: SqlitePool, sink: EventSink, cfg: &PersistConfig) -> Result<Self> {
        let row = traffic::load_or_seed(&pool, &now_timestamp()).await?;
        let first_started_at = DateTime::parse_from_rfc3339(&row.first_started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, value = %row.first_started_at, "unparseable first_started_at; using now");
                Utc::now()
            });

        let event_counts: [AtomicU64; 6] = Default::default();
        for (event_type, count) in security::count_by_type(&pool).await? {
            match event_type.parse::<SecurityEventKind>() {
                Ok(kind) => event_counts[kind.index()].store(count.max(0) as u64, Ordering::Relaxed),
                Err(e) => tracing::warn!(error = %e, "ignoring persisted event kind"),
            }
        }

        let recent: VecDeque<String> = security::recent_events(&pool, RECENT_LOG_CAPACITY as i64)
            .await?
            .into_iter()
            .map(|row| {
                let time = DateTime::parse_from_rfc3339(&row.created_at)
                    .map(|dt| dt.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|_| "--:--:--".to_string());
                format!(
                    "[{}] [{}] {}",
                    time,
                    row.event_type,
                    row.detail.unwrap_or_default()
                )
            })
            .collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let store = Self {
            inner: Arc::new(Inner {
                pool,
                sink,
                flush_every: cfg.flush_every.max(1),
                first_started_at,
                traffic: Mutex::new(TrafficState {
                    total_requests: row.total_requests.max(0) as u64,
                    total_latency_ms: row.total_latency_ms,
                    ..TrafficState::default()
                }),
                event_counts,
                recent: Mutex::new(recent),
                queue: PersistQueue::new(cfg.queue_capacity),
                workers: Mutex::new(Vec::new()),
                stop_tx,
            }),
        };

        store.spawn_workers(cfg.workers.max(1));
        store.spawn_flush_timer(cfg.flush_interval, stop_rx);
        tracing::info!(
            total_requests = row.total_requests,
            first_started_at = %row.first_started_at,
            "metrics hydrated"
        );
        Ok(store)
    }

    fn spawn_workers(&self, count: usize) {
        let mut handles = Vec::with_capacity(count);
        for worker in 0..count {
            let store = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(job) = store.inner.queue.pop().await {
                    store.run_job(job).await;
                }
                tracing::debug!(worker, "persistence worker stopped");
            }));
        }
        if let Ok(mut workers) = self.inner.workers.lock() {
            workers.extend(handles);
        }
    }

    fn spawn_flush_timer(&self, period: std::time::Duration, mut stop_rx: watch::Receiver<bool>) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.inner.queue.push(PersistJob::FlushTraffic),
                    _ = stop_rx.changed() => break,
                }
            }
        });
    }

    async fn run_job(&self, job: PersistJob) {
        match job {
            PersistJob::RecordEvent(event) => {
                if let Err(e) = security::insert_event(
                    &self.inner.pool,
                    event.kind.as_str(),
                    &event.detail,
                    event.client_key.as_deref(),
                    &event.created_at,
                )
                .await
                {
                    tracing::warn!(error = %e, kind = %event.kind, "failed to persist security event");
                }
            }
            PersistJob::FlushTraffic => {
                if let Err(e) = self.flush_traffic().await {
                    tracing::warn!(error = %e, "failed to flush traffic counters");
                }
            }
        }
    }

    /// Count one finished request.  Every `flush_every` requests a flush job
    /// is queued.
    pub fn record_request(&self, latency_ms: f64) {
        let due = match self.inner.traffic.lock() {
            Ok(mut t) => {
                t.total_requests += 1;
                t.total_latency_ms += latency_ms;
                t.pending_requests += 1;
                t.pending_latency_ms += latency_ms;
                t.since_flush += 1;
                if t.since_flush >= self.inner.flush_every {
                    t.since_flush = 0;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if due {
            self.inner.queue.push(PersistJob::FlushTraffic);
        }
    }

    /// Move pending traffic deltas into the summary row.  On failure the
    /// deltas are put back for the next attempt.
    pub async fn flush_traffic(&self) -> Result<()> {
        let (requests, latency_ms) = self.take_pending();
        if requests == 0 && latency_ms == 0.0 {
            return Ok(());
        }
        if let Err(e) = traffic::add_deltas(&self.inner.pool, requests, latency_ms).await {
            self.restore_pending(requests, latency_ms);
            return Err(e);
        }
        tracing::debug!(requests, latency_ms, "traffic deltas flushed");
        Ok(())
    }

    fn take_pending(&self) -> (u64, f64) {
        match self.inner.traffic.lock() {
            Ok(mut t) => (
                std::mem::take(&mut t.pending_requests),
                std::mem::take(&mut t.pending_latency_ms),
            ),
            Err(_) => (0, 0.0),
        }
    }

    fn restore_pending(&self, requests: u64, latency_ms: f64) {
        if let Ok(mut t) = self.inner.traffic.lock() {
            t.pending_requests += requests;
            t.pending_latency_ms += latency_ms;
        }
    }

    /// Record a security event: counter and recent log update immediately,
    /// the durable row is written in the background.
    pub fn record_event(&self, kind: SecurityEventKind, detail: impl Into<String>, client_key: Option<&str>) {
        let detail = detail.into();
        self.inner.event_counts[kind.index()].fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        let line = format!("[{}] [{}] {}", now.format("%H:%M:%S"), kind, detail);
        if let Ok(mut recent) = self.inner.recent.lock() {
            recent.push_front(line);
            recent.truncate(RECENT_LOG_CAPACITY);
        }

        let created_at = now_timestamp();
        self.inner.sink.emit(
            &serde_json::json!({
                "timestamp": created_at,
                "kind": kind,
                "detail": detail,
                "client": client_key,
            }),
            &EventLogFields {
                kind: kind.as_str(),
                client: client_key,
                detail: &detail,
            },
        );
        tracing::debug!(kind = %kind, client = ?client_key, "security event recorded");

        self.inner.queue.push(PersistJob::RecordEvent(SecurityEvent {
            kind,
            detail,
            client_key: client_key.map(str::to_string),
            created_at,
        }));
    }

    pub fn security_count(&self, kind: SecurityEventKind) -> u64 {
        self.inner.event_counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Rate-limit, injection, SQL-pattern and banned-topic events combined.
    pub fn total_blocks(&self) -> u64 {
        SecurityEventKind::ALL
            .into_iter()
            .filter(|k| k.is_block())
            .map(|k| self.security_count(k))
            .sum()
    }

    /// Newest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        self.inner
            .recent
            .lock()
            .map(|recent| recent.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        let (total_requests, total_latency_ms) = self
            .inner
            .traffic
            .lock()
            .map(|t| (t.total_requests, t.total_latency_ms))
            .unwrap_or((0, 0.0));
        let average_latency_ms = if total_requests > 0 {
            (total_latency_ms / total_requests as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };
        TrafficSnapshot {
            total_requests,
            average_latency_ms,
            uptime_seconds: (Utc::now() - self.inner.first_started_at).num_seconds().max(0),
            first_started_at: self.inner.first_started_at.to_rfc3339(),
        }
    }

    pub fn total_latency_ms(&self) -> f64 {
        self.inner
            .traffic
            .lock()
            .map(|t| t.total_latency_ms)
            .unwrap_or(0.0)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn queue_dropped(&self) -> u64 {
        self.inner.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn sink(&self) -> &EventSink {
        &self.inner.sink
    }

    /// Stop the timer, drain queued jobs, join the workers, then flush any
    /// remaining traffic deltas.  Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.inner.stop_tx.send(true);
        if let Err(e) = self.flush_traffic().await {
            tracing::error!(error = %e, "traffic flush at shutdown failed");
        }
        self.inner.queue.close();
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .workers
            .lock()
            .map(|mut w| w.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "persistence worker ended abnormally");
            }
        }
        if let Err(e) = self.flush_traffic().await {
            tracing::error!(error = %e, "final traffic flush failed");
        }
        tracing::info!(dropped = self.queue_dropped(), "metrics shut down");
    }
}
