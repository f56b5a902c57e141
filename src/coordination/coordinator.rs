//! Token coordinator
//!
//! Serves tokens from the shared store and, on a miss, runs a refresh
//! wave: take the cluster lock, fetch with bounded retries, store, announce
//! to sibling instances, release the lock and then every local waiter with
//! the same outcome. Instances that lose the lock are woken by
//! the announcement instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::token::TokenRecord;
use crate::cache::token_store::TokenStore;
use crate::config::apps::{AppCredential, RegisteredApps};
use crate::config::settings::{AuthorityConfig, CoordinatorConfig};
use crate::coordination::dispatcher::{Dispatcher, Outcome};
use crate::coordination::lock::DistributedLock;
use crate::coordination::notifier::{NotifyEvent, Notifier};
use crate::coordination::timers::PendingTimers;
use crate::error::TokenError;
use crate::helpers::time::get_instant;
use crate::observability::metrics::get_metrics;
use crate::resilience::retry::RetrySettings;
use crate::sources::fetch::{AuthoritySource, FetchToken};
use crate::store::SharedStore;

static HIT_MSG: &str = "hit";
static MISS_MSG: &str = "miss";
static REJECTED_MSG: &str = "rejected";
static ERROR_MSG: &str = "error";
static SUCCESS_MSG: &str = "success";

/// Pause between lock attempts while another instance holds it.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Runtime tuning derived from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub retry: RetrySettings,
    pub lock_lease_seconds: u64,
    /// stored lifetime: validity window minus safety margin
    pub token_ttl_seconds: u64,
    pub refresh_ahead_seconds: u64,
    pub request_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(coordinator: &CoordinatorConfig, authority: &AuthorityConfig) -> Self {
        Self {
            retry: RetrySettings::from(&coordinator.retry),
            lock_lease_seconds: coordinator.lock_lease_seconds.max(1),
            token_ttl_seconds: coordinator
                .token_ttl_seconds
                .saturating_sub(coordinator.safety_margin_seconds)
                .max(1),
            refresh_ahead_seconds: coordinator.refresh_ahead_seconds,
            request_timeout: Duration::from_millis(authority.request_timeout_ms),
        }
    }

    /// Longest a caller waits for a wave outcome: every attempt timing out
    /// plus back-off, plus one lease for a holder elsewhere that died.
    pub fn wait_timeout(&self) -> Duration {
        let per_attempt = self.request_timeout + Duration::from_millis(self.retry.max_delay_ms);
        per_attempt * self.retry.attempts + Duration::from_secs(self.lock_lease_seconds)
    }

    /// Delay until the proactive refresh for a token with `remaining` seconds.
    pub fn proactive_delay(&self, remaining: u64) -> Duration {
        Duration::from_secs(remaining.saturating_sub(self.refresh_ahead_seconds).max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// always fetch a new token
    Force,
    /// fetch only if the stored token is within the refresh-ahead window
    IfStale,
}

impl RefreshMode {
    fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Force => "force",
            RefreshMode::IfStale => "if_stale",
        }
    }
}

#[derive(Debug)]
enum WaveOutcome {
    Fetched(TokenRecord),
    /// another wave stored a good token before we got the lock
    Reused(TokenRecord),
    /// a holder elsewhere announced while we waited for the lock, or the
    /// lock stayed taken for a whole lease
    Deferred,
}

impl WaveOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            WaveOutcome::Fetched(_) => "fetched",
            WaveOutcome::Reused(_) => "reused",
            WaveOutcome::Deferred => "deferred",
        }
    }
}

#[derive(Debug)]
struct WaveFailure {
    attempts: u32,
    error: TokenError,
}

pub struct TokenCoordinator<S: SharedStore, F: FetchToken = AuthoritySource> {
    settings: CoordinatorSettings,
    registry: RegisteredApps,
    tokens: TokenStore<S>,
    lock: DistributedLock<S>,
    notifier: Notifier<S>,
    source: F,
    dispatchers: HashMap<String, Dispatcher>,
    timers: PendingTimers,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SharedStore, F: FetchToken> TokenCoordinator<S, F> {
    /// Builds the coordinator and opens the notification subscription for
    /// every registered app.
    pub async fn start(
        settings: CoordinatorSettings,
        registry: RegisteredApps,
        store: S,
        source: F,
    ) -> Result<Arc<Self>, TokenError> {
        let dispatchers = registry
            .keys()
            .map(|key| (key, Dispatcher::new()))
            .collect();

        let coordinator = Arc::new(Self {
            tokens: TokenStore::new(store.clone(), settings.token_ttl_seconds),
            lock: DistributedLock::new(store.clone()),
            notifier: Notifier::new(store),
            settings,
            registry,
            source,
            dispatchers,
            timers: PendingTimers::new(),
            listener: Mutex::new(None),
        });
        coordinator.listen().await?;
        info!(
            "token coordinator {} serving {} apps",
            coordinator.notifier.instance_id(),
            coordinator.registry.len()
        );
        Ok(coordinator)
    }

    pub fn instance_id(&self) -> &str {
        self.notifier.instance_id()
    }

    /// Cached token if fresh, otherwise waits for a refresh wave.
    pub async fn get_token(self: &Arc<Self>, app_key: &str) -> Outcome {
        let metrics = get_metrics().await;
        let (app, dispatcher) = match self.registered(app_key) {
            Ok(found) => found,
            Err(err) => {
                metrics.token_requests.with_label_values(&[REJECTED_MSG]).inc();
                return Err(err);
            }
        };

        match self.tokens.read(app_key).await {
            Ok(Some(record)) => {
                metrics.token_requests.with_label_values(&[HIT_MSG]).inc();
                return Ok(record);
            }
            Ok(None) => {
                metrics.token_requests.with_label_values(&[MISS_MSG]).inc();
                debug!("no fresh token for appid {}, waiting on refresh", app.appid);
            }
            Err(err) => {
                metrics.token_requests.with_label_values(&[ERROR_MSG]).inc();
                error!("token read failed for appid {}: {}", app.appid, err);
                return Err(err.into());
            }
        }

        let (waiter, start) = dispatcher.join(false);
        if start {
            self.spawn_wave(app_key, RefreshMode::IfStale);
        }
        self.wait(waiter).await
    }

    /// Forces a refresh wave without waiting for it. While a wave runs the
    /// forced one is queued behind it.
    pub fn refresh_token(self: &Arc<Self>, app_key: &str) -> Result<(), TokenError> {
        self.registered(app_key)?;
        self.start_wave(app_key, RefreshMode::Force);
        Ok(())
    }

    /// Forces a refresh wave and waits for its outcome.
    pub async fn refresh_and_wait(self: &Arc<Self>, app_key: &str) -> Outcome {
        let (_, dispatcher) = self.registered(app_key)?;
        let (waiter, start) = dispatcher.join(true);
        if start {
            self.spawn_wave(app_key, RefreshMode::Force);
        }
        self.wait(waiter).await
    }

    /// Stops the listener and timers and releases all waiters with `Closed`.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().unwrap_or_else(|p| p.into_inner()).take() {
            listener.abort();
        }
        self.timers.cancel_all();
        for dispatcher in self.dispatchers.values() {
            dispatcher.close(&TokenError::Closed);
        }
        info!("token coordinator {} stopped", self.instance_id());
    }

    fn registered(&self, app_key: &str) -> Result<(&AppCredential, &Dispatcher), TokenError> {
        match (self.registry.get(app_key), self.dispatchers.get(app_key)) {
            (Some(app), Some(dispatcher)) => Ok((app, dispatcher)),
            _ => Err(TokenError::Unregistered),
        }
    }

    async fn wait(&self, waiter: oneshot::Receiver<Outcome>) -> Outcome {
        let bound = self.settings.wait_timeout();
        match tokio::time::timeout(bound, waiter).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TokenError::Closed),
            Err(_) => Err(TokenError::WaitTimedOut {
                waited_ms: bound.as_millis() as u64,
            }),
        }
    }

    /// Starts a wave without a waiter, unless one is already running.
    fn start_wave(self: &Arc<Self>, app_key: &str, mode: RefreshMode) {
        let Some(dispatcher) = self.dispatchers.get(app_key) else {
            return;
        };
        if dispatcher.request(mode == RefreshMode::Force) {
            self.spawn_wave(app_key, mode);
        } else {
            debug!("refresh ({}) joins the running wave", mode.as_str());
        }
    }

    /// The dispatcher must already be marked in flight.
    fn spawn_wave(self: &Arc<Self>, app_key: &str, mode: RefreshMode) {
        let this = Arc::clone(self);
        let app_key = app_key.to_owned();
        tokio::spawn(async move {
            this.run_wave(&app_key, mode).await;
        });
    }

    /// One refresh wave: bounded attempts, one shared outcome.
    async fn run_wave(self: &Arc<Self>, app_key: &str, mode: RefreshMode) {
        let Ok((app, dispatcher)) = self.registered(app_key) else {
            return;
        };
        let metrics = get_metrics().await;
        debug!("refresh wave ({}) for appid {}", mode.as_str(), app.appid);

        match self.refresh_under_lock(app_key, app, dispatcher, mode).await {
            Ok(outcome) => {
                metrics
                    .refresh_waves
                    .with_label_values(&[app.appid.as_str(), outcome.as_str()])
                    .inc();
                match outcome {
                    WaveOutcome::Fetched(record) | WaveOutcome::Reused(record) => {
                        let released = dispatcher.publish(&record);
                        metrics
                            .waiters_released
                            .with_label_values(&[SUCCESS_MSG])
                            .inc_by(released as u64);
                        self.schedule_refresh(app_key, &record);
                    }
                    WaveOutcome::Deferred => {
                        debug!("appid {} is refreshed by another holder", app.appid);
                    }
                }
            }
            Err(WaveFailure { error: err, .. }) => {
                metrics
                    .refresh_waves
                    .with_label_values(&[app.appid.as_str(), "failed"])
                    .inc();
                error!("refresh wave for appid {} failed: {}", app.appid, err);
                let released = dispatcher.unpublish(&err);
                metrics
                    .waiters_released
                    .with_label_values(&[ERROR_MSG])
                    .inc_by(released as u64);
            }
        }

        if dispatcher.finish_wave() {
            debug!("starting forced refresh queued for appid {}", app.appid);
            self.spawn_wave(app_key, RefreshMode::Force);
        }
    }

    /// Holds the cluster lock for the whole wave, back-off included.
    /// Siblings are told the outcome before the lock is released, local
    /// waiters only after.
    async fn refresh_under_lock(
        &self,
        app_key: &str,
        app: &AppCredential,
        dispatcher: &Dispatcher,
        mode: RefreshMode,
    ) -> Result<WaveOutcome, WaveFailure> {
        if !self.await_lock(app_key, dispatcher).await {
            return Ok(WaveOutcome::Deferred);
        }
        let result = self.refresh_locked(app_key, app, mode).await;
        self.announce(app_key, &result).await;
        self.lock.release(app_key).await;
        result
    }

    async fn announce(&self, app_key: &str, result: &Result<WaveOutcome, WaveFailure>) {
        let event = match result {
            Ok(WaveOutcome::Fetched(record) | WaveOutcome::Reused(record)) => NotifyEvent::Refreshed {
                issued_at: record.issued_at,
            },
            Ok(WaveOutcome::Deferred) => return,
            Err(WaveFailure { attempts, error }) => NotifyEvent::Failed {
                attempts: *attempts,
                reason: match error {
                    TokenError::RetryExhausted { reason, .. } => reason.clone(),
                    other => other.to_string(),
                },
            },
        };
        self.notifier.announce(app_key, event).await;
    }

    /// Retries a taken lock until it is ours, until a holder elsewhere
    /// resolves our waiters, or until a marker left by a dead holder must
    /// have expired.
    async fn await_lock(&self, app_key: &str, dispatcher: &Dispatcher) -> bool {
        let generation = dispatcher.generation();
        let patience = Duration::from_secs(self.settings.lock_lease_seconds) + LOCK_RETRY_INTERVAL;
        let started = get_instant();

        loop {
            if self.lock.acquire(app_key, self.settings.lock_lease_seconds).await {
                return true;
            }
            if started.elapsed() >= patience {
                warn!("lock for {} stayed taken for a whole lease", app_key);
                return false;
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
            if dispatcher.generation() != generation {
                return false;
            }
        }
    }

    /// Runs while holding the cluster lock for `app_key`.
    async fn refresh_locked(
        &self,
        app_key: &str,
        app: &AppCredential,
        mode: RefreshMode,
    ) -> Result<WaveOutcome, WaveFailure> {
        if mode == RefreshMode::IfStale {
            match self.tokens.read(app_key).await {
                Ok(Some(record)) if record.remaining_seconds() > self.settings.refresh_ahead_seconds => {
                    return Ok(WaveOutcome::Reused(record));
                }
                Ok(_) => {}
                Err(err) => {
                    return Err(WaveFailure { attempts: 0, error: TokenError::from(err) });
                }
            }
        }

        let mut attempts_made = 0;
        let result = self
            .settings
            .retry
            .run_with_retry(|attempt| {
                attempts_made = attempt;
                self.fetch_and_store(app_key, app, attempt)
            })
            .await;

        result.map(WaveOutcome::Fetched).map_err(|error| WaveFailure {
            attempts: match &error {
                TokenError::RetryExhausted { attempts, .. } => *attempts,
                _ => attempts_made,
            },
            error,
        })
    }

    async fn fetch_and_store(
        &self,
        app_key: &str,
        app: &AppCredential,
        attempt: u32,
    ) -> Result<TokenRecord, TokenError> {
        if attempt > 1 {
            // back-off ate into the lease
            self.lock.renew(app_key, self.settings.lock_lease_seconds).await;
        }
        let metrics = get_metrics().await;

        let start = get_instant();
        let fetched = self.source.fetch_token(app).await;
        metrics
            .remote_fetch_duration
            .with_label_values(&[app.appid.as_str()])
            .observe(start.elapsed().as_secs_f64());
        let value = match fetched {
            Ok(value) => {
                metrics
                    .remote_fetches
                    .with_label_values(&[app.appid.as_str(), SUCCESS_MSG])
                    .inc();
                value
            }
            Err(err) => {
                metrics
                    .remote_fetches
                    .with_label_values(&[app.appid.as_str(), ERROR_MSG])
                    .inc();
                return Err(err);
            }
        };

        let record = self.tokens.write(app_key, &value).await?;
        info!(
            "appid {} token refreshed, valid for {} seconds",
            app.appid, record.ttl_seconds
        );
        Ok(record)
    }

    /// Replaces the proactive refresh timer for `app_key`.
    fn schedule_refresh(self: &Arc<Self>, app_key: &str, record: &TokenRecord) {
        let delay = self.settings.proactive_delay(record.remaining_seconds());
        let coordinator = Arc::downgrade(self);
        let key = app_key.to_owned();
        debug!("proactive refresh in {} seconds", delay.as_secs());
        self.timers.schedule(app_key, delay, async move {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.start_wave(&key, RefreshMode::IfStale);
            }
        });
    }

    async fn listen(self: &Arc<Self>) -> Result<(), TokenError> {
        let mut subscription = self.notifier.subscribe(self.registry.keys().collect()).await?;
        let coordinator = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.on_notification(&message.channel, &message.payload).await;
            }
            debug!("notification subscription closed");
        });
        *self.listener.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    async fn on_notification(self: &Arc<Self>, app_key: &str, payload: &str) {
        let Some(message) = Notifier::<S>::decode(payload) else {
            return;
        };
        if self.notifier.is_own(&message) {
            return;
        }
        let Ok((app, dispatcher)) = self.registered(app_key) else {
            warn!("notification on unknown channel ignored");
            return;
        };
        let metrics = get_metrics().await;

        match message.event {
            NotifyEvent::Refreshed { .. } => {
                metrics.notifier_messages.with_label_values(&["refreshed"]).inc();
                match self.tokens.read(app_key).await {
                    Ok(Some(record)) => {
                        let released = dispatcher.publish(&record);
                        debug!("appid {} refreshed elsewhere, {} waiters released", app.appid, released);
                        metrics
                            .waiters_released
                            .with_label_values(&[SUCCESS_MSG])
                            .inc_by(released as u64);
                        self.schedule_refresh(app_key, &record);
                    }
                    Ok(None) => {
                        warn!("announced token for appid {} is not in the store", app.appid);
                        if dispatcher.pending() > 0 {
                            self.start_wave(app_key, RefreshMode::IfStale);
                        }
                    }
                    Err(err) => {
                        error!("token read after notification failed: {}", err);
                        dispatcher.unpublish(&TokenError::from(err));
                    }
                }
            }
            NotifyEvent::Failed { attempts, reason } => {
                metrics.notifier_messages.with_label_values(&["failed"]).inc();
                warn!("appid {} refresh failed elsewhere: {}", app.appid, reason);
                let released = dispatcher.unpublish(&TokenError::RetryExhausted { attempts, reason });
                metrics
                    .waiters_released
                    .with_label_values(&[ERROR_MSG])
                    .inc_by(released as u64);
            }
        }
    }
}
