// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Json;
use reqwest::Client;

use crate::config::apps::{AppCredential, RegisteredApps};
use crate::config::settings::AuthorityConfig;
use crate::coordination::coordinator::{CoordinatorSettings, TokenCoordinator};
use crate::error::{StoreError, StoreResult, TokenError};
use crate::resilience::retry::RetrySettings;
use crate::sources::fetch::{AuthoritySource, FetchToken};
use crate::store::memory_store::MemoryStore;
use crate::store::{SharedStore, Subscription};

pub const APP_ID: &str = "wx1";
pub const APP_SECRET: &str = "s1";
pub const APP_KEY: &str = "wx1-s1";

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

/// Fake token authority. The n-th request answers `T<n>`, or an
/// `errcode` body while n <= `failures`. Every request is counted.
pub struct MockAuthority {
    pub url: String,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockAuthority {
    pub async fn issuing(delay: Duration) -> Self {
        Self::start(delay, 0).await
    }

    pub async fn failing(delay: Duration) -> Self {
        Self::start(delay, usize::MAX).await
    }

    pub async fn start(delay: Duration, failures: usize) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/cgi-bin/token",
            get(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(delay).await;
                    if n <= failures {
                        Json(json!({"errcode": 40013, "errmsg": "invalid appid"}))
                    } else {
                        Json(json!({"access_token": format!("T{}", n), "expires_in": 7200}))
                    }
                }
            }),
        );
        let (handle, addr) = spawn_axum(router).await;
        Self {
            url: format!("http://{}/cgi-bin/token", addr),
            hits,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockAuthority {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Small delays so failing waves finish quickly.
pub fn settings(attempts: u32, token_ttl_seconds: u64, refresh_ahead_seconds: u64) -> CoordinatorSettings {
    CoordinatorSettings {
        retry: RetrySettings { attempts, base_delay_ms: 10, max_delay_ms: 20 },
        lock_lease_seconds: 5,
        token_ttl_seconds,
        refresh_ahead_seconds,
        request_timeout: Duration::from_secs(2),
    }
}

pub fn registry() -> RegisteredApps {
    RegisteredApps::new(vec![AppCredential::new(APP_ID, APP_SECRET)])
}

pub async fn coordinator<S: SharedStore>(
    store: S,
    authority: &MockAuthority,
    settings: CoordinatorSettings,
) -> Arc<TokenCoordinator<S>> {
    let source = AuthoritySource::new(&AuthorityConfig {
        url: authority.url.clone(),
        request_timeout_ms: settings.request_timeout.as_millis() as u64,
    })
    .unwrap();
    TokenCoordinator::start(settings, registry(), store, source).await.unwrap()
}

/// In-process authority: the n-th call answers `F<n>`, or fails while
/// n <= `failures`.
#[derive(Clone)]
pub struct CountingFetcher {
    calls: Arc<AtomicUsize>,
    failures: usize,
    delay: Duration,
}

impl CountingFetcher {
    pub fn new(delay: Duration, failures: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failures,
            delay,
        }
    }

    pub fn failing() -> Self {
        Self::new(Duration::ZERO, usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FetchToken for CountingFetcher {
    async fn fetch_token(&self, _app: &AppCredential) -> Result<String, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if n <= self.failures {
            Err(TokenError::FetchFailed("authority unavailable".to_owned()))
        } else {
            Ok(format!("F{}", n))
        }
    }
}

/// Clones of `fetcher` share one call counter.
pub async fn counting_coordinator<S: SharedStore>(
    store: S,
    fetcher: &CountingFetcher,
    settings: CoordinatorSettings,
) -> Arc<TokenCoordinator<S, CountingFetcher>> {
    TokenCoordinator::start(settings, registry(), store, fetcher.clone()).await.unwrap()
}

/// Memory store that counts key-value calls and can be switched off.
#[derive(Clone, Default)]
pub struct TestStore {
    inner: MemoryStore,
    kv_calls: Arc<AtomicUsize>,
    down: Arc<AtomicBool>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kv_calls(&self) -> usize {
        self.kv_calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        self.kv_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl SharedStore for TestStore {
    async fn set_nx_ex(&self, key: &str, value: &str, seconds: u64) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_nx_ex(key, value, seconds).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.set_ex(key, seconds, value).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.del(key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: Vec<String>) -> StoreResult<Subscription> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.subscribe(channels).await
    }
}
