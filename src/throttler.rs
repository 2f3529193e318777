//! Per-instance orchestration: key building, the two-tier window load,
//! admission, hooks, and persistence.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::action::ActionRecord;
use crate::cache::{expiry_after, CacheConfig, LocalCache};
use crate::error::{Result, ThrottlrError};
use crate::rules::RuleRegistry;
use crate::store::WindowStore;
use crate::window::{LimiterKind, Window, WindowKind};

/// Caller-supplied hook invoked with the decision of an admission check.
/// Returning `false` signals hook failure; it is logged and the decision
/// stands regardless.
pub type DecisionHook<T> = Arc<dyn Fn(&Decision<'_, T>) -> bool + Send + Sync>;

/// The outcome of one admission check.
///
/// `allowed` is computed once, at construction time, from the window with
/// the matched rule already applied. The window snapshot reflects the state
/// after the check, so `limit`/`remaining`/`reset` line up with what was
/// persisted.
pub struct Decision<'a, T> {
    subject: &'a T,
    key: String,
    window: Window,
    allowed: bool,
}

impl<'a, T> Decision<'a, T> {
    pub fn subject(&self) -> &'a T {
        self.subject
    }

    /// The namespace-qualified lookup key the check ran against.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Post-check window snapshot.
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn limit(&self) -> u64 {
        self.window.limit()
    }

    pub fn remaining(&self) -> i64 {
        self.window.remaining()
    }

    pub fn reset(&self) -> i64 {
        self.window.reset()
    }

    pub fn limiter_kind(&self) -> LimiterKind {
        self.window.limiter_kind
    }
}

/// Static configuration of one throttler instance.
pub struct ThrottlerConfig<T> {
    pub name: String,
    /// Prefix for built keys; empty disables prefixing.
    pub namespace: String,
    pub limiter_kind: LimiterKind,
    pub window_kind: WindowKind,
    /// Action count ceiling for rate limiting, byte ceiling for bandwidth
    /// limiting.
    pub maximum: u64,
    pub time_window: Duration,
    key_builder: Arc<dyn Fn(&T) -> String + Send + Sync>,
    on_allowed: Option<DecisionHook<T>>,
    on_throttled: Option<DecisionHook<T>>,
}

impl<T> ThrottlerConfig<T> {
    pub fn builder(name: impl Into<String>) -> ThrottlerConfigBuilder<T> {
        ThrottlerConfigBuilder::new(name)
    }

    /// Builds the lookup key for a subject: `namespace:` prefix when the
    /// namespace is non-empty, then `{name}` placeholder substitution.
    pub fn build_key(&self, subject: &T) -> String {
        let raw = (self.key_builder)(subject);
        let key = if self.namespace.is_empty() {
            raw
        } else {
            format!("{}:{}", self.namespace, raw)
        };
        key.replace("{name}", &self.name)
    }
}

/// Staged builder for [`ThrottlerConfig`]; `build` fails fast on invalid
/// configuration.
pub struct ThrottlerConfigBuilder<T> {
    name: String,
    namespace: Option<String>,
    limiter_kind: LimiterKind,
    window_kind: WindowKind,
    maximum: u64,
    time_window: Duration,
    key_builder: Option<Arc<dyn Fn(&T) -> String + Send + Sync>>,
    on_allowed: Option<DecisionHook<T>>,
    on_throttled: Option<DecisionHook<T>>,
}

impl<T> ThrottlerConfigBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            limiter_kind: LimiterKind::RateLimiter,
            window_kind: WindowKind::Sliding,
            maximum: 0,
            time_window: Duration::ZERO,
            key_builder: None,
            on_allowed: None,
            on_throttled: None,
        }
    }

    pub fn limiter_kind(mut self, limiter_kind: LimiterKind) -> Self {
        self.limiter_kind = limiter_kind;
        self
    }

    pub fn window_kind(mut self, window_kind: WindowKind) -> Self {
        self.window_kind = window_kind;
        self
    }

    pub fn maximum(mut self, maximum: u64) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    /// Key prefix; defaults to the throttler name.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Derives the per-subject part of the lookup key. Required.
    pub fn key_builder(
        mut self,
        key_builder: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_builder = Some(Arc::new(key_builder));
        self
    }

    /// Hook invoked when an action is admitted.
    pub fn on_allowed(
        mut self,
        hook: impl Fn(&Decision<'_, T>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_allowed = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when an action is refused.
    pub fn on_throttled(
        mut self,
        hook: impl Fn(&Decision<'_, T>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_throttled = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<ThrottlerConfig<T>> {
        let key_builder = self.key_builder.ok_or_else(|| {
            ThrottlrError::Configuration("a key builder function is required".into())
        })?;
        if self.maximum == 0 {
            return Err(ThrottlrError::Configuration(
                "maximum must be greater than zero".into(),
            ));
        }
        if self.time_window.is_zero() {
            return Err(ThrottlrError::Configuration(
                "time window must be greater than zero".into(),
            ));
        }

        Ok(ThrottlerConfig {
            namespace: self.namespace.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            limiter_kind: self.limiter_kind,
            window_kind: self.window_kind,
            maximum: self.maximum,
            time_window: self.time_window,
            key_builder,
            on_allowed: self.on_allowed,
            on_throttled: self.on_throttled,
        })
    }
}

/// One named throttler: decides admission for subjects of type `T` against
/// a shared remote store, degrading to a process-local cache when the store
/// is unreachable.
pub struct Throttler<T> {
    config: ThrottlerConfig<T>,
    store: Arc<dyn WindowStore>,
    cache: LocalCache,
    rules: Arc<RuleRegistry>,
}

impl<T> Throttler<T> {
    /// Creates a throttler using the process-wide shared rule registry.
    /// Must be called within a tokio runtime (the local cache spawns its
    /// sweeper task).
    pub fn new(
        config: ThrottlerConfig<T>,
        store: Arc<dyn WindowStore>,
        cache_config: CacheConfig,
    ) -> Self {
        Self::with_rules(config, store, cache_config, RuleRegistry::shared())
    }

    /// Creates a throttler with an explicitly injected rule registry.
    pub fn with_rules(
        config: ThrottlerConfig<T>,
        store: Arc<dyn WindowStore>,
        cache_config: CacheConfig,
        rules: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            cache: LocalCache::new(cache_config),
            config,
            store,
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn limiter_kind(&self) -> LimiterKind {
        self.config.limiter_kind
    }

    pub fn window_kind(&self) -> WindowKind {
        self.config.window_kind
    }

    pub fn config(&self) -> &ThrottlerConfig<T> {
        &self.config
    }

    /// Decides whether `action_bytes` more bytes of work (zero for pure
    /// rate limiting) are permitted for `subject`, using the hooks from the
    /// configuration.
    pub async fn decide<'a>(&self, subject: &'a T, action_bytes: u64) -> Result<Decision<'a, T>> {
        self.decide_inner(
            subject,
            action_bytes,
            self.config.on_allowed.clone(),
            self.config.on_throttled.clone(),
        )
        .await
    }

    /// Like [`Throttler::decide`], with caller-supplied hooks replacing the
    /// configured ones for this call.
    pub async fn decide_with_hooks<'a>(
        &self,
        subject: &'a T,
        action_bytes: u64,
        on_allowed: DecisionHook<T>,
        on_throttled: DecisionHook<T>,
    ) -> Result<Decision<'a, T>> {
        self.decide_inner(subject, action_bytes, Some(on_allowed), Some(on_throttled))
            .await
    }

    async fn decide_inner<'a>(
        &self,
        subject: &'a T,
        action_bytes: u64,
        on_allowed: Option<DecisionHook<T>>,
        on_throttled: Option<DecisionHook<T>>,
    ) -> Result<Decision<'a, T>> {
        let key = self.config.build_key(subject);
        let mut window = self.load_window(&key, None).await;

        let rule = self.rules.find_rule(&self.config.name, &key);
        let allowed = window.is_allowed(ActionRecord::with_bytes(action_bytes), rule.as_ref());
        debug!(key = %key, allowed, rule = rule.as_ref().map(|r| r.rule_name.as_str()), "admission check");

        let decision = Decision {
            subject,
            key: key.clone(),
            window: window.clone(),
            allowed,
        };

        let hook = if allowed { on_allowed } else { on_throttled };
        if let Some(hook) = hook {
            if !hook(&decision) {
                error!(key = %key, allowed, "decision hook reported failure");
            }
        }

        self.persist(&key, &window).await;

        Ok(decision)
    }

    /// Loads the current window for `subject` without running an admission
    /// check.
    pub async fn get_window(&self, subject: &T) -> Window {
        let key = self.config.build_key(subject);
        self.load_window(&key, None).await
    }

    /// Like [`Throttler::get_window`], but a newly created window is
    /// pre-seeded with the given records, in order.
    pub async fn get_window_seeded(&self, subject: &T, pre_seed: Vec<ActionRecord>) -> Window {
        let key = self.config.build_key(subject);
        self.load_window(&key, Some(pre_seed)).await
    }

    /// Builds a fresh window from the current configuration, optionally
    /// pre-seeded.
    pub fn create_window(&self, pre_seed: Option<Vec<ActionRecord>>) -> Window {
        let mut window = Window::new(
            self.config.name.clone(),
            self.config.limiter_kind,
            self.config.window_kind,
            self.config.maximum,
            self.config.time_window,
        );
        if let Some(records) = pre_seed {
            window.allowed_actions.clear();
            for record in records {
                window.allowed_actions.enqueue(record);
            }
        }
        window
    }

    /// Two-tier load: remote store, then local cache, then a fresh window.
    /// Store and decode failures are logged and degrade; they never
    /// propagate.
    async fn load_window(&self, key: &str, pre_seed: Option<Vec<ActionRecord>>) -> Window {
        let mut stored = None;
        let mut from_store = false;

        match self.store.get(key).await {
            Ok(Some(payload)) => match Window::decode(&payload) {
                Ok(window)
                    if window.matches_configuration(
                        &self.config.name,
                        self.config.maximum,
                        self.config.time_window,
                    ) =>
                {
                    stored = Some(window);
                    from_store = true;
                }
                Ok(_) => {
                    debug!(key = %key, "stored window no longer matches the running configuration; discarding");
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to decode stored window");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read window from the store");
            }
        }

        let window = match stored {
            Some(window) => window,
            None => match self.cache.get(key) {
                Some(cached) => {
                    warn!(key = %key, "degraded read: serving window from the local cache");
                    cached
                }
                None => self.create_window(pre_seed),
            },
        };

        // Refresh the local mirror for the next lookup.
        self.cache
            .insert(key, window.clone(), expiry_after(self.config.time_window));

        // Write-through anything the store did not already hold, so
        // concurrent readers observe it immediately.
        if !from_store {
            match window.encode() {
                Ok(payload) => {
                    if let Err(err) = self.store.put(key, &payload, self.config.time_window).await
                    {
                        debug!(key = %key, error = %err, "write-through of a new window failed");
                    }
                }
                Err(err) => warn!(key = %key, error = %err, "failed to encode window"),
            }
        }

        window
    }

    /// Persists the (mutated) window: remote store with TTL, falling back
    /// to the local cache on store errors. The local mirror is refreshed in
    /// every case.
    async fn persist(&self, key: &str, window: &Window) {
        let expires_at = expiry_after(self.config.time_window);

        match window.encode() {
            Ok(payload) => {
                if let Err(err) = self.store.put(key, &payload, self.config.time_window).await {
                    warn!(key = %key, error = %err, "failed to persist window to the store; falling back to the local cache");
                    self.cache.insert(key, window.clone(), expires_at);
                }
            }
            Err(err) => warn!(key = %key, error = %err, "failed to encode window"),
        }

        self.cache.insert(key, window.clone(), expires_at);
    }
}
