//! Compilation cache with single-flight coalescing.
//!
//! ## Guarantees
//!
//! - At most one compilation runs per fingerprint at a time; concurrent
//!   callers for the same fingerprint await the same shared future and get
//!   its result or its error
//! - [`CompilationCache::invalidate`] clears entries and bumps the
//!   generation under one write lock; a compilation started against an
//!   older generation may still return its result but never stores it
//! - Waiting is bounded by the caller's cancellation token
//! - A leader cancelled while no follower holds its flight unregisters it,
//!   so the next caller starts fresh
//!
//! ## Locking
//!
//! All state sits behind one `parking_lot::RwLock`. Methods on
//! `CacheState` named `*_locked` assume the guard is already held and never
//! lock. Public methods on [`CompilationCache`] lock exactly once and never
//! call another public method while holding the guard. No guard is held
//! across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::types::{CompileError, CompiledPrompt, Fingerprint};

type CompileOutput = Result<Arc<CompiledPrompt>, CompileError>;
type SharedCompile = Shared<BoxFuture<'static, CompileOutput>>;

/// Cache epoch. Bumped by every invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

struct InFlight {
    id: u64,
    future: SharedCompile,
}

enum Lookup {
    Hit(Arc<CompiledPrompt>),
    Join(SharedCompile),
    Lead(SharedCompile, u64),
    Stale,
}

struct CacheState {
    entries: LruCache<Fingerprint, Arc<CompiledPrompt>>,
    in_flight: HashMap<Fingerprint, InFlight>,
    generation: u64,
    next_flight_id: u64,
}

impl CacheState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            in_flight: HashMap::new(),
            generation: 0,
            next_flight_id: 0,
        }
    }

    fn lookup_locked(&self, key: &Fingerprint) -> Option<Arc<CompiledPrompt>> {
        self.entries.peek(key).cloned()
    }

    fn register_locked(&mut self, key: Fingerprint, future: SharedCompile) -> u64 {
        let id = self.next_flight_id;
        self.next_flight_id += 1;
        self.in_flight.insert(key, InFlight { id, future });
        id
    }

    /// Record a finished compilation. Stores the prompt only if it
    /// succeeded and the generation has not moved on.
    fn complete_locked(&mut self, key: &Fingerprint, id: u64, generation: u64, output: &CompileOutput) {
        if self.in_flight.get(key).is_some_and(|f| f.id == id) {
            self.in_flight.remove(key);
        }
        if generation != self.generation {
            tracing::debug!(key = %key, "Discarding compilation from a superseded generation");
            return;
        }
        if let Ok(prompt) = output {
            self.entries.put(key.clone(), Arc::clone(prompt));
        }
    }

    /// Forget a flight whose only caller gave up. A newer flight under the
    /// same key is left alone.
    fn abandon_locked(&mut self, key: &Fingerprint, id: u64) -> bool {
        if self.in_flight.get(key).is_some_and(|f| f.id == id) {
            self.in_flight.remove(key);
            return true;
        }
        false
    }

    fn invalidate_locked(&mut self) -> u64 {
        self.entries.clear();
        self.in_flight.clear();
        self.generation += 1;
        self.generation
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    compilations: AtomicU64,
    invalidations: AtomicU64,
    bypasses: AtomicU64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries.
    pub len: usize,
    /// Maximum capacity.
    pub cap: usize,
    /// Lookups answered from a stored entry.
    pub hits: u64,
    /// Lookups that started a new compilation.
    pub misses: u64,
    /// Lookups that joined an in-flight compilation.
    pub coalesced: u64,
    /// Times the compute path actually ran.
    pub compilations: u64,
    /// Number of invalidations.
    pub invalidations: u64,
    /// Compilations run outside the cache (disabled, stale, or fail-open).
    pub bypasses: u64,
    /// Compilations currently registered as in flight.
    pub in_flight: usize,
    /// Current generation.
    pub generation: u64,
}

/// Memoizes compiled prompts by fingerprint.
///
/// Thread-safe; share it behind an `Arc` or inside a
/// [`Compiler`](crate::Compiler).
pub struct CompilationCache {
    config: CacheConfig,
    state: Arc<RwLock<CacheState>>,
    counters: Arc<Counters>,
}

impl CompilationCache {
    /// Create a cache.
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            state: Arc::new(RwLock::new(CacheState::new(capacity))),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Whether memoization is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current generation. Capture it together with the data a
    /// compilation will read, and pass it to [`get_or_compile`](Self::get_or_compile).
    pub fn generation(&self) -> Generation {
        Generation(self.state.read().generation)
    }

    /// Look up a stored prompt.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<CompiledPrompt>> {
        self.state.read().lookup_locked(key)
    }

    /// Drop every entry and in-flight registration, and bump the generation.
    ///
    /// Callers already waiting on an in-flight compilation still receive its
    /// result; it is just not stored.
    pub fn invalidate(&self) -> Generation {
        let generation = self.state.write().invalidate_locked();
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(generation, "Compilation cache invalidated");
        Generation(generation)
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheStats {
        let (len, cap, in_flight, generation) = {
            let state = self.state.read();
            (state.entries.len(), state.entries.cap().get(), state.in_flight.len(), state.generation)
        };
        CacheStats {
            len,
            cap,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            compilations: self.counters.compilations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            in_flight,
            generation,
        }
    }

    /// Return the stored prompt for `key`, or compile it exactly once.
    ///
    /// Returns the prompt and whether it came from the cache or a coalesced
    /// in-flight compilation. `compute` receives the leading caller's
    /// cancellation token. If the leader is cancelled, followers retry with
    /// their own token. A panicking compute fails open: the prompt is
    /// recomputed once outside the cache.
    pub async fn get_or_compile<F, Fut>(
        &self,
        key: &Fingerprint,
        generation: Generation,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<(Arc<CompiledPrompt>, bool), CompileError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompileOutput> + Send + 'static,
    {
        let compute = Arc::new(compute);

        if !self.config.enabled {
            return self.compute_uncached(&compute, cancel).await.map(|p| (p, false));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }

            let (future, lead) = match self.join_or_lead(key, generation, &compute, cancel) {
                Lookup::Hit(prompt) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok((prompt, true));
                }
                Lookup::Stale => {
                    tracing::debug!(key = %key, "Generation superseded, compiling without cache");
                    return self.compute_uncached(&compute, cancel).await.map(|p| (p, false));
                }
                Lookup::Join(future) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    (future, None)
                }
                Lookup::Lead(future, id) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    (future, Some(id))
                }
            };

            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                output = future.clone() => Some(output),
            };
            let Some(output) = output else {
                if let Some(id) = lead {
                    self.abandon_if_unshared(key, id, future);
                }
                return Err(CompileError::Cancelled);
            };

            match output {
                Ok(prompt) => return Ok((prompt, lead.is_none())),
                // Another caller's token cancelled the shared compilation.
                Err(CompileError::Cancelled) if !cancel.is_cancelled() => continue,
                Err(CompileError::Internal(reason)) => {
                    tracing::warn!(key = %key, reason = %reason, "Cached compilation failed, bypassing cache");
                    return self.compute_uncached(&compute, cancel).await.map(|p| (p, false));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn join_or_lead<F, Fut>(
        &self,
        key: &Fingerprint,
        generation: Generation,
        compute: &Arc<F>,
        cancel: &CancellationToken,
    ) -> Lookup
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompileOutput> + Send + 'static,
    {
        if let Some(prompt) = self.state.read().lookup_locked(key) {
            return Lookup::Hit(prompt);
        }

        let mut state = self.state.write();
        if state.generation != generation.0 {
            return Lookup::Stale;
        }
        if let Some(prompt) = state.lookup_locked(key) {
            return Lookup::Hit(prompt);
        }
        if let Some(flight) = state.in_flight.get(key) {
            return Lookup::Join(flight.future.clone());
        }

        // The id is assigned before the future can ever be polled, since
        // polling only happens after the guard is released.
        let id = state.next_flight_id;
        let future = self.flight(key.clone(), id, generation.0, Arc::clone(compute), cancel.clone());
        let registered = state.register_locked(key.clone(), future.clone());
        debug_assert_eq!(registered, id);
        Lookup::Lead(future, id)
    }

    /// Drop the registration of a cancelled leader's flight unless a
    /// follower still holds a handle to it. Nobody else can poll the
    /// future once it is gone from the map.
    fn abandon_if_unshared(&self, key: &Fingerprint, id: u64, future: SharedCompile) {
        let mut state = self.state.write();
        // Two handles remain when unshared: ours and the map's.
        if future.strong_count() != Some(2) {
            return;
        }
        if state.abandon_locked(key, id) {
            tracing::debug!(key = %key, "Abandoned in-flight compilation after leader cancellation");
        }
    }

    fn flight<F, Fut>(
        &self,
        key: Fingerprint,
        id: u64,
        generation: u64,
        compute: Arc<F>,
        cancel: CancellationToken,
    ) -> SharedCompile
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompileOutput> + Send + 'static,
    {
        // Weak: the in-flight map owns this future, so a strong handle
        // would keep an abandoned cache alive.
        let state = Arc::downgrade(&self.state);
        let counters = Arc::clone(&self.counters);
        async move {
            counters.compilations.fetch_add(1, Ordering::Relaxed);
            let output = guarded(async move { compute(cancel).await }).await;
            if let Some(state) = state.upgrade() {
                state.write().complete_locked(&key, id, generation, &output);
            }
            output
        }
        .boxed()
        .shared()
    }

    async fn compute_uncached<F, Fut>(&self, compute: &Arc<F>, cancel: &CancellationToken) -> CompileOutput
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompileOutput> + Send + 'static,
    {
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
        self.counters.compilations.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompileError::Cancelled),
            output = guarded(async { compute(cancel.clone()).await }) => output,
        }
    }
}

/// Run a compute future, converting a panic into `CompileError::Internal`.
async fn guarded<Fut>(future: Fut) -> CompileOutput
where
    Fut: Future<Output = CompileOutput> + Send,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(CompileError::Internal("compilation panicked".to_string())))
}
