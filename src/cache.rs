//! `kid`-keyed cache of imported signing keys with TTL expiry and single-flight fetches.
//!
//! [`KeyCache::resolve_key`] serves fresh entries from memory and falls back to the
//! [`KeySource`] on a miss or expiry. Concurrent misses for the same `kid` share one fetch via a
//! per-`kid` guard: the first caller fetches while the rest wait and then re-read the cache.
//! Expired entries are never served, and [`KeyCache::sweep`] reclaims them independently of
//! access patterns.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	error::TransportError,
	key::{CachedKeyEntry, PinnedKey},
	obs::{self, CacheEvent},
	source::{self, KeySource, SourceError},
};

/// Thread-safe counters for key cache activity.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	misses: AtomicU64,
	fetches: AtomicU64,
	fetch_failures: AtomicU64,
	evictions: AtomicU64,
}
impl CacheMetrics {
	/// Returns a point-in-time copy of the counters.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			fetches: self.fetches.load(Ordering::Relaxed),
			fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
		}
	}

	fn record(&self, event: CacheEvent, count: u64) {
		let counter = match event {
			CacheEvent::Hit => &self.hits,
			CacheEvent::Miss => &self.misses,
			CacheEvent::Fetch => &self.fetches,
			CacheEvent::FetchFailure => &self.fetch_failures,
			CacheEvent::Evicted => &self.evictions,
		};

		counter.fetch_add(count, Ordering::Relaxed);
		obs::record_cache_event(event, count);
	}
}

/// Copy of [`CacheMetrics`] at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
	/// Lookups answered from memory.
	pub hits: u64,
	/// Lookups that found no fresh entry.
	pub misses: u64,
	/// Key set fetches issued to the source.
	pub fetches: u64,
	/// Fetches that failed or timed out.
	pub fetch_failures: u64,
	/// Entries reclaimed by [`KeyCache::sweep`].
	pub evictions: u64,
}
impl CacheMetricsSnapshot {
	/// Total number of lookups.
	pub fn lookups(&self) -> u64 {
		self.hits + self.misses
	}
}

/// Cache of imported keys owned by one verifier.
pub struct KeyCache {
	source: Arc<dyn KeySource>,
	clock: Arc<dyn Clock>,
	ttl: Duration,
	fetch_timeout: Duration,
	entries: RwLock<HashMap<String, CachedKeyEntry>>,
	fetch_guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
	metrics: CacheMetrics,
}
impl KeyCache {
	/// Creates an empty cache backed by `source`.
	pub fn new(
		source: Arc<dyn KeySource>,
		clock: Arc<dyn Clock>,
		ttl: Duration,
		fetch_timeout: Duration,
	) -> Self {
		Self {
			source,
			clock,
			ttl,
			fetch_timeout,
			entries: Default::default(),
			fetch_guards: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Resolves the key for `kid`, fetching the key set on a miss or expiry.
	///
	/// Returns `Ok(None)` when a fresh key set does not publish a usable key under `kid`, which is
	/// a definitive answer rather than a transient miss. Source failures and timeouts are
	/// returned as errors.
	pub async fn resolve_key(&self, kid: &str) -> Result<Option<CachedKeyEntry>, SourceError> {
		if let Some(entry) = self.fresh(kid) {
			self.metrics.record(CacheEvent::Hit, 1);

			return Ok(Some(entry));
		}

		self.metrics.record(CacheEvent::Miss, 1);

		let lease = FetchLease { cache: self, kid, guard: self.fetch_guard(kid) };
		let _singleflight = lease.guard.lock().await;

		match self.fresh(kid) {
			Some(entry) => Ok(Some(entry)),
			None => self.fetch_and_import(kid).await,
		}
	}

	/// Removes every expired entry and returns how many were reclaimed.
	pub fn sweep(&self) -> usize {
		let now = self.clock.now();
		let mut entries = self.entries.write();
		let before = entries.len();

		entries.retain(|_, entry| entry.is_fresh(now, self.ttl));

		let evicted = before - entries.len();

		if evicted > 0 {
			self.metrics.record(CacheEvent::Evicted, evicted as u64);
		}

		evicted
	}

	/// Drops the entry for `kid`, forcing the next lookup to fetch.
	pub fn invalidate(&self, kid: &str) -> bool {
		self.entries.write().remove(kid).is_some()
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Number of entries physically present, fresh or not.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Whether the cache holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Configured TTL.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Returns the cache counters.
	pub fn metrics(&self) -> CacheMetricsSnapshot {
		self.metrics.snapshot()
	}

	fn fresh(&self, kid: &str) -> Option<CachedKeyEntry> {
		let now = self.clock.now();

		self.entries.read().get(kid).filter(|entry| entry.is_fresh(now, self.ttl)).cloned()
	}

	async fn fetch_and_import(&self, kid: &str) -> Result<Option<CachedKeyEntry>, SourceError> {
		self.metrics.record(CacheEvent::Fetch, 1);

		let fetched = match tokio::time::timeout(
			source::std_duration(self.fetch_timeout),
			self.source.fetch_key_set(),
		)
		.await
		{
			Ok(result) => result,
			Err(_) => Err(TransportError::Timeout { timeout: self.fetch_timeout }.into()),
		};
		let set = fetched.inspect_err(|err| {
			self.metrics.record(CacheEvent::FetchFailure, 1);
			obs::log_source_failure(kid, err);
		})?;
		let Some(jwk) = set.keys.iter().find(|jwk| jwk.common.key_id.as_deref() == Some(kid)) else {
			self.entries.write().remove(kid);

			return Ok(None);
		};
		let key = match PinnedKey::import(jwk) {
			Ok(key) => key,
			Err(err) => {
				obs::log_key_import_failure(kid, &err);
				self.entries.write().remove(kid);

				return Ok(None);
			},
		};
		let entry =
			CachedKeyEntry { kid: kid.to_owned(), key: Arc::new(key), cached_at: self.clock.now() };

		self.entries.write().insert(kid.to_owned(), entry.clone());

		Ok(Some(entry))
	}

	fn fetch_guard(&self, kid: &str) -> Arc<AsyncMutex<()>> {
		let mut guards = self.fetch_guards.lock();

		guards.entry(kid.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn release_fetch_guard(&self, kid: &str, guard: &Arc<AsyncMutex<()>>) {
		let mut guards = self.fetch_guards.lock();

		// Only the map and this caller still reference the guard.
		if Arc::strong_count(guard) == 2 {
			guards.remove(kid);
		}
	}
}
/// Holds a per-`kid` fetch guard and releases it on drop, including when the lookup is cancelled.
struct FetchLease<'a> {
	cache: &'a KeyCache,
	kid: &'a str,
	guard: Arc<AsyncMutex<()>>,
}
impl Drop for FetchLease<'_> {
	fn drop(&mut self) {
		self.cache.release_fetch_guard(self.kid, &self.guard);
	}
}

impl Debug for KeyCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeyCache")
			.field("ttl", &self.ttl)
			.field("fetch_timeout", &self.fetch_timeout)
			.field("entries", &self.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, clock::ManualClock, source::MemoryKeySource};

	struct StalledSource;
	impl KeySource for StalledSource {
		fn fetch_key_set(&self) -> source::KeySetFuture<'_> {
			Box::pin(std::future::pending())
		}
	}

	fn cache_with(source: Arc<dyn KeySource>, clock: &ManualClock) -> KeyCache {
		KeyCache::new(source, Arc::new(clock.clone()), Duration::minutes(5), Duration::seconds(5))
	}

	#[tokio::test]
	async fn hits_are_served_without_fetching() {
		let clock = ManualClock::starting_now();
		let source = Arc::new(MemoryKeySource::new(test_key_set()));
		let cache = cache_with(source.clone(), &clock);
		let first = cache
			.resolve_key(PRIMARY_KID)
			.await
			.expect("Fetch should succeed.")
			.expect("Primary key should be published.");
		let second = cache
			.resolve_key(PRIMARY_KID)
			.await
			.expect("Lookup should succeed.")
			.expect("Primary key should be cached.");

		assert_eq!(first.cached_at, second.cached_at);
		assert_eq!(source.fetches(), 1);
		assert_eq!(
			cache.metrics(),
			CacheMetricsSnapshot { hits: 1, misses: 1, fetches: 1, ..Default::default() }
		);
	}

	#[tokio::test]
	async fn expired_entries_force_exactly_one_refetch() {
		let clock = ManualClock::starting_now();
		let source = Arc::new(MemoryKeySource::new(test_key_set()));
		let cache = cache_with(source.clone(), &clock);

		cache.resolve_key(PRIMARY_KID).await.expect("Initial fetch should succeed.");
		clock.advance(Duration::minutes(5));

		let refreshed = cache
			.resolve_key(PRIMARY_KID)
			.await
			.expect("Refetch should succeed.")
			.expect("Primary key should still be published.");

		assert_eq!(refreshed.cached_at, clock.now());

		cache.resolve_key(PRIMARY_KID).await.expect("Fresh lookup should succeed.");

		assert_eq!(source.fetches(), 2);
	}

	#[tokio::test]
	async fn unknown_kid_is_a_definitive_miss() {
		let clock = ManualClock::starting_now();
		let cache = cache_with(Arc::new(MemoryKeySource::new(test_key_set())), &clock);
		let entry = cache.resolve_key("rotated-away").await.expect("Fetch should succeed.");

		assert!(entry.is_none());
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn source_failures_surface_as_errors() {
		let clock = ManualClock::starting_now();
		let cache = cache_with(Arc::new(MemoryKeySource::offline()), &clock);
		let err = cache.resolve_key(PRIMARY_KID).await.expect_err("Offline source should fail.");

		assert!(err.is_unavailable());
		assert_eq!(cache.metrics().fetch_failures, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_sources_time_out() {
		let clock = ManualClock::starting_now();
		let cache = cache_with(Arc::new(StalledSource), &clock);
		let err = cache.resolve_key(PRIMARY_KID).await.expect_err("Stalled fetch should time out.");

		assert!(matches!(err, SourceError::Transport(TransportError::Timeout { .. })));
	}

	#[tokio::test]
	async fn concurrent_misses_share_one_fetch() {
		let clock = ManualClock::starting_now();
		let source = Arc::new(MemoryKeySource::new(test_key_set()));
		let cache = cache_with(source.clone(), &clock);
		let (a, b, c) = tokio::join!(
			cache.resolve_key(PRIMARY_KID),
			cache.resolve_key(PRIMARY_KID),
			cache.resolve_key(PRIMARY_KID),
		);

		for result in [a, b, c] {
			assert!(result.expect("Lookups should succeed.").is_some());
		}

		assert_eq!(source.fetches(), 1);
		assert!(cache.fetch_guards.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_lookups_release_their_guards() {
		let clock = ManualClock::starting_now();
		let cache = cache_with(Arc::new(StalledSource), &clock);

		for i in 0..100 {
			let kid = format!("random-{i}");
			let lookup = cache.resolve_key(&kid);
			let outcome = tokio::time::timeout(std::time::Duration::from_millis(10), lookup).await;

			assert!(outcome.is_err(), "Stalled lookups should be cancelled by the outer timeout.");
		}

		assert!(cache.fetch_guards.lock().is_empty());
	}

	#[tokio::test]
	async fn sweep_reclaims_only_expired_entries() {
		let clock = ManualClock::starting_now();
		let cache = cache_with(Arc::new(MemoryKeySource::new(test_key_set())), &clock);

		cache.resolve_key(PRIMARY_KID).await.expect("Primary fetch should succeed.");
		clock.advance(Duration::minutes(3));
		cache.resolve_key(SECONDARY_KID).await.expect("Secondary fetch should succeed.");
		clock.advance(Duration::minutes(3));

		assert_eq!(cache.sweep(), 1);
		assert_eq!(cache.len(), 1);
		assert_eq!(cache.metrics().evictions, 1);
	}
}
