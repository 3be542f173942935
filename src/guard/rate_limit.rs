//! Sliding-window request limiter.

// self
use crate::{_prelude::*, clock::Clock};

/// Per-client sliding window of request timestamps.
///
/// A request is admitted when fewer than `max_requests` timestamps remain in the trailing
/// window after compaction; rejected requests are not recorded, so a client hammering the
/// verifier regains capacity as soon as its oldest admitted request ages out.
pub struct RateLimiter {
	clock: Arc<dyn Clock>,
	window: Duration,
	max_requests: usize,
	windows: Mutex<HashMap<String, Vec<OffsetDateTime>>>,
}
impl RateLimiter {
	/// Creates a limiter admitting `max_requests` per `window` for each client.
	pub fn new(clock: Arc<dyn Clock>, window: Duration, max_requests: usize) -> Self {
		Self { clock, window, max_requests, windows: Default::default() }
	}

	/// Records and admits a request for `client_id`, or rejects it without recording.
	pub fn allow(&self, client_id: &str) -> bool {
		let now = self.clock.now();
		let mut windows = self.windows.lock();
		let timestamps = windows.entry(client_id.to_owned()).or_default();

		timestamps.retain(|t| now - *t < self.window);

		if timestamps.len() < self.max_requests {
			timestamps.push(now);

			true
		} else {
			false
		}
	}

	/// Drops timestamps older than the window for every client and forgets idle clients.
	///
	/// Returns the number of clients forgotten.
	pub fn compact(&self) -> usize {
		let now = self.clock.now();
		let mut windows = self.windows.lock();
		let before = windows.len();

		windows.retain(|_, timestamps| {
			timestamps.retain(|t| now - *t < self.window);

			!timestamps.is_empty()
		});

		before - windows.len()
	}

	/// Number of requests currently counted against `client_id`.
	pub fn window_len(&self, client_id: &str) -> usize {
		let now = self.clock.now();

		self.windows
			.lock()
			.get(client_id)
			.map(|timestamps| timestamps.iter().filter(|t| now - **t < self.window).count())
			.unwrap_or(0)
	}

	/// Number of clients with a window in memory.
	pub fn tracked_clients(&self) -> usize {
		self.windows.lock().len()
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("window", &self.window)
			.field("max_requests", &self.max_requests)
			.field("tracked_clients", &self.tracked_clients())
			.finish()
	}
}
