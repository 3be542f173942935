//! Failure counting and temporary blocking of abusive clients.

// self
use crate::{
	_prelude::*,
	clock::Clock,
	obs::{self, Rejection},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FailureRecord {
	count: u32,
	last_attempt: OffsetDateTime,
}

/// Counts verification failures per client and blocks clients that cross the threshold.
///
/// A record whose last failure is older than the block duration is deleted on the next
/// inspection, so a client that served its cool-down starts again from zero.
pub struct AbuseTracker {
	clock: Arc<dyn Clock>,
	max_failed_attempts: u32,
	block_duration: Duration,
	records: Mutex<HashMap<String, FailureRecord>>,
}
impl AbuseTracker {
	/// Creates a tracker blocking clients after `max_failed_attempts` failures.
	pub fn new(clock: Arc<dyn Clock>, max_failed_attempts: u32, block_duration: Duration) -> Self {
		Self { clock, max_failed_attempts, block_duration, records: Default::default() }
	}

	/// Whether `client_id` is currently blocked; expired records are deleted.
	pub fn is_blocked(&self, client_id: &str) -> bool {
		let now = self.clock.now();
		let mut records = self.records.lock();
		let Some(record) = records.get(client_id).copied() else {
			return false;
		};

		if self.cooled_down(&record, now) {
			records.remove(client_id);

			return false;
		}

		record.count >= self.max_failed_attempts
	}

	/// Records one failure for `client_id` and returns the updated count.
	pub fn record_failure(&self, client_id: &str, reason: Rejection) -> u32 {
		let now = self.clock.now();
		let mut records = self.records.lock();
		let record = records
			.entry(client_id.to_owned())
			.or_insert(FailureRecord { count: 0, last_attempt: now });

		if self.cooled_down(record, now) {
			record.count = 0;
		}

		record.count = record.count.saturating_add(1);
		record.last_attempt = now;

		let count = record.count;

		drop(records);
		obs::log_rejection(reason, client_id);

		if count == self.max_failed_attempts {
			obs::log_client_blocked(client_id, count);
		}

		count
	}

	/// Current failure count for `client_id` (zero when untracked).
	pub fn failure_count(&self, client_id: &str) -> u32 {
		self.records.lock().get(client_id).map(|record| record.count).unwrap_or(0)
	}

	/// Forgets `client_id`, unblocking it immediately.
	pub fn clear(&self, client_id: &str) -> bool {
		self.records.lock().remove(client_id).is_some()
	}

	/// Deletes every record whose cool-down elapsed and returns how many were removed.
	pub fn sweep(&self) -> usize {
		let now = self.clock.now();
		let mut records = self.records.lock();
		let before = records.len();

		records.retain(|_, record| !self.cooled_down(record, now));

		before - records.len()
	}

	/// Number of clients with a failure record.
	pub fn tracked_clients(&self) -> usize {
		self.records.lock().len()
	}

	fn cooled_down(&self, record: &FailureRecord, now: OffsetDateTime) -> bool {
		now - record.last_attempt > self.block_duration
	}
}
impl Debug for AbuseTracker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AbuseTracker")
			.field("max_failed_attempts", &self.max_failed_attempts)
			.field("block_duration", &self.block_duration)
			.field("tracked_clients", &self.tracked_clients())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::clock::ManualClock;

	fn tracker(clock: &ManualClock) -> AbuseTracker {
		AbuseTracker::new(Arc::new(clock.clone()), 3, Duration::minutes(15))
	}

	#[test]
	fn threshold_blocks_until_cool_down_elapses() {
		let clock = ManualClock::starting_now();
		let tracker = tracker(&clock);

		for expected in 1..=3 {
			assert!(!tracker.is_blocked("client"));
			assert_eq!(tracker.record_failure("client", Rejection::UnknownKey), expected);
		}

		assert!(tracker.is_blocked("client"));

		clock.advance(Duration::minutes(15));

		assert!(tracker.is_blocked("client"), "Block holds through the full duration.");

		clock.advance(Duration::seconds(1));

		assert!(!tracker.is_blocked("client"));
		assert_eq!(tracker.failure_count("client"), 0, "Unblocking deletes the record.");
	}

	#[test]
	fn stale_records_restart_from_zero() {
		let clock = ManualClock::starting_now();
		let tracker = tracker(&clock);

		tracker.record_failure("client", Rejection::MalformedToken);
		tracker.record_failure("client", Rejection::MalformedToken);
		clock.advance(Duration::minutes(16));

		assert_eq!(tracker.record_failure("client", Rejection::OversizedToken), 1);
	}

	#[test]
	fn sweep_removes_cooled_down_records() {
		let clock = ManualClock::starting_now();
		let tracker = tracker(&clock);

		tracker.record_failure("old", Rejection::Expired);
		clock.advance(Duration::minutes(10));
		tracker.record_failure("recent", Rejection::Expired);
		clock.advance(Duration::minutes(6));

		assert_eq!(tracker.sweep(), 1);
		assert_eq!(tracker.failure_count("old"), 0);
		assert_eq!(tracker.failure_count("recent"), 1);
		assert!(tracker.clear("recent"));
		assert_eq!(tracker.tracked_clients(), 0);
	}
}
