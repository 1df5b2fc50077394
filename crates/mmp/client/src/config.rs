use std::time::Duration;

/// Slack added to a peer wait when no request timeout is set, so that the
/// manager's own timeout reply arrives before the local one fires.
pub(crate) const PEER_REPLY_GRACE: Duration = Duration::from_secs(1);

/// Retry and timeout policy of an [`MmpClient`](crate::MmpClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// Reconnect attempts after a transient transport failure.
	pub max_retries: u32,
	/// Delay before the first reconnect; doubles on every further attempt.
	pub initial_backoff: Duration,
	/// Upper bound of the reconnect delay.
	pub max_backoff: Duration,
	/// Time to wait for a response to any call except a peer request.
	/// `None` waits forever.
	pub request_timeout: Option<Duration>,
	/// Peer wait limit sent with peer requests. `None` waits until the peers
	/// arrive or the manager stops.
	pub peer_timeout: Option<Duration>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			max_retries: 5,
			initial_backoff: Duration::from_millis(50),
			max_backoff: Duration::from_secs(2),
			request_timeout: Some(Duration::from_secs(30)),
			peer_timeout: None,
		}
	}
}

impl ClientConfig {
	/// Delay before reconnect attempt `attempt` (1-based).
	pub(crate) fn backoff(&self, attempt: u32) -> Duration {
		let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
		self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
	}

	/// Local deadline of a peer request the manager bounds by `peer_wait`.
	pub(crate) fn peer_deadline(&self, peer_wait: Duration) -> Duration {
		peer_wait.saturating_add(self.request_timeout.unwrap_or(PEER_REPLY_GRACE))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_doubles_up_to_the_cap() {
		let config = ClientConfig {
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(500),
			..ClientConfig::default()
		};
		let delays: Vec<_> = (1..=5).map(|n| config.backoff(n).as_millis()).collect();
		assert_eq!(delays, [100, 200, 400, 500, 500]);
	}

	#[test]
	fn peer_deadline_always_outlasts_the_manager_wait() {
		let wait = Duration::from_secs(10);
		let config = ClientConfig {
			request_timeout: Some(Duration::from_secs(3)),
			..ClientConfig::default()
		};
		assert_eq!(config.peer_deadline(wait), Duration::from_secs(13));

		let unbounded = ClientConfig {
			request_timeout: None,
			..ClientConfig::default()
		};
		assert_eq!(unbounded.peer_deadline(wait), wait + PEER_REPLY_GRACE);
		assert_eq!(unbounded.peer_deadline(Duration::MAX), Duration::MAX);
	}
}
