use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_config::AdmissionConfig;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Idle lanes are swept once the map grows past this many keys
const PRUNE_THRESHOLD: usize = 1024;

/// Per-client admission queue
///
/// Every client key owns one lane: a fair mutex holding the start time of
/// the last admitted job. Waiters are served in arrival order, only one job
/// per key runs at a time, and consecutive starts are at least `interval`
/// apart.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

struct Inner {
    enabled: bool,
    interval: Duration,
    lanes: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

/// Proof of admission, held for the whole job
///
/// The next job from the same client is admitted only after this is
/// dropped.
#[must_use = "dropping the permit immediately releases the client's lane"]
pub struct AdmissionPermit {
    lane: Option<OwnedMutexGuard<Option<Instant>>>,
}

impl AdmissionPermit {
    /// A permit that holds no lane
    pub const fn bypass() -> Self {
        Self { lane: None }
    }

    /// Whether this permit went through a lane
    pub const fn is_queued(&self) -> bool {
        self.lane.is_some()
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").field("queued", &self.is_queued()).finish()
    }
}

impl AdmissionQueue {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                interval: config.interval,
                lanes: DashMap::new(),
            }),
        }
    }

    /// Wait until the client may dispatch its next job
    ///
    /// Callers flagged `bypass` and callers without a known address are
    /// admitted immediately. Dropping the returned future leaves the queue.
    pub async fn admit(&self, client_ip: Option<IpAddr>, bypass: bool) -> AdmissionPermit {
        let Some(ip) = client_ip.filter(|_| self.inner.enabled && !bypass) else {
            return AdmissionPermit::bypass();
        };

        if self.inner.lanes.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let key = ip_key(ip);
        let lane = Arc::clone(self.inner.lanes.entry(key.clone()).or_default().value());

        let waited = Instant::now();
        let mut guard = lane.lock_owned().await;

        if let Some(last) = *guard {
            tokio::time::sleep_until(last + self.inner.interval).await;
        }

        let now = Instant::now();
        *guard = Some(now);

        let wait = now.duration_since(waited);
        relay_telemetry::metrics().admission_wait.record(wait.as_secs_f64(), &[]);

        if !wait.is_zero() {
            tracing::debug!(client = %key, wait_ms = wait.as_millis(), "admitted after queueing");
        }

        AdmissionPermit { lane: Some(guard) }
    }

    /// Remove lanes that nobody holds and whose interval has elapsed
    pub fn prune(&self) {
        let interval = self.inner.interval;

        self.inner.lanes.retain(|_, lane| {
            if Arc::strong_count(lane) > 1 {
                return true;
            }

            match lane.try_lock() {
                Ok(last) => last.is_some_and(|at| at.elapsed() < interval),
                Err(_) => true,
            }
        });
    }

    /// Number of client lanes currently tracked
    pub fn len(&self) -> usize {
        self.inner.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lanes.is_empty()
    }
}

/// Queue key of a client address
///
/// IPv4 keeps the first three octets and IPv6 the first three segments, so
/// neighbouring addresses share one lane.
pub fn ip_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}")
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return ip_key(IpAddr::V4(v4));
            }
            let segments = v6.segments();
            format!("{:x}:{:x}:{:x}", segments[0], segments[1], segments[2])
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;

    use super::*;

    fn queue(interval: Duration) -> AdmissionQueue {
        AdmissionQueue::new(&AdmissionConfig {
            enabled: true,
            interval,
        })
    }

    fn ip(raw: &str) -> Option<IpAddr> {
        Some(raw.parse().unwrap())
    }

    #[test]
    fn coarsens_addresses() {
        assert_eq!(ip_key("203.0.113.7".parse().unwrap()), "203.0.113");
        assert_eq!(ip_key("2001:db8:85a3::8a2e:370:7334".parse().unwrap()), "2001:db8:85a3");
        assert_eq!(ip_key("::ffff:10.1.2.3".parse().unwrap()), "10.1.2");
    }

    #[tokio::test(start_paused = true)]
    async fn same_client_is_spaced_in_arrival_order() {
        let queue = queue(Duration::from_secs(15));
        let start = Instant::now();

        let jobs = (0..3).map(|n| {
            let queue = queue.clone();
            async move {
                let _permit = queue.admit(ip("10.1.2.3"), false).await;
                (n, start.elapsed())
            }
        });

        let admitted = join_all(jobs).await;

        assert_eq!(
            admitted,
            vec![
                (0, Duration::ZERO),
                (1, Duration::from_secs(15)),
                (2, Duration::from_secs(30)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn neighbouring_addresses_share_a_lane() {
        let queue = queue(Duration::from_secs(10));
        let start = Instant::now();

        drop(queue.admit(ip("10.1.2.3"), false).await);
        drop(queue.admit(ip("10.1.2.200"), false).await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        drop(queue.admit(ip("10.1.3.3"), false).await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permit_is_held_for_the_whole_job() {
        let queue = queue(Duration::from_secs(1));
        let start = Instant::now();

        let first = async {
            let _permit = queue.admit(ip("10.0.0.1"), false).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        };
        let second = async {
            tokio::task::yield_now().await;
            let _permit = queue.admit(ip("10.0.0.1"), false).await;
            start.elapsed()
        };

        let ((), second_started) = tokio::join!(first, second);
        assert_eq!(second_started, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_and_unknown_clients_skip_the_queue() {
        let queue = queue(Duration::from_secs(60));
        let start = Instant::now();

        let held = queue.admit(ip("10.0.0.1"), false).await;
        assert!(held.is_queued());

        let bypassed = queue.admit(ip("10.0.0.1"), true).await;
        assert!(!bypassed.is_queued());

        let anonymous = queue.admit(None, false).await;
        assert!(!anonymous.is_queued());

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_queue_admits_everyone() {
        let queue = AdmissionQueue::new(&AdmissionConfig {
            enabled: false,
            interval: Duration::from_secs(60),
        });

        let first = queue.admit(ip("10.0.0.1"), false).await;
        let second = queue.admit(ip("10.0.0.1"), false).await;
        assert!(!first.is_queued() && !second.is_queued());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_idle_lanes_only() {
        let queue = queue(Duration::from_secs(10));

        drop(queue.admit(ip("10.0.0.1"), false).await);
        let _held = queue.admit(ip("10.0.1.1"), false).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        queue.prune();

        assert_eq!(queue.len(), 1);
    }
}
