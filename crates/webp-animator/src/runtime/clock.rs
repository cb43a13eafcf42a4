use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::lock;

/// Callback fired once per display refresh.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle identifying one frame clock subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Periodic "tick" source, fired roughly once per display refresh.
pub trait FrameClock: Send + Sync {
    fn subscribe(&self, callback: TickCallback) -> SubscriptionToken;

    /// Remove a subscription. Unknown or already removed tokens are ignored.
    fn unsubscribe(&self, token: SubscriptionToken);

    /// Time base used to measure frame durations.
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Subscriber registry shared by the clock implementations.
#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    list: Mutex<Vec<(SubscriptionToken, TickCallback)>>,
}

impl Subscribers {
    fn add(&self, callback: TickCallback) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.list).push((token, callback));
        token
    }

    fn remove(&self, token: SubscriptionToken) {
        lock(&self.list).retain(|(t, _)| *t != token);
    }

    fn len(&self) -> usize {
        lock(&self.list).len()
    }

    /// Fire every subscriber. The list is copied first so callbacks may
    /// unsubscribe themselves.
    fn fire(&self) {
        let callbacks: Vec<TickCallback> =
            lock(&self.list).iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for cb in callbacks {
            cb();
        }
    }
}

/// Frame clock driven by a dedicated thread at a fixed interval.
pub struct IntervalClock {
    subscribers: Arc<Subscribers>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    interval: Duration,
}

impl IntervalClock {
    /// Spawn the tick thread.
    pub fn start(interval: Duration) -> std::io::Result<Self> {
        let subscribers = Arc::new(Subscribers::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let subs = Arc::clone(&subscribers);
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("webp-frame-clock".into())
            .spawn(move || {
                log::debug!("Frame clock started ({}ms interval)", interval.as_millis());
                let mut next = Instant::now();
                while !shutdown_flag.load(Ordering::Relaxed) {
                    subs.fire();
                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst of ticks.
                        next = now;
                    }
                }
                log::debug!("Frame clock stopped");
            })?;

        Ok(Self {
            subscribers,
            shutdown,
            thread: Some(handle),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Stop ticking and join the thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            // A tick callback may drop the last handle to the clock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl FrameClock for IntervalClock {
    fn subscribe(&self, callback: TickCallback) -> SubscriptionToken {
        self.subscribers.add(callback)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.remove(token);
    }
}

impl Drop for IntervalClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Frame clock with virtual time, advanced and ticked by hand.
pub struct ManualClock {
    subscribers: Subscribers,
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            subscribers: Subscribers::default(),
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.elapsed) += by;
    }

    /// Fire all subscribers at the current virtual time.
    pub fn tick(&self) {
        self.subscribers.fire();
    }

    /// Advance by `step` and tick, until `total` has passed.
    pub fn run_for(&self, total: Duration, step: Duration) {
        let mut run = Duration::ZERO;
        while run < total {
            self.advance(step);
            self.tick();
            run += step;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl FrameClock for ManualClock {
    fn subscribe(&self, callback: TickCallback) -> SubscriptionToken {
        self.subscribers.add(callback)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.remove(token);
    }

    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, TickCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let cb: TickCallback = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, cb)
    }

    #[test]
    fn manual_clock_fires_subscribers() {
        let clock = ManualClock::new();
        let (count, cb) = counter();
        let token = clock.subscribe(cb);
        clock.tick();
        clock.run_for(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 6);
        assert_eq!(clock.elapsed(), Duration::from_millis(50));

        clock.unsubscribe(token);
        clock.tick();
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let clock = ManualClock::new();
        let (_, cb) = counter();
        let token = clock.subscribe(cb);
        clock.unsubscribe(token);
        clock.unsubscribe(token);
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let clock = Arc::new(ManualClock::new());
        let slot: Arc<Mutex<Option<SubscriptionToken>>> = Arc::new(Mutex::new(None));
        let fired = Arc::new(AtomicUsize::new(0));

        let (c, s, f) = (Arc::clone(&clock), Arc::clone(&slot), Arc::clone(&fired));
        let token = clock.subscribe(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
            if let Some(t) = lock(&s).take() {
                c.unsubscribe(t);
            }
        }));
        *lock(&slot) = Some(token);

        clock.tick();
        clock.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn manual_now_tracks_virtual_time() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
    }

    #[test]
    fn interval_clock_ticks_until_stopped() {
        let mut clock = IntervalClock::start(Duration::from_millis(2)).unwrap();
        let (count, cb) = counter();
        clock.subscribe(cb);

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(count.load(Ordering::SeqCst) >= 5);

        clock.stop();
        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
