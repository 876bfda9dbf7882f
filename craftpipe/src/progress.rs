//! Aggregation of many weighted progress streams into a single total, sampled on a
//! fixed interval and reported to a single sink.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use slab::Slab;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};


/// The receiver of total progress values, in range 0 to 1.
pub trait ProgressSink: Send + Sync + 'static {
    fn report(&self, progress: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync + 'static,
{
    #[inline]
    fn report(&self, progress: f64) {
        self(progress)
    }
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    weight: f64,
    value: f64,
}

struct Shared {
    channels: Mutex<Slab<Channel>>,
    sink: Option<Box<dyn ProgressSink>>,
}

impl Shared {

    fn channels(&self) -> MutexGuard<'_, Slab<Channel>> {
        // A panic while holding the lock can't leave the slab in an invalid state.
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn total(&self) -> f64 {
        let total = self.channels()
            .iter()
            .map(|(_, channel)| channel.weight * channel.value)
            .sum::<f64>();
        total.clamp(0.0, 1.0)
    }

    fn report(&self, progress: f64) {
        if let Some(sink) = &self.sink {
            sink.report(progress);
        }
    }

}

/// Multiplexer of weighted progress channels, reporting their weighted sum.
///
/// Stopping or abandoning the aggregator consumes it, so nothing is reported after.
pub struct ProgressAggregator {
    shared: Arc<Shared>,
    poller: Option<Poller>,
}

struct Poller {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressAggregator {

    /// Create a new aggregator reporting to the given sink once started.
    pub fn new(sink: impl ProgressSink) -> Self {
        Self::with_sink(Some(Box::new(sink)))
    }

    /// Create a new aggregator without sink, its total can only be polled.
    pub fn detached() -> Self {
        Self::with_sink(None)
    }

    fn with_sink(sink: Option<Box<dyn ProgressSink>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                channels: Mutex::new(Slab::new()),
                sink,
            }),
            poller: None,
        }
    }

    /// Create a new channel with the given weight, the returned updater will store
    /// `weight × value` for each value it's given. Channels can be created while the
    /// aggregator is running.
    pub fn create_channel(&self, weight: f64) -> ProgressUpdater {
        let key = self.shared.channels().insert(Channel { weight, value: 0.0 });
        ProgressUpdater {
            shared: Arc::clone(&self.shared),
            key,
        }
    }

    /// Return the current weighted total.
    #[inline]
    pub fn total(&self) -> f64 {
        self.shared.total()
    }

    /// Start polling the total on the given interval and report it to the sink, this
    /// does nothing if already started. This must be called in a Tokio runtime.
    pub fn start(&mut self, interval: Duration) {

        if self.poller.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {

            let mut interval = time::interval(interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => shared.report(shared.total()),
                    _ = &mut stop_rx => break,
                }
            }

        });

        self.poller = Some(Poller { stop_tx, handle });

    }

    /// Stop polling and do one final report of `1.0`.
    pub async fn stop(mut self) {
        self.join_poller().await;
        self.shared.report(1.0);
    }

    /// Stop polling without the final report, used when the tracked work failed.
    pub async fn abandon(mut self) {
        self.join_poller().await;
    }

    async fn join_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            let _ = poller.stop_tx.send(());
            // The poller never panics, unless the sink does, it's ignored.
            let _ = poller.handle.await;
        }
    }

}

impl Drop for ProgressAggregator {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.handle.abort();
        }
    }
}

/// The update side of a progress channel. Dropping it keeps its last contribution to
/// the total, use [`Self::remove`] to remove the channel altogether.
#[derive(Clone)]
pub struct ProgressUpdater {
    shared: Arc<Shared>,
    key: usize,
}

impl ProgressUpdater {

    /// Set the progress value of this channel, clamped to range 0 to 1.
    pub fn set(&self, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        if let Some(channel) = self.shared.channels().get_mut(self.key) {
            channel.value = value;
        }
    }

    /// Change the weight of this channel.
    pub(crate) fn set_weight(&self, weight: f64) {
        if let Some(channel) = self.shared.channels().get_mut(self.key) {
            channel.weight = weight;
        }
    }

    /// Return the current progress value of this channel, unweighted.
    pub fn get(&self) -> f64 {
        self.shared.channels()
            .get(self.key)
            .map(|channel| channel.value)
            .unwrap_or(0.0)
    }

    /// Remove this channel from its aggregator.
    pub fn remove(self) {
        let mut channels = self.shared.channels();
        if channels.contains(self.key) {
            channels.remove(self.key);
        }
    }

}
