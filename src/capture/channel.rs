//! Bounded Event Channel
//!
//! Lock-free SPSC channel connecting a capture backend (producer) to the
//! trace collector (consumer), built on the `rtrb` ring buffer.
//!
//! Architecture:
//! - Producer (backend delivery thread): never blocks, pushes at input rate
//! - Consumer (collector thread): drains in batches on its own cadence
//!
//! Suspension only ever happens at this boundary: when the channel is full
//! the newest event is dropped and counted, the producer keeps running.

use super::types::{RawEvent, SequencedEvent};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default channel capacity (must be a power of 2)
pub const DEFAULT_CAPACITY: usize = 4096;

/// Channel statistics for monitoring
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Total events pushed
    pub events_pushed: AtomicU64,
    /// Events dropped due to full channel
    pub events_dropped: AtomicU64,
    /// Events successfully consumed
    pub events_consumed: AtomicU64,
    /// Peak channel occupancy
    pub peak_occupancy: AtomicU64,
}

impl ChannelStats {
    /// Number of events dropped so far
    pub fn dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Number of events pushed so far
    pub fn pushed(&self) -> u64 {
        self.events_pushed.load(Ordering::Relaxed)
    }

    /// Number of events consumed so far
    pub fn consumed(&self) -> u64 {
        self.events_consumed.load(Ordering::Relaxed)
    }
}

/// Bounded SPSC event channel
///
/// Split once into an [`EventSink`] (for the backend) and an
/// [`EventStream`] (for the collector).
pub struct EventChannel {
    producer: Producer<SequencedEvent>,
    consumer: Consumer<SequencedEvent>,
    stats: Arc<ChannelStats>,
    capacity: usize,
}

impl EventChannel {
    /// Create a channel with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a channel with the specified capacity
    ///
    /// # Panics
    /// Panics if capacity is not a power of 2
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "Event channel capacity must be a power of 2"
        );

        let (producer, consumer) = RingBuffer::new(capacity);

        Self {
            producer,
            consumer,
            stats: Arc::new(ChannelStats::default()),
            capacity,
        }
    }

    /// Split the channel into its sink and stream halves
    pub fn split(self) -> (EventSink, EventStream) {
        (
            EventSink {
                inner: self.producer,
                sequence: 0,
                stats: Arc::clone(&self.stats),
                capacity: self.capacity,
            },
            EventStream {
                inner: self.consumer,
                stats: self.stats,
            },
        )
    }

    /// Get shared statistics
    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of the channel (owned by a backend delivery thread)
pub struct EventSink {
    inner: Producer<SequencedEvent>,
    sequence: u64,
    stats: Arc<ChannelStats>,
    capacity: usize,
}

impl EventSink {
    /// Push an event into the channel.
    ///
    /// Lock-free and never blocking. If the channel is full, the event is
    /// dropped and the drop counter incremented.
    ///
    /// Returns true if the event was pushed, false if dropped.
    #[inline]
    pub fn push(&mut self, event: RawEvent) -> bool {
        let sequenced = SequencedEvent {
            sequence: self.sequence,
            event,
        };

        match self.inner.push(sequenced) {
            Ok(()) => {
                self.sequence += 1;
                self.stats.events_pushed.fetch_add(1, Ordering::Relaxed);

                // Update peak occupancy
                let occupied = (self.capacity - self.inner.slots()) as u64;
                let mut peak = self.stats.peak_occupancy.load(Ordering::Relaxed);
                while occupied > peak {
                    match self.stats.peak_occupancy.compare_exchange_weak(
                        peak,
                        occupied,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(p) => peak = p,
                    }
                }

                true
            }
            Err(_) => {
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Check available slots without pushing
    #[inline]
    pub fn available_slots(&self) -> usize {
        self.inner.slots()
    }

    /// Check if the channel is full
    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// Next sequence number to be assigned
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Consumer half of the channel (owned by the collector thread)
pub struct EventStream {
    inner: Consumer<SequencedEvent>,
    stats: Arc<ChannelStats>,
}

impl EventStream {
    /// Pop the next event, if any
    #[inline]
    pub fn pop(&mut self) -> Option<SequencedEvent> {
        match self.inner.pop() {
            Ok(event) => {
                self.stats.events_consumed.fetch_add(1, Ordering::Relaxed);
                Some(event)
            }
            Err(_) => None,
        }
    }

    /// Check if there are events available
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of events currently buffered
    #[inline]
    pub fn available(&self) -> usize {
        self.inner.slots()
    }

    /// Pop up to `max_count` events at once
    pub fn pop_batch(&mut self, max_count: usize) -> Vec<SequencedEvent> {
        let mut batch = Vec::with_capacity(max_count.min(self.available()));
        for _ in 0..max_count {
            match self.pop() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{EventKind, MouseButton};
    use crate::time::Timestamp;

    fn make_test_event(ticks: u64) -> RawEvent {
        RawEvent::mouse(
            Timestamp::from_ticks(ticks),
            0,
            MouseButton::Left,
            100.0,
            200.0,
            1,
        )
    }

    #[test]
    fn test_channel_creation() {
        let channel = EventChannel::new();
        assert_eq!(channel.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "power of 2")]
    fn test_channel_invalid_capacity() {
        let _ = EventChannel::with_capacity(100);
    }

    #[test]
    fn test_push_and_pop() {
        let (mut sink, mut stream) = EventChannel::with_capacity(64).split();

        assert!(sink.push(make_test_event(1000)));

        let got = stream.pop().expect("should have event");
        assert_eq!(got.sequence, 0);
        assert_eq!(got.event.kind(), EventKind::Mouse);
        assert!(stream.pop().is_none());
    }

    #[test]
    fn test_drop_on_full() {
        let channel = EventChannel::with_capacity(4);
        let stats = channel.stats();
        let (mut sink, _stream) = channel.split();

        for i in 0..4 {
            assert!(sink.push(make_test_event(i)));
        }
        assert!(sink.is_full());
        assert!(!sink.push(make_test_event(99)));

        assert_eq!(stats.pushed(), 4);
        assert_eq!(stats.dropped(), 1);
    }

    #[test]
    fn test_sequence_numbers_skip_drops() {
        let (mut sink, mut stream) = EventChannel::with_capacity(4).split();

        for i in 0..4 {
            assert!(sink.push(make_test_event(i)));
        }
        // Dropped event must not consume a sequence number
        assert!(!sink.push(make_test_event(99)));
        assert_eq!(sink.sequence(), 4);

        stream.pop();
        assert!(sink.push(make_test_event(100)));

        let remaining: Vec<u64> = std::iter::from_fn(|| stream.pop())
            .map(|s| s.sequence)
            .collect();
        assert_eq!(remaining, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_batch_pop() {
        let (mut sink, mut stream) = EventChannel::with_capacity(64).split();

        for i in 0..10 {
            sink.push(make_test_event(i));
        }

        let batch = stream.pop_batch(5);
        assert_eq!(batch.len(), 5);
        assert_eq!(stream.available(), 5);

        let rest = stream.pop_batch(100);
        assert_eq!(rest.len(), 5);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_statistics() {
        let channel = EventChannel::with_capacity(4);
        let stats = channel.stats();
        let (mut sink, mut stream) = channel.split();

        for i in 0..6 {
            sink.push(make_test_event(i));
        }

        assert_eq!(stats.pushed(), 4);
        assert_eq!(stats.dropped(), 2);

        stream.pop_batch(10);
        assert_eq!(stats.consumed(), 4);
        assert!(stats.peak_occupancy.load(Ordering::Relaxed) >= 4);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        use std::thread;

        let channel = EventChannel::with_capacity(256);
        let stats = channel.stats();
        let (mut sink, mut stream) = channel.split();

        let producer = thread::spawn(move || {
            for i in 0..100 {
                sink.push(make_test_event(i));
                thread::sleep(std::time::Duration::from_micros(10));
            }
        });

        let consumer = thread::spawn(move || {
            let mut consumed = 0;
            let mut last_sequence = None;
            while consumed < 100 {
                for event in stream.pop_batch(16) {
                    // Order must be preserved across the channel
                    if let Some(last) = last_sequence {
                        assert!(event.sequence > last);
                    }
                    last_sequence = Some(event.sequence);
                    consumed += 1;
                }
                thread::sleep(std::time::Duration::from_micros(10));
            }
            consumed
        });

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), 100);
        assert_eq!(stats.pushed(), 100);
        assert_eq!(stats.consumed(), 100);
    }

    #[test]
    fn test_timestamps_nondecreasing_through_channel() {
        let (mut sink, mut stream) = EventChannel::with_capacity(64).split();

        for i in 0..20 {
            sink.push(make_test_event(i * 100));
        }

        let batch = stream.pop_batch(20);
        for pair in batch.windows(2) {
            assert!(pair[1].event.timestamp >= pair[0].event.timestamp);
        }
    }
}
