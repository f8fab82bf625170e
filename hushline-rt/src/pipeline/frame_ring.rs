//! Lock-free SPSC ring buffer of fixed-size frames
//!
//! Carries engine frames across the audio-thread / worker-thread boundary.
//! Two instances exist per worker pipeline: input (audio thread -> worker) and
//! output (worker -> audio thread).
//!
//! Design:
//! - `capacity` slots of `frame_length` samples, allocated once at construction
//! - `tail` is advanced only by the producer, `head` only by the consumer
//! - Full when `(tail + 1) % capacity == head`, empty when `head == tail`, so one
//!   slot is always kept free and capacity must be >= 2
//! - Cursor stores use Release, loads of the opposite cursor use Acquire, so a
//!   reader never observes a cursor before the slot data it publishes
//! - `push`/`pop` never block and never allocate; only the worker thread may call
//!   the bounded `wait_for_data`/`wait_for_space`
//!
//! Waiting uses a Condvar. The non-blocking side notifies without taking the
//! mutex, so a wakeup can be missed; every wait is therefore bounded by a
//! timeout and a missed wakeup costs at most one timeout.

use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Shared storage; only reachable through the producer/consumer halves
struct FrameRing {
    slots: Box<[UnsafeCell<Box<[f32]>>]>,
    frame_length: usize,
    capacity: usize,

    /// Next slot to consume
    head: AtomicUsize,
    /// Next slot to produce
    tail: AtomicUsize,

    /// Parking for the worker side
    wait_lock: Mutex<()>,
    data_cond: Condvar,
    space_cond: Condvar,
    consumer_waiting: AtomicBool,
    producer_waiting: AtomicBool,

    /// Set by `RingSignal::wake` to cut a wait short
    interrupted: AtomicBool,
}

// SAFETY: slot `i` is written only by the producer while `i` is outside
// [head, tail), and read only by the consumer while `i` is inside it. Cursor
// publication uses Release/Acquire, so the two halves never touch the same slot
// concurrently. Each half is a single non-Clone owner.
unsafe impl Sync for FrameRing {}
unsafe impl Send for FrameRing {}

impl FrameRing {
    #[inline]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity {
            0
        } else {
            next
        }
    }

    fn occupancy(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + self.capacity - head) % self.capacity
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    fn is_full(&self) -> bool {
        self.next(self.tail.load(Ordering::Acquire)) == self.head.load(Ordering::Acquire)
    }

    fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Park until `blocked()` is false, the ring is interrupted, or `timeout` elapses
    fn wait_while(
        &self,
        timeout: Duration,
        waiting: &AtomicBool,
        cond: &Condvar,
        blocked: impl Fn(&FrameRing) -> bool,
    ) -> bool {
        if !blocked(self) {
            return true;
        }

        let guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        waiting.store(true, Ordering::SeqCst);
        let mut interrupted = false;
        let (guard, _timeout) = cond
            .wait_timeout_while(guard, timeout, |_| {
                if self.take_interrupt() {
                    interrupted = true;
                    return false;
                }
                blocked(self)
            })
            .unwrap_or_else(PoisonError::into_inner);
        waiting.store(false, Ordering::SeqCst);
        drop(guard);

        !interrupted && !blocked(self)
    }
}

/// Create a ring and split it into its two halves
///
/// # Errors
/// `Error::Config` if `capacity < 2` or `frame_length == 0`.
pub fn frame_ring(capacity: usize, frame_length: usize) -> Result<(FrameProducer, FrameConsumer)> {
    if capacity < 2 {
        return Err(Error::Config(format!(
            "frame ring capacity must be >= 2 (got {})",
            capacity
        )));
    }
    if frame_length == 0 {
        return Err(Error::Config("frame ring frame_length must be > 0".to_string()));
    }

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(vec![0.0f32; frame_length].into_boxed_slice()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(FrameRing {
        slots,
        frame_length,
        capacity,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        wait_lock: Mutex::new(()),
        data_cond: Condvar::new(),
        space_cond: Condvar::new(),
        consumer_waiting: AtomicBool::new(false),
        producer_waiting: AtomicBool::new(false),
        interrupted: AtomicBool::new(false),
    });

    Ok((
        FrameProducer {
            ring: Arc::clone(&ring),
        },
        FrameConsumer { ring },
    ))
}

/// Producer half (owns `tail`)
pub struct FrameProducer {
    ring: Arc<FrameRing>,
}

impl FrameProducer {
    /// Copy `frame` into the next slot and publish it
    ///
    /// Returns false, leaving the ring untouched, if the ring is full or
    /// `frame.len() != frame_length`. Never blocks, never allocates.
    pub fn push(&mut self, frame: &[f32]) -> bool {
        let ring = &*self.ring;
        if frame.len() != ring.frame_length {
            return false;
        }

        let tail = ring.tail.load(Ordering::Relaxed);
        let next = ring.next(tail);
        if next == ring.head.load(Ordering::Acquire) {
            return false;
        }

        // SAFETY: slot `tail` is outside [head, tail) so the consumer is not reading it.
        unsafe {
            (*ring.slots[tail].get()).copy_from_slice(frame);
        }
        ring.tail.store(next, Ordering::Release);

        if ring.consumer_waiting.load(Ordering::SeqCst) {
            ring.data_cond.notify_one();
        }
        true
    }

    /// Block (bounded) until a slot is free
    ///
    /// Returns true if space is available. Worker thread only.
    pub fn wait_for_space(&self, timeout: Duration) -> bool {
        let ring = &*self.ring;
        ring.wait_while(timeout, &ring.producer_waiting, &ring.space_cond, FrameRing::is_full)
    }

    /// Approximate occupancy; racy against the consumer, diagnostics only
    pub fn size(&self) -> usize {
        self.ring.occupancy()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    pub fn frame_length(&self) -> usize {
        self.ring.frame_length
    }

    /// Handle that can cut a pending wait short
    pub fn signal(&self) -> RingSignal {
        RingSignal {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Consumer half (owns `head`)
pub struct FrameConsumer {
    ring: Arc<FrameRing>,
}

impl FrameConsumer {
    /// Copy the oldest frame into `out` and release its slot
    ///
    /// Returns false, leaving the ring untouched, if the ring is empty or
    /// `out.len() != frame_length`. Never blocks, never allocates.
    pub fn pop(&mut self, out: &mut [f32]) -> bool {
        let ring = &*self.ring;
        if out.len() != ring.frame_length {
            return false;
        }

        let head = ring.head.load(Ordering::Relaxed);
        if head == ring.tail.load(Ordering::Acquire) {
            return false;
        }

        // SAFETY: slot `head` is inside [head, tail) so the producer is not writing it.
        unsafe {
            out.copy_from_slice(&*ring.slots[head].get());
        }
        ring.head.store(ring.next(head), Ordering::Release);

        if ring.producer_waiting.load(Ordering::SeqCst) {
            ring.space_cond.notify_one();
        }
        true
    }

    /// Drop every queued frame; returns how many were discarded
    pub fn discard_all(&mut self) -> usize {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        let discarded = (tail + ring.capacity - head) % ring.capacity;
        ring.head.store(tail, Ordering::Release);

        if discarded > 0 && ring.producer_waiting.load(Ordering::SeqCst) {
            ring.space_cond.notify_one();
        }
        discarded
    }

    /// Block (bounded) until the producer publishes a frame
    ///
    /// Returns true if data is available. Worker thread only: this parks the
    /// calling thread for up to `timeout`.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let ring = &*self.ring;
        ring.wait_while(timeout, &ring.consumer_waiting, &ring.data_cond, FrameRing::is_empty)
    }

    /// Approximate occupancy; racy against the producer, diagnostics only
    pub fn size(&self) -> usize {
        self.ring.occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    pub fn frame_length(&self) -> usize {
        self.ring.frame_length
    }

    /// Handle that can cut a pending wait short
    pub fn signal(&self) -> RingSignal {
        RingSignal {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Wakes a thread parked in `wait_for_data`/`wait_for_space`
///
/// Used by the controller to make a stopping worker notice promptly.
#[derive(Clone)]
pub struct RingSignal {
    ring: Arc<FrameRing>,
}

impl RingSignal {
    pub fn wake(&self) {
        let ring = &*self.ring;
        ring.interrupted.store(true, Ordering::Release);
        // Taking the lock orders the flag against a waiter that is between its
        // predicate check and parking.
        let _guard = ring.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        ring.data_cond.notify_all();
        ring.space_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_ring_basic_fifo() {
        let (mut prod, mut cons) = frame_ring(4, 3).unwrap();
        let mut out = [0.0f32; 3];

        assert!(prod.push(&[1.0, 2.0, 3.0]));
        assert!(prod.push(&[4.0, 5.0, 6.0]));
        assert_eq!(cons.size(), 2);

        assert!(cons.pop(&mut out));
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert!(cons.pop(&mut out));
        assert_eq!(out, [4.0, 5.0, 6.0]);

        // Empty now
        assert!(!cons.pop(&mut out));
        assert!(cons.is_empty());
    }

    #[test]
    fn test_full_at_capacity_minus_one() {
        let (mut prod, mut cons) = frame_ring(4, 2).unwrap();

        assert!(prod.push(&[1.0, 1.0]));
        assert!(prod.push(&[2.0, 2.0]));
        assert!(prod.push(&[3.0, 3.0]));
        assert!(prod.is_full());
        assert_eq!(prod.size(), 3);

        // Rejected, state unchanged
        assert!(!prod.push(&[4.0, 4.0]));
        assert_eq!(prod.size(), 3);

        let mut out = [0.0f32; 2];
        assert!(cons.pop(&mut out));
        assert_eq!(out, [1.0, 1.0]);
        assert!(prod.push(&[4.0, 4.0]));
    }

    #[test]
    fn test_pop_empty_leaves_output_untouched() {
        let (_prod, mut cons) = frame_ring(2, 2).unwrap();
        let mut out = [9.0f32; 2];
        assert!(!cons.pop(&mut out));
        assert_eq!(out, [9.0, 9.0]);
        assert_eq!(cons.size(), 0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let (mut prod, mut cons) = frame_ring(4, 3).unwrap();
        assert!(!prod.push(&[1.0, 2.0]));
        assert!(!prod.push(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(prod.size(), 0);

        assert!(prod.push(&[1.0, 2.0, 3.0]));
        let mut short = [0.0f32; 2];
        assert!(!cons.pop(&mut short));
        assert_eq!(cons.size(), 1);
    }

    #[test]
    fn test_capacity_below_two_rejected() {
        assert!(frame_ring(1, 480).is_err());
        assert!(frame_ring(0, 480).is_err());
        assert!(frame_ring(2, 0).is_err());
        assert!(frame_ring(2, 480).is_ok());
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let (mut prod, mut cons) = frame_ring(3, 1).unwrap();
        let mut out = [0.0f32; 1];

        for i in 0..10 {
            assert!(prod.push(&[i as f32]));
            assert!(cons.pop(&mut out));
            assert_eq!(out[0], i as f32);
        }
    }

    #[test]
    fn test_discard_all() {
        let (mut prod, mut cons) = frame_ring(8, 1).unwrap();
        for i in 0..5 {
            assert!(prod.push(&[i as f32]));
        }
        assert_eq!(cons.discard_all(), 5);
        assert!(cons.is_empty());
        assert_eq!(cons.discard_all(), 0);
    }

    #[test]
    fn test_wait_for_data_times_out_when_empty() {
        let (_prod, cons) = frame_ring(4, 4).unwrap();
        let start = Instant::now();
        assert!(!cons.wait_for_data(Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_wait_for_data_returns_immediately_when_ready() {
        let (mut prod, cons) = frame_ring(4, 1).unwrap();
        assert!(prod.push(&[1.0]));
        assert!(cons.wait_for_data(Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_for_data_wakes_on_push() {
        let (mut prod, cons) = frame_ring(4, 1).unwrap();

        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let ready = cons.wait_for_data(Duration::from_millis(500));
            (ready, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        assert!(prod.push(&[1.0]));

        let (ready, _elapsed) = waiter.join().unwrap();
        assert!(ready);
    }

    #[test]
    fn test_wait_for_space_wakes_on_pop() {
        let (mut prod, mut cons) = frame_ring(2, 1).unwrap();
        assert!(prod.push(&[1.0]));
        assert!(!prod.wait_for_space(Duration::from_millis(2)));

        let popper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut out = [0.0f32; 1];
            cons.pop(&mut out)
        });

        assert!(prod.wait_for_space(Duration::from_millis(500)));
        assert!(popper.join().unwrap());
    }

    #[test]
    fn test_signal_interrupts_wait() {
        let (_prod, cons) = frame_ring(4, 1).unwrap();
        let signal = cons.signal();

        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let ready = cons.wait_for_data(Duration::from_secs(10));
            (ready, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        signal.wake();

        let (ready, elapsed) = waiter.join().unwrap();
        assert!(!ready);
        assert!(elapsed < Duration::from_secs(5));
    }
}
