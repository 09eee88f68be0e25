//! A single-producer/single-consumer lock-free frame queue, grounded in
//! the original `can_fifo.h`'s push/pop index ring buffer: the ISR
//! pushes received frames, the main loop pops them, and neither side
//! ever blocks or takes a lock.
//!
//! Gated behind the `fifo` feature (spec.md section 4.4 / Non-goals):
//! boards that poll their bus driver directly from the main loop have
//! no use for this and shouldn't pay for the atomics.

use core::sync::atomic::{AtomicUsize, Ordering};

use canboot_hal::BusFrame;

/// A fixed-capacity ring of received frames. `N` mirrors the original's
/// `CAN_FRAMES_BUFFERED` compile-time constant; one slot is always kept
/// empty to distinguish full from empty with two plain indices.
pub struct FrameFifo<const N: usize> {
    buf: core::cell::UnsafeCell<[BusFrame; N]>,
    push: AtomicUsize,
    pop: AtomicUsize,
}

// Safety: `push`/`pop` are each touched by exactly one side (producer
// advances `push` after writing, consumer advances `pop` after reading)
// and the Acquire/Release pairing below makes the write visible before
// the index that exposes it is, so the single producer and single
// consumer never observe a torn slot.
unsafe impl<const N: usize> Sync for FrameFifo<N> {}

impl<const N: usize> FrameFifo<N> {
    pub const fn new() -> Self {
        FrameFifo {
            buf: core::cell::UnsafeCell::new([BusFrame { id: 0, dlc: 0, data: [0; 8] }; N]),
            push: AtomicUsize::new(0),
            pop: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.push.load(Ordering::Acquire) == self.pop.load(Ordering::Acquire)
    }

    fn is_full_at(push: usize, pop: usize) -> bool {
        (push + 1) % N == pop
    }

    /// Producer side (the receive ISR). Drops the frame silently if the
    /// queue is full, matching the original's fail-slow policy: an
    /// overrun loses the oldest-pending bus activity, not bus control.
    pub fn push(&self, frame: BusFrame) {
        let push = self.push.load(Ordering::Relaxed);
        let pop = self.pop.load(Ordering::Acquire);
        if Self::is_full_at(push, pop) {
            return;
        }
        unsafe {
            (*self.buf.get())[push] = frame;
        }
        self.push.store((push + 1) % N, Ordering::Release);
    }

    /// Consumer side (the main loop).
    pub fn pop(&self) -> Option<BusFrame> {
        let pop = self.pop.load(Ordering::Relaxed);
        let push = self.push.load(Ordering::Acquire);
        if push == pop {
            return None;
        }
        let frame = unsafe { (*self.buf.get())[pop] };
        self.pop.store((pop + 1) % N, Ordering::Release);
        Some(frame)
    }
}

impl<const N: usize> Default for FrameFifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let q: FrameFifo<4> = FrameFifo::new();
        q.push(BusFrame::new(1, &[1]));
        q.push(BusFrame::new(2, &[2]));
        assert_eq!(q.pop().unwrap().id, 1);
        assert_eq!(q.pop().unwrap().id, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn drops_newest_frame_when_full() {
        let q: FrameFifo<4> = FrameFifo::new(); // 3 usable slots
        q.push(BusFrame::new(1, &[]));
        q.push(BusFrame::new(2, &[]));
        q.push(BusFrame::new(3, &[]));
        q.push(BusFrame::new(4, &[])); // dropped: queue was already full
        assert_eq!(q.pop().unwrap().id, 1);
        assert_eq!(q.pop().unwrap().id, 2);
        assert_eq!(q.pop().unwrap().id, 3);
        assert!(q.pop().is_none());
    }

    #[test]
    fn empty_after_draining() {
        let q: FrameFifo<4> = FrameFifo::new();
        assert!(q.is_empty());
        q.push(BusFrame::new(1, &[]));
        assert!(!q.is_empty());
        q.pop();
        assert!(q.is_empty());
    }
}
