use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer / single-consumer ring buffer of mono f32 samples.
///
/// The emulator thread pushes resampled output (one queue per stereo side)
/// and an audio callback thread drains it without locks.
///
/// When full, a push overwrites the *oldest* sample so playback stays close
/// to real time instead of drifting behind.
#[derive(Clone)]
pub struct AudioConsumer {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct AudioProducer {
    inner: Arc<Inner>,
}

struct Inner {
    // One extra slot so head==tail is unambiguously empty.
    buf: Box<[UnsafeCell<MaybeUninit<f32>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safe because:
// - Only the producer writes to `buf[head]`.
// - Slots are read only at `tail`, and tail advances are CAS-guarded so a
//   producer-side drop and a consumer-side pop never both claim a slot.
unsafe impl Sync for Inner {}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            (self.cap - tail) + head
        }
    }

    fn capacity(&self) -> usize {
        self.cap.saturating_sub(1)
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap { 0 } else { next }
    }
}

pub fn audio_queue(capacity: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity.saturating_add(1).max(2);
    let mut v: Vec<UnsafeCell<MaybeUninit<f32>>> = Vec::with_capacity(cap);
    for _ in 0..cap {
        v.push(UnsafeCell::new(MaybeUninit::uninit()));
    }

    let inner = Arc::new(Inner {
        buf: v.into_boxed_slice(),
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            inner: Arc::clone(&inner),
        },
        AudioConsumer { inner },
    )
}

impl AudioProducer {
    /// Push one sample. Returns false when the oldest sample had to be
    /// dropped to make room.
    #[inline]
    pub fn push(&self, sample: f32) -> bool {
        let mut lossless = true;
        loop {
            let head = self.inner.head.load(Ordering::Relaxed);
            let next = self.inner.next_index(head);
            let tail = self.inner.tail.load(Ordering::Acquire);
            if next == tail {
                // Full: retire the oldest sample. A failed CAS means the
                // consumer just popped it, which frees space either way.
                let _ = self.inner.tail.compare_exchange(
                    tail,
                    self.inner.next_index(tail),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                lossless = false;
                continue;
            }

            unsafe {
                (*self.inner.buf[head].get()).write(sample);
            }
            self.inner.head.store(next, Ordering::Release);
            return lossless;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop(&self) -> Option<f32> {
        loop {
            let tail = self.inner.tail.load(Ordering::Acquire);
            let head = self.inner.head.load(Ordering::Acquire);
            if tail == head {
                return None;
            }

            let sample = unsafe { (*self.inner.buf[tail].get()).assume_init_read() };
            let next = self.inner.next_index(tail);
            if self
                .inner
                .tail
                .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(sample);
            }
            // The producer dropped this sample out from under us; try the
            // next one.
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}
