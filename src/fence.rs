// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::platform::HartArch;

/// Number of ranged fences a vCPU can have outstanding before further requests are escalated to
/// a full flush.
pub const FENCE_QUEUE_CAPACITY: usize = 16;

const PAGE_SIZE: u64 = 4096;

// Ranges spanning more pages than this are flushed wholesale.
const MAX_RANGED_PAGES: u64 = 64;

// Sticky requests, applied before anything in the ring.
const FENCE_I_ALL: u32 = 1 << 0;
const TLB_ALL: u32 = 1 << 1;

/// A remote fence requested against a vCPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceRequest {
    /// Synchronize the instruction stream.
    InstructionCache,
    /// Flush VS-stage translations in `[start, start + size)`.
    Tlb { start: u64, size: u64 },
    /// Flush VS-stage translations in `[start, start + size)` tagged with `asid`.
    TlbAsid { start: u64, size: u64, asid: u64 },
}

// A zero-length range at address zero, or a size of all ones, covers the whole address space.
fn is_whole_range(start: u64, size: u64) -> bool {
    (start == 0 && size == 0) || size == u64::MAX
}

// Returns the page addresses to flush for a range, or None if the whole space should be flushed.
fn range_pages(start: u64, size: u64) -> Option<impl Iterator<Item = u64>> {
    if is_whole_range(start, size) {
        return None;
    }
    let end = start.checked_add(size)?;
    let first = start & !(PAGE_SIZE - 1);
    let pages = end.checked_sub(first)?.div_ceil(PAGE_SIZE);
    if pages > MAX_RANGED_PAGES {
        return None;
    }
    Some((0..pages).map(move |i| first + i * PAGE_SIZE))
}

impl FenceRequest {
    /// Returns true if the request covers every address, making it equivalent to a sticky flush.
    fn is_global(&self) -> bool {
        match *self {
            FenceRequest::InstructionCache => true,
            FenceRequest::Tlb { start, size } => is_whole_range(start, size),
            FenceRequest::TlbAsid { .. } => false,
        }
    }

    fn sticky_bit(&self) -> u32 {
        match self {
            FenceRequest::InstructionCache => FENCE_I_ALL,
            FenceRequest::Tlb { .. } | FenceRequest::TlbAsid { .. } => TLB_ALL,
        }
    }

    fn apply<A: HartArch>(&self, arch: &A) {
        match *self {
            FenceRequest::InstructionCache => arch.fence_i(),
            FenceRequest::Tlb { start, size } => match range_pages(start, size) {
                Some(pages) => pages.for_each(|addr| arch.hfence_vvma(addr, None)),
                None => arch.hfence_vvma_all(),
            },
            FenceRequest::TlbAsid { start, size, asid } => match range_pages(start, size) {
                Some(pages) => pages.for_each(|addr| arch.hfence_vvma(addr, Some(asid))),
                None => arch.hfence_vvma_asid(asid),
            },
        }
    }
}

struct FenceRing {
    entries: [Option<FenceRequest>; FENCE_QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

/// The fences a vCPU must apply before it next enters the guest.
///
/// Any thread may add requests; only the thread running the vCPU drains them. Producers never
/// block on a full queue: the request is turned into a sticky full flush instead.
pub struct FenceQueue {
    ring: Mutex<FenceRing>,
    sticky: AtomicU32,
}

impl Default for FenceQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceQueue {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(FenceRing {
                entries: [None; FENCE_QUEUE_CAPACITY],
                head: 0,
                len: 0,
            }),
            sticky: AtomicU32::new(0),
        }
    }

    /// Appends `fence` to the ring. Returns false if the ring is full.
    pub fn enqueue(&self, fence: FenceRequest) -> bool {
        let mut ring = self.ring.lock();
        if ring.len == FENCE_QUEUE_CAPACITY {
            return false;
        }
        let tail = (ring.head + ring.len) % FENCE_QUEUE_CAPACITY;
        ring.entries[tail] = Some(fence);
        ring.len += 1;
        true
    }

    /// Removes the oldest request in the ring.
    pub fn dequeue(&self) -> Option<FenceRequest> {
        let mut ring = self.ring.lock();
        if ring.len == 0 {
            return None;
        }
        let head = ring.head;
        let fence = ring.entries[head].take();
        ring.head = (head + 1) % FENCE_QUEUE_CAPACITY;
        ring.len -= 1;
        fence
    }

    /// Records `fence` for the vCPU. Global requests set a sticky bit; ranged ones are queued,
    /// falling back to the sticky bit if the queue is full. Returns true in that last case.
    pub fn add(&self, fence: FenceRequest) -> bool {
        if fence.is_global() {
            self.sticky.fetch_or(fence.sticky_bit(), Ordering::AcqRel);
            return false;
        }
        if self.enqueue(fence) {
            return false;
        }
        self.sticky.fetch_or(fence.sticky_bit(), Ordering::AcqRel);
        true
    }

    /// Returns true if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.sticky.load(Ordering::Acquire) == 0 && self.ring.lock().len == 0
    }

    /// Discards everything outstanding.
    pub fn clear(&self) {
        self.sticky.store(0, Ordering::Release);
        let mut ring = self.ring.lock();
        ring.entries = [None; FENCE_QUEUE_CAPACITY];
        ring.head = 0;
        ring.len = 0;
    }

    /// Applies everything outstanding on the current hart: the sticky flushes first, then the
    /// ring in FIFO order. Queued requests already covered by a sticky flush are dropped.
    pub fn process<A: HartArch>(&self, arch: &A) {
        let sticky = self.sticky.swap(0, Ordering::AcqRel);
        if sticky & FENCE_I_ALL != 0 {
            arch.fence_i();
        }
        if sticky & TLB_ALL != 0 {
            arch.hfence_vvma_all();
        }
        while let Some(fence) = self.dequeue() {
            if sticky & fence.sticky_bit() == 0 {
                fence.apply(arch);
            }
        }
    }
}

/// Applies the fences outstanding in `queue` on the current hart.
pub fn process_fences<A: HartArch>(queue: &FenceQueue, arch: &A) {
    queue.process(arch)
}
