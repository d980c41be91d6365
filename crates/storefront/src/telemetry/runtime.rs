//! Process-level gauges: live async tasks and heap bytes in use.
//!
//! The gauge names keep the `go_` prefix the existing dashboards query. Values
//! are sampled inside the metric collection callback only, so nothing runs
//! between collection ticks.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use opentelemetry::metrics::{Meter, ObservableGauge, Unit};

pub const GOROUTINES: &str = "go_goroutines";
pub const MEMORY_BYTES: &str = "go_memory_bytes";

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// System allocator wrapper that tracks bytes currently allocated.
/// Installed as `#[global_allocator]` in the binary.
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            let old_size = layout.size();
            if new_size > old_size {
                LIVE_BYTES.fetch_add(new_size - old_size, Ordering::Relaxed);
            } else {
                LIVE_BYTES.fetch_sub(old_size - new_size, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

/// Bytes currently allocated through [`TrackingAllocator`]. Zero when it is
/// not the global allocator.
pub fn allocated_bytes() -> usize {
    LIVE_BYTES.load(Ordering::Relaxed)
}

/// Source of the two process gauges.
pub trait RuntimeSampler: Send + Sync + 'static {
    fn heap_bytes(&self) -> i64;
    fn live_tasks(&self) -> i64;
}

/// Samples the Tokio runtime that was current at construction and the
/// tracking allocator.
pub struct ProcessSampler {
    runtime: tokio::runtime::Handle,
}

impl ProcessSampler {
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self {
            runtime: tokio::runtime::Handle::current(),
        }
    }
}

impl RuntimeSampler for ProcessSampler {
    fn heap_bytes(&self) -> i64 {
        i64::try_from(allocated_bytes()).unwrap_or(i64::MAX)
    }

    fn live_tasks(&self) -> i64 {
        i64::try_from(self.runtime.metrics().num_alive_tasks()).unwrap_or(i64::MAX)
    }
}

/// Owns the two observable gauges; keep it alive for as long as they should
/// be reported.
pub struct RuntimeObserver {
    _tasks: ObservableGauge<i64>,
    _heap: ObservableGauge<i64>,
}

impl RuntimeObserver {
    pub fn register<S: RuntimeSampler>(meter: &Meter, sampler: Arc<S>) -> Self {
        let tasks_sampler = Arc::clone(&sampler);
        let tasks = meter
            .i64_observable_gauge(GOROUTINES)
            .with_description("Live async tasks on the runtime")
            .with_callback(move |observer| observer.observe(tasks_sampler.live_tasks(), &[]))
            .init();

        let heap = meter
            .i64_observable_gauge(MEMORY_BYTES)
            .with_description("Heap bytes currently allocated")
            .with_unit(Unit::new("By"))
            .with_callback(move |observer| observer.observe(sampler.heap_bytes(), &[]))
            .init();

        Self {
            _tasks: tasks,
            _heap: heap,
        }
    }
}
