//! Progress-callback trait for pipeline stage and page events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessingConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline moves through its stages and pages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a job record, or
//! a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The [`crate::jobs::JobTracker`] uses
//! exactly this seam to mirror stage progress into polled job snapshots.
//!
//! # Example
//!
//! ```rust
//! use pdfocr::{ProcessingProgressCallback, ProcessingConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, region_count: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done} done; page {page_num}/{total_pages} had {region_count} regions");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ProcessingConfig::builder()
//!     .progress_callback(counter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use crate::process::ProcessingStage;

/// Called by the pipeline as it advances through stages and pages.
///
/// Implementations must be `Send + Sync` (document runs are driven from
/// spawned tasks, and batches run several documents at once). All methods
/// have default no-op implementations so callers only override what they
/// care about.
///
/// # Thread safety
///
/// Within one document, events arrive sequentially. Across a batch,
/// different documents' events interleave from different tasks, so shared
/// mutable state needs its own synchronisation (`Mutex`, atomics).
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once after validation, when the page count is known.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called whenever overall progress moves: on entering a stage and on
    /// per-page increments within a stage.
    ///
    /// `percent` is monotonic non-decreasing over a run: validating ≈5,
    /// metadata ≈10, rasterising 20→50, enhancing 50→70, extracting 70→90,
    /// postprocessing ≈90, finalised 100.
    fn on_stage_change(&self, stage: ProcessingStage, percent: u8) {
        let _ = (stage, percent);
    }

    /// Called just before a page image is handed to the detector.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page's regions have been normalised.
    ///
    /// `region_count` is the number of canonical regions kept for the page
    /// (zero for blank or degraded pages).
    fn on_page_complete(&self, page_num: usize, total_pages: usize, region_count: usize) {
        let _ = (page_num, total_pages, region_count);
    }

    /// Called when a page degrades (placeholder raster, failed detection).
    ///
    /// The payload is an owned `String` so implementations can move it into
    /// channels or spawned tasks without borrowing from the pipeline.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: String) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessingConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: Arc<AtomicUsize>,
        completes: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
        last_percent: Arc<AtomicU8>,
        success_total: Arc<AtomicUsize>,
    }

    impl ProcessingProgressCallback for TrackingCallback {
        fn on_stage_change(&self, _stage: ProcessingStage, percent: u8) {
            self.last_percent.store(percent, Ordering::SeqCst);
        }

        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _region_count: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: String) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _total_pages: usize, success_count: usize) {
            self.success_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_document_start(5);
        cb.on_stage_change(ProcessingStage::Rasterizing, 20);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, 3);
        cb.on_page_error(2, 5, "some error".into());
        cb.on_document_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: Arc::new(AtomicUsize::new(0)),
            completes: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            last_percent: Arc::new(AtomicU8::new(0)),
            success_total: Arc::new(AtomicUsize::new(0)),
        };

        tracker.on_stage_change(ProcessingStage::Extracting, 70);
        assert_eq!(tracker.last_percent.load(Ordering::SeqCst), 70);

        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, 4);
        tracker.on_page_start(2, 3);
        tracker.on_page_complete(2, 3, 0);
        tracker.on_page_start(3, 3);
        tracker.on_page_error(3, 3, "detector crashed".into());

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_document_complete(3, 2);
        assert_eq!(tracker.success_total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ProcessingProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_document_start(10);
        cb.on_page_start(1, 10);
        cb.on_page_complete(1, 10, 2);
    }
}
