//! Runtime diagnostics for production debugging
//!
//! Provides a SIGQUIT (kill -3) handler that dumps runtime statistics to
//! stderr, similar to JVM thread dumps. This is useful for debugging
//! production issues without stopping the process.
//!
//! ## Usage
//!
//! Send SIGQUIT to a running compiled program:
//! ```bash
//! kill -3 <pid>
//! ```
//!
//! The process will dump diagnostics to stderr and continue running.
//!
//! ## Signal Safety
//!
//! Signal handlers can only safely call async-signal-safe functions. Our
//! dump_diagnostics() does I/O and acquires locks, which is NOT safe to call
//! directly from a signal handler. Instead, we spawn a dedicated thread that
//! waits for signals using signal-hook's iterator API, making all the I/O
//! operations safe.

use crate::context::{TOTAL_CONTEXTS_CREATED, TOTAL_MARKERS_MINTED, elapsed_ms};
use crate::effects::{TOTAL_CONTS_COMPOSED, TOTAL_YIELDS};
use std::sync::Once;
use std::sync::atomic::Ordering;
use tern_core::memory_stats::runtime_registry;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT signal handler for diagnostics
///
/// This is called automatically when the first context is created, but can
/// be called explicitly if needed. Safe to call multiple times (idempotent).
///
/// # Implementation
///
/// Uses a dedicated thread to handle signals safely. The signal-hook iterator
/// API ensures we're not calling non-async-signal-safe functions from within
/// a signal handler context.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        {
            use signal_hook::consts::SIGQUIT;
            use signal_hook::iterator::Signals;

            // Create signal iterator - this is safe and doesn't block
            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(_) => return, // Silently fail if we can't register
            };

            // Spawn a dedicated thread to handle signals
            // This thread blocks waiting for signals, then safely calls dump_diagnostics()
            std::thread::Builder::new()
                .name("tern-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_diagnostics();
                        }
                    }
                })
                .ok(); // Silently fail if thread spawn fails
        }

        #[cfg(not(unix))]
        {
            // Signal handling not supported on non-Unix platforms
            // Diagnostics can still be called directly via dump_diagnostics()
        }
    });
}

/// Dump runtime diagnostics to stderr
///
/// This can be called directly from code or triggered via SIGQUIT.
/// Output goes to stderr to avoid mixing with program output.
pub fn dump_diagnostics() {
    use std::io::Write;

    let mut out = std::io::stderr().lock();

    let _ = writeln!(out, "\n=== Tern Runtime Diagnostics ===");
    let _ = writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now());
    let _ = writeln!(out, "Uptime:    {} ms", elapsed_ms());

    let _ = writeln!(out, "\n[Effects]");
    let _ = writeln!(
        out,
        "  Contexts:       {} (total)",
        TOTAL_CONTEXTS_CREATED.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "  Markers minted: {}",
        TOTAL_MARKERS_MINTED.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "  Yields:         {}",
        TOTAL_YIELDS.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        out,
        "  Conts composed: {}",
        TOTAL_CONTS_COMPOSED.load(Ordering::Relaxed)
    );

    let _ = writeln!(out, "\n[Heap]");
    let registry = runtime_registry();
    let heap = registry.aggregate_stats();
    let _ = writeln!(
        out,
        "  Tracked threads: {} active, {} retired",
        heap.active_threads, heap.retired_threads
    );
    let _ = writeln!(out, "  Blocks:          {} live, {} peak", heap.live_blocks, heap.peak_live_blocks);
    let _ = writeln!(
        out,
        "  Allocated:       {} blocks, {} freed, {}",
        heap.total_blocks_allocated,
        heap.total_blocks_freed,
        format_bytes(heap.total_bytes_allocated)
    );
    let _ = writeln!(out, "  Orphan reuses:   {}", heap.total_orphan_reuses);
    if heap.overflow_count > 0 {
        let _ = writeln!(
            out,
            "  WARNING: {} threads exceeded registry capacity (heap not tracked)",
            heap.overflow_count
        );
        let _ = writeln!(
            out,
            "           Registry capacity is {} slots",
            registry.capacity()
        );
    }

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

/// Format bytes as human-readable string
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
