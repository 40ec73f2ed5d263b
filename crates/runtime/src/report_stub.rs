//! Stub module for report operations when the "diagnostics" feature is disabled.
//!
//! These are no-op functions that ensure linking works regardless of feature flags.

/// No-op at-exit report when diagnostics is disabled
///
/// # Safety
/// Always safe to call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_report() {
    // No-op: diagnostics feature not enabled
}
