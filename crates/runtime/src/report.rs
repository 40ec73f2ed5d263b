//! At-exit report for compiled programs
//!
//! Dumps runtime KPIs when the program finishes, controlled by the
//! `TERN_REPORT` env var:
//! - Unset → no report, zero cost
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! ## Feature Flag
//!
//! This module requires the `diagnostics` feature (enabled by default).
//! When disabled, `report_stub.rs` provides no-op FFI symbols.

#![cfg(feature = "diagnostics")]

use crate::context::{TOTAL_CONTEXTS_CREATED, TOTAL_MARKERS_MINTED, elapsed_ms};
use crate::effects::{TOTAL_CONTS_COMPOSED, TOTAL_YIELDS};
use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::Ordering;
use tern_core::memory_stats::runtime_registry;

// =============================================================================
// Report Configuration (parsed from TERN_REPORT env var)
// =============================================================================

/// Output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from TERN_REPORT environment variable
    pub fn from_env() -> Option<Self> {
        let val = std::env::var("TERN_REPORT").ok()?;
        if val.is_empty() {
            return None;
        }
        Self::parse(&val)
    }

    fn parse(val: &str) -> Option<Self> {
        match val {
            "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                eprintln!("Warning: TERN_REPORT='{}' not recognized, ignoring", val);
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

// =============================================================================
// Report Data
// =============================================================================

/// Collected metrics for the report
#[derive(Debug)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub contexts_created: u64,
    pub markers_minted: u64,
    pub yields: u64,
    pub conts_composed: u64,
    pub tracked_threads: usize,
    pub retired_threads: u64,
    pub blocks_allocated: u64,
    pub blocks_freed: u64,
    pub bytes_allocated: u64,
    pub live_blocks: u64,
    pub peak_live_blocks: u64,
    pub orphan_reuses: u64,
}

/// Collect all metrics
fn collect_report_data() -> ReportData {
    let heap = runtime_registry().aggregate_stats();

    ReportData {
        wall_clock_ms: elapsed_ms() as u64,
        contexts_created: TOTAL_CONTEXTS_CREATED.load(Ordering::Relaxed),
        markers_minted: TOTAL_MARKERS_MINTED.load(Ordering::Relaxed),
        yields: TOTAL_YIELDS.load(Ordering::Relaxed),
        conts_composed: TOTAL_CONTS_COMPOSED.load(Ordering::Relaxed),
        tracked_threads: heap.active_threads,
        retired_threads: heap.retired_threads,
        blocks_allocated: heap.total_blocks_allocated,
        blocks_freed: heap.total_blocks_freed,
        bytes_allocated: heap.total_bytes_allocated,
        live_blocks: heap.live_blocks,
        peak_live_blocks: heap.peak_live_blocks,
        orphan_reuses: heap.total_orphan_reuses,
    }
}

// =============================================================================
// Formatting
// =============================================================================

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== TERN REPORT ===\n");
    out.push_str(&format!("Wall clock:       {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Contexts:         {}\n", data.contexts_created));
    out.push_str(&format!("Markers minted:   {}\n", data.markers_minted));
    out.push_str(&format!("Yields:           {}\n", data.yields));
    out.push_str(&format!("Conts composed:   {}\n", data.conts_composed));
    out.push_str(&format!(
        "Threads:          {} tracked, {} retired\n",
        data.tracked_threads, data.retired_threads
    ));
    out.push_str(&format!("Blocks allocated: {}\n", data.blocks_allocated));
    out.push_str(&format!("Blocks freed:     {}\n", data.blocks_freed));
    out.push_str(&format!("Blocks live:      {}\n", data.live_blocks));
    out.push_str(&format!("Blocks peak:      {}\n", data.peak_live_blocks));
    out.push_str(&format!("Bytes allocated:  {}\n", data.bytes_allocated));
    out.push_str(&format!("Orphan reuses:    {}\n", data.orphan_reuses));
    out.push_str("===================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &ReportData) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "wall_clock_ms".into(),
        serde_json::Value::Number(data.wall_clock_ms.into()),
    );
    map.insert(
        "contexts_created".into(),
        serde_json::Value::Number(data.contexts_created.into()),
    );
    map.insert(
        "markers_minted".into(),
        serde_json::Value::Number(data.markers_minted.into()),
    );
    map.insert(
        "yields".into(),
        serde_json::Value::Number(data.yields.into()),
    );
    map.insert(
        "conts_composed".into(),
        serde_json::Value::Number(data.conts_composed.into()),
    );
    map.insert(
        "tracked_threads".into(),
        serde_json::Value::Number((data.tracked_threads as u64).into()),
    );
    map.insert(
        "retired_threads".into(),
        serde_json::Value::Number(data.retired_threads.into()),
    );
    map.insert(
        "blocks_allocated".into(),
        serde_json::Value::Number(data.blocks_allocated.into()),
    );
    map.insert(
        "blocks_freed".into(),
        serde_json::Value::Number(data.blocks_freed.into()),
    );
    map.insert(
        "bytes_allocated".into(),
        serde_json::Value::Number(data.bytes_allocated.into()),
    );
    map.insert(
        "live_blocks".into(),
        serde_json::Value::Number(data.live_blocks.into()),
    );
    map.insert(
        "peak_live_blocks".into(),
        serde_json::Value::Number(data.peak_live_blocks.into()),
    );
    map.insert(
        "orphan_reuses".into(),
        serde_json::Value::Number(data.orphan_reuses.into()),
    );

    let obj = serde_json::Value::Object(map);
    serde_json::to_string(&obj).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(_data: &ReportData) -> String {
    eprintln!(
        "Warning: TERN_REPORT=json requires the 'report-json' feature. Falling back to human format."
    );
    format_human(_data)
}

// =============================================================================
// Emit
// =============================================================================

fn emit_report() {
    let config = match get_report_config() {
        Some(c) => c,
        None => return,
    };

    let data = collect_report_data();

    let output = match config.format {
        ReportFormat::Human => format_human(&data),
        ReportFormat::Json => format_json(&data),
    };

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(output.as_bytes());
            } else {
                eprintln!("Warning: could not write report to {}", path);
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

// =============================================================================
// FFI Entry Points
// =============================================================================

/// At-exit report, called from generated main after the program's result is
/// produced.
///
/// # Safety
/// Safe to call from any context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_report() {
    emit_report();
}

// =============================================================================
// Tests
// =============================================================================
