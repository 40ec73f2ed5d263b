//! At-exit report emission. TERN_REPORT is read once per process, so this
//! file carries a single test that walks the whole journey.

#![cfg(all(feature = "diagnostics", feature = "report-json"))]

use serial_test::serial;
use tern_runtime::block::size_of_block;
use tern_runtime::{Block, BoxVal, Tag, block_alloc, context, drop, report};

#[test]
#[serial]
fn test_report_writes_json_to_the_configured_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    unsafe {
        std::env::set_var("TERN_REPORT", format!("json:{}", path.display()));

        // touch the heap so the report has something to count
        let ctx = context();
        let b = block_alloc(size_of_block(1, 0), 1, Tag(90), ctx);
        Block::set_field(b, 0, BoxVal::from_int(1));
        drop(BoxVal::from_ptr(b as *mut u8), ctx);

        report();
        // the destination is parsed once and stays stable across emits
        report();
    }

    let body = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(body.trim()).unwrap();
    assert!(parsed["wall_clock_ms"].is_u64());
    assert!(parsed["blocks_allocated"].as_u64().unwrap() >= 1);
    assert!(parsed["blocks_freed"].as_u64().unwrap() >= 1);
    assert!(parsed["yields"].is_u64());
    assert!(parsed["tracked_threads"].is_u64());
}
