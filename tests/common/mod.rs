//! Shared test helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use runline::error::RunlineError;
use runline::tools::FnTool;
use serde_json::{json, Value};

/// A tool that counts its invocations and answers with `response`.
pub fn counting_tool(
    name: &str,
    response: fn(u32) -> Result<Value, RunlineError>,
) -> (FnTool, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let tool = FnTool::new(name, "test tool", move |_input| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { response(call) }
    });
    (tool, calls)
}

/// A tool that never completes.
pub fn hanging_tool(name: &str) -> (FnTool, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let tool = FnTool::new(name, "never returns", move |_input| {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Result<Value, RunlineError>>()
    });
    (tool, calls)
}

pub fn ok(_call: u32) -> Result<Value, RunlineError> {
    Ok(json!({ "ok": true }))
}
