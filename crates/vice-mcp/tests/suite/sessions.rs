use serde_json::json;
use vice_mcp::interrupt_log::InterruptKind;
use vice_mcp::machine::headless::HeadlessMachine;
use vice_mcp::{registry, McpContext};

use crate::harness::spawn_server;

#[tokio::test]
async fn trace_records_instructions_inside_the_pc_window() {
    let server = spawn_server();
    let mut client = server.client;
    let short = server.dir.path().join("short.txt");
    let full = server.dir.path().join("full.txt");

    let first = client
        .tool(
            "vice.trace.start",
            json!({
                "output_file": short,
                "pc_filter_start": 0x1000,
                "pc_filter_end": 0x1003,
                "max_instructions": 0,
            }),
        )
        .await;
    assert_eq!(first["trace_id"], "trace_1");
    assert_eq!(first["max_instructions"], 1);

    let second = client
        .tool(
            "vice.trace.start",
            json!({
                "output_file": full,
                "pc_filter_start": 0x1000,
                "pc_filter_end": 0x1003,
                "max_instructions": 2_000_000,
                "include_registers": true,
            }),
        )
        .await;
    assert_eq!(second["trace_id"], "trace_2");
    assert_eq!(second["max_instructions"], 1_000_000);

    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0x1000 }))
        .await;
    client.tool("vice.execution.step", json!({ "count": 6 })).await;
    client.wait_until_paused().await;

    let stopped = client.tool("vice.trace.stop", json!({ "trace_id": "trace_1" })).await;
    assert_eq!(stopped["stopped"], true);
    assert_eq!(stopped["instructions_recorded"], 1);
    let stopped = client.tool("vice.trace.stop", json!({ "trace_id": "trace_2" })).await;
    assert_eq!(stopped["instructions_recorded"], 4);
    assert_eq!(stopped["cycles_elapsed"], 12);

    let again = client.tool("vice.trace.stop", json!({ "trace_id": "trace_1" })).await;
    assert_eq!(again["stopped"], false);

    assert_eq!(std::fs::read_to_string(&short).expect("short trace"), "$1000\n");
    let lines: Vec<String> = std::fs::read_to_string(&full)
        .expect("full trace")
        .lines()
        .map(str::to_owned)
        .collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("$1000 A="), "{}", lines[0]);
    assert!(lines[3].starts_with("$1003 "), "{}", lines[3]);

    let error = client
        .tool_error(
            "vice.trace.start",
            json!({ "output_file": "x.txt", "pc_filter_start": 0x2000, "pc_filter_end": 0x1000 }),
        )
        .await;
    assert_eq!(error["code"], -32602);

    client.shutdown(server.task).await;
}

#[test]
fn interrupt_log_filters_caps_and_pages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());

    let started = registry::dispatch(
        &mut ctx,
        "vice.interrupt.log.start",
        json!({ "types": ["irq"], "max_entries": 2 }),
    )
    .expect("start");
    assert_eq!(started["log_id"], "intlog_1");
    assert_eq!(started["types"], json!(["irq"]));

    for _ in 0..3 {
        ctx.on_interrupt(InterruptKind::Irq, 0x0810, 0xFFFE, 0xEA31);
    }
    ctx.on_interrupt(InterruptKind::Nmi, 0x0810, 0xFFFA, 0xFE43);

    let read = registry::dispatch(&mut ctx, "vice.interrupt.log.read", json!({ "log_id": "intlog_1" }))
        .expect("read");
    assert_eq!(read["entries"].as_array().map(Vec::len), Some(2));
    assert_eq!(read["entries"][0]["type"], "irq");
    assert_eq!(read["entries"][0]["handler_address"], 0xEA31);
    assert_eq!(read["next_index"], 2);

    let past_end = registry::dispatch(
        &mut ctx,
        "vice.interrupt.log.read",
        json!({ "log_id": "intlog_1", "since_index": 10 }),
    )
    .expect("read past end");
    assert_eq!(past_end["entries"], json!([]));
    assert_eq!(past_end["next_index"], past_end["total_entries"]);

    let stopped = registry::dispatch(&mut ctx, "vice.interrupt.log.stop", json!({ "log_id": "intlog_1" }))
        .expect("stop");
    assert_eq!(stopped["stopped"], true);
    assert_eq!(stopped["total_interrupts"], 3);

    let err = registry::dispatch(&mut ctx, "vice.interrupt.log.read", json!({ "log_id": "intlog_1" }))
        .unwrap_err();
    assert_eq!(err.code.code(), -32602);

    let err = registry::dispatch(&mut ctx, "vice.interrupt.log.start", json!({ "types": ["reset"] }))
        .unwrap_err();
    assert_eq!(err.code.code(), -32602);
}
