use serde_json::json;

use crate::harness::spawn_server;

#[tokio::test]
async fn fill_repeats_the_pattern_across_the_range() {
    let server = spawn_server();
    let mut client = server.client;

    let filled = client
        .tool("vice.memory.fill", json!({ "start": "$C000", "end": "$C004", "pattern": [0xAA, 0x55] }))
        .await;
    assert_eq!(filled["bytes_written"], 5);

    let read = client
        .tool("vice.memory.read", json!({ "address": "$C000", "size": 6 }))
        .await;
    assert_eq!(read["data"], json!(["AA", "55", "AA", "55", "AA", "00"]));

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn search_and_compare_ranges() {
    let server = spawn_server();
    let mut client = server.client;

    client
        .tool("vice.memory.write", json!({ "address": 0x2000, "data": [0xA9, 0x01, 0x8D] }))
        .await;
    client
        .tool("vice.memory.write", json!({ "address": 0x3000, "data": [0xA9, 0x02, 0x8D] }))
        .await;

    let found = client
        .tool(
            "vice.memory.search",
            json!({ "start": 0x1000, "end": 0x4000, "pattern": [0xA9, 0x00], "mask": [0xFF, 0x00] }),
        )
        .await;
    assert_eq!(found["matches"], json!(["$2000", "$3000"]));
    assert_eq!(found["total_matches"], 2);
    assert_eq!(found["truncated"], false);

    let diff = client
        .tool(
            "vice.memory.compare",
            json!({ "mode": "ranges", "range1_start": 0x2000, "range1_end": 0x2002, "range2_start": 0x3000 }),
        )
        .await;
    assert_eq!(diff["total_differences"], 1);
    assert_eq!(diff["differences"][0]["address"], "$2001");
    assert_eq!(diff["differences"][0]["current"], 0x01);
    assert_eq!(diff["differences"][0]["reference"], 0x02);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn writes_are_refused_while_running() {
    let server = spawn_server();
    let mut client = server.client;

    client.tool("vice.execution.run", json!({})).await;
    let error = client
        .tool_error("vice.memory.write", json!({ "address": 0x1000, "data": [1] }))
        .await;
    assert_eq!(error["code"], -32001);
    let error = client
        .tool_error("vice.registers.set", json!({ "register": "A", "value": 1 }))
        .await;
    assert_eq!(error["code"], -32001);

    // Reads are still served between instructions.
    let read = client
        .tool("vice.memory.read", json!({ "address": 0, "size": 1 }))
        .await;
    assert_eq!(read["size"], 1);

    client.tool("vice.execution.pause", json!({})).await;
    client
        .tool("vice.memory.write", json!({ "address": 0x1000, "data": [1] }))
        .await;

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn stopwatch_counts_cycles_while_stepping() {
    let server = spawn_server();
    let mut client = server.client;

    client.tool("vice.cycles.stopwatch", json!({ "action": "reset" })).await;
    client.tool("vice.execution.step", json!({ "count": 10 })).await;
    client.wait_until_paused().await;

    let elapsed = client
        .tool("vice.cycles.stopwatch", json!({ "action": "read" }))
        .await;
    assert_eq!(elapsed["cycles"], 20);
    assert_eq!(elapsed["memspace"], "computer");

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn memory_map_and_machine_reset() {
    let server = spawn_server();
    let mut client = server.client;

    let map = client
        .tool("vice.memory.map", json!({ "start": "$D000", "end": "$DFFF" }))
        .await;
    assert_eq!(map["region_count"], 7);
    assert_eq!(map["regions"][0]["name"], "VIC-II");
    assert_eq!(map["regions"][0]["type"], "io");

    client
        .tool("vice.memory.write", json!({ "address": "$FFFC", "data": [0x00, 0xC0] }))
        .await;
    let reset = client
        .tool("vice.machine.reset", json!({ "mode": "soft", "run_after": false }))
        .await;
    assert_eq!(reset["message"], "Machine reset (CPU)");
    let regs = client.tool("vice.registers.get", json!({})).await;
    assert_eq!(regs["PC"], 0xC000);
    assert_eq!(client.tool("vice.ping", json!({})).await["execution"], "paused");

    client.tool("vice.machine.reset", json!({ "mode": "hard" })).await;
    assert_eq!(client.tool("vice.ping", json!({})).await["execution"], "running");
    client.tool("vice.execution.pause", json!({})).await;
    let read = client
        .tool("vice.memory.read", json!({ "address": "$FFFC", "size": 2 }))
        .await;
    assert_eq!(read["data"], json!(["00", "00"]));

    client.shutdown(server.task).await;
}
