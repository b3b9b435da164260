use serde_json::json;

use crate::harness::spawn_server;

#[tokio::test]
async fn save_compare_and_restore() {
    let server = spawn_server();
    let mut client = server.client;

    client
        .tool("vice.memory.write", json!({ "address": "$C000", "data": [1, 2, 3, 4] }))
        .await;
    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0xC000 }))
        .await;
    let saved = client
        .tool("vice.snapshot.save", json!({ "name": "level-1", "description": "before the boss" }))
        .await;
    assert_eq!(saved["status"], "ok");
    assert_eq!(saved["description"], "before the boss");
    assert!(saved["path"].as_str().expect("path").ends_with("level-1.vsf"));

    let error = client
        .tool_error("vice.snapshot.save", json!({ "name": "level-1" }))
        .await;
    assert_eq!(error["code"], -32602);
    let error = client
        .tool_error("vice.snapshot.save", json!({ "name": "../escape" }))
        .await;
    assert_eq!(error["code"], -32602);

    client
        .tool("vice.memory.write", json!({ "address": "$C001", "data": [0xFF, 0xFE] }))
        .await;
    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0x1234 }))
        .await;

    let diff = client
        .tool(
            "vice.memory.compare",
            json!({ "mode": "snapshot", "snapshot_name": "level-1", "start": "$C000", "end": "$C003" }),
        )
        .await;
    assert_eq!(diff["total_differences"], 2);
    assert_eq!(diff["differences"][0]["address"], "$C001");
    assert_eq!(diff["differences"][0]["current"], 0xFF);
    assert_eq!(diff["differences"][0]["reference"], 2);

    let loaded = client.tool("vice.snapshot.load", json!({ "name": "level-1" })).await;
    assert_eq!(loaded["message"], "Snapshot loaded successfully");
    assert_eq!(loaded["description"], "before the boss");

    let read = client
        .tool("vice.memory.read", json!({ "address": "$C000", "size": 4 }))
        .await;
    assert_eq!(read["data"], json!(["01", "02", "03", "04"]));
    let regs = client.tool("vice.registers.get", json!({})).await;
    assert_eq!(regs["PC"], 0xC000);

    let listed = client.tool("vice.snapshot.list", json!({})).await;
    let names: Vec<&str> = listed["snapshots"]
        .as_array()
        .expect("snapshots")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(names, ["level-1"]);

    let error = client.tool_error("vice.snapshot.load", json!({ "name": "missing" })).await;
    assert_eq!(error["code"], -32602);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn checkpoint_hits_write_ring_snapshots() {
    let server = spawn_server();
    let mut client = server.client;

    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0x0800 }))
        .await;
    client.tool("vice.checkpoint.add", json!({ "start": "$0810" })).await;

    let error = client
        .tool_error("vice.checkpoint.set_auto_snapshot", json!({ "checkpoint_id": 7, "snapshot_prefix": "hit" }))
        .await;
    assert_eq!(error["code"], -32602);

    let configured = client
        .tool(
            "vice.checkpoint.set_auto_snapshot",
            json!({ "checkpoint_id": 1, "snapshot_prefix": "hit", "max_snapshots": 2 }),
        )
        .await;
    assert_eq!(configured["enabled"], true);
    assert_eq!(configured["max_snapshots"], 2);

    client.tool("vice.execution.run", json!({})).await;
    client.wait_until_paused().await;

    let snapshots = server.dir.path().join("snapshots");
    assert!(snapshots.join("hit_000.vsf").is_file());
    assert!(!snapshots.join("hit_001.vsf").exists());

    let cleared = client
        .tool("vice.checkpoint.clear_auto_snapshot", json!({ "checkpoint_id": 1 }))
        .await;
    assert_eq!(cleared["cleared"], true);

    client.shutdown(server.task).await;
}
