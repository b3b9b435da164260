use serde_json::json;

use crate::harness::spawn_server;

#[tokio::test]
async fn add_list_toggle_and_conditions() {
    let server = spawn_server();
    let mut client = server.client;
    client.initialize().await;

    let added = client
        .tool("vice.checkpoint.add", json!({ "start": 0x1000, "end": "$10FF", "store": true }))
        .await;
    assert_eq!(added["checkpoint_num"], 1);

    let list = client.tool("vice.checkpoint.list", json!({})).await;
    let cp = &list["checkpoints"][0];
    assert_eq!(cp["start"], 0x1000);
    assert_eq!(cp["end"], 0x10FF);
    assert_eq!(cp["check_store"], true);
    assert_eq!(cp["check_exec"], false);
    assert_eq!(cp["enabled"], true);

    client
        .tool("vice.checkpoint.toggle", json!({ "checkpoint_num": 1, "enabled": false }))
        .await;
    client
        .tool("vice.checkpoint.toggle", json!({ "checkpoint_num": 1, "enabled": true }))
        .await;
    let list = client.tool("vice.checkpoint.list", json!({})).await;
    assert_eq!(list["checkpoints"][0]["enabled"], true);

    let ok = client
        .tool("vice.checkpoint.set_condition", json!({ "checkpoint_num": 1, "condition": "A == $42" }))
        .await;
    assert_eq!(ok["status"], "ok");
    let error = client
        .tool_error("vice.checkpoint.set_condition", json!({ "checkpoint_num": 1, "condition": "Q == 1" }))
        .await;
    assert_eq!(error["code"], -32602);

    let error = client
        .tool_error("vice.checkpoint.delete", json!({ "checkpoint_num": 99 }))
        .await;
    assert_eq!(error["code"], -32602);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn group_toggle_skips_deleted_checkpoints() {
    let server = spawn_server();
    let mut client = server.client;

    for start in [0x1000, 0x2000, 0x3000] {
        client.tool("vice.checkpoint.add", json!({ "start": start })).await;
    }
    client
        .tool("vice.checkpoint.group.create", json!({ "name": "loops", "checkpoint_ids": [1, 2] }))
        .await;
    let added = client
        .tool("vice.checkpoint.group.add", json!({ "group": "loops", "checkpoint_ids": [3] }))
        .await;
    assert_eq!(added["added"], 1);

    client.tool("vice.checkpoint.delete", json!({ "checkpoint_num": 2 })).await;
    let toggled = client
        .tool("vice.checkpoint.group.toggle", json!({ "group": "loops", "enabled": false }))
        .await;
    assert_eq!(toggled["affected_count"], 2);

    let groups = client.tool("vice.checkpoint.group.list", json!({})).await;
    let group = &groups["groups"][0];
    assert_eq!(group["checkpoint_ids"], json!([1, 2, 3]));
    assert_eq!(group["enabled_count"], 0);
    assert_eq!(group["disabled_count"], 2);

    let error = client
        .tool_error("vice.checkpoint.group.create", json!({ "name": "loops" }))
        .await;
    assert_eq!(error["code"], -32602);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn running_into_a_checkpoint_stops_execution() {
    let server = spawn_server();
    let mut client = server.client;

    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0x0800 }))
        .await;
    client.tool("vice.checkpoint.add", json!({ "start": "$0840" })).await;
    client.tool("vice.execution.run", json!({})).await;
    client.wait_until_paused().await;

    let regs = client.tool("vice.registers.get", json!({})).await;
    assert_eq!(regs["PC"], 0x0840);
    let list = client.tool("vice.checkpoint.list", json!({})).await;
    assert_eq!(list["checkpoints"][0]["hit_count"], 1);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn run_until_resolves_symbols_and_cleans_up() {
    let server = spawn_server();
    let mut client = server.client;

    let labels = server.dir.path().join("game.sym");
    std::fs::write(&labels, "al C:0900 .main_loop\n").expect("write labels");
    client.tool("vice.symbols.load", json!({ "path": labels })).await;

    client
        .tool("vice.registers.set", json!({ "register": "PC", "value": 0x08F0 }))
        .await;
    let started = client.tool("vice.run_until", json!({ "address": "main_loop" })).await;
    assert_eq!(started["target_address"], 0x0900);
    assert_eq!(started["target_symbol"], "main_loop");
    client.wait_until_paused().await;

    let regs = client.tool("vice.registers.get", json!({})).await;
    assert_eq!(regs["PC"], 0x0900);
    let list = client.tool("vice.checkpoint.list", json!({})).await;
    assert_eq!(list["count"], 0);

    let backtrace = client.tool("vice.backtrace", json!({ "depth": 500 })).await;
    assert_eq!(backtrace["sp"], 0xFF);
    assert_eq!(backtrace["frame_count"], 0);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn watchpoints_are_checkpoints_on_memory_access() {
    let server = spawn_server();
    let mut client = server.client;

    let watch = client
        .tool("vice.watch.add", json!({ "address": "$D020", "size": 2, "type": "both" }))
        .await;
    assert_eq!(watch["checkpoint_num"], 1);

    let list = client.tool("vice.checkpoint.list", json!({})).await;
    let cp = &list["checkpoints"][0];
    assert_eq!(cp["start"], 0xD020);
    assert_eq!(cp["end"], 0xD021);
    assert_eq!(cp["check_load"], true);
    assert_eq!(cp["check_store"], true);
    assert_eq!(cp["check_exec"], false);

    client.shutdown(server.task).await;
}
