use serde_json::json;

use crate::harness::spawn_server;

#[tokio::test]
async fn initialize_and_list_tools() {
    let server = spawn_server();
    let mut client = server.client;

    let response = client.request("initialize", json!({})).await;
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2025-11-25");
    assert_eq!(result["serverInfo"]["name"], "VICE MCP");
    assert_eq!(result["serverInfo"]["version"], vice_mcp::VERSION);
    assert_eq!(result["capabilities"], json!({ "logging": {}, "tools": { "listChanged": true } }));

    // Notifications get no reply; the next line read belongs to tools/list.
    client.notify("notifications/initialized", json!({})).await;
    let response = client.request("tools/list", json!({})).await;
    let tools = response["result"]["tools"].as_array().expect("tools");
    assert_eq!(response["result"]["count"], tools.len());
    let names: Vec<&str> = tools.iter().filter_map(|tool| tool["name"].as_str()).collect();
    for expected in [
        "vice.ping",
        "vice.checkpoint.add",
        "vice.checkpoint.group.toggle",
        "vice.trace.start",
        "vice.interrupt.log.read",
        "vice.snapshot.list",
        "vice.memory.compare",
    ] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    assert!(tools.iter().all(|tool| tool["inputSchema"]["type"] == "object"));

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn unsupported_protocol_version_is_invalid_params() {
    let server = spawn_server();
    let mut client = server.client;

    let response = client
        .request("initialize", json!({ "protocolVersion": "2023-01-01" }))
        .await;
    assert_eq!(response["error"]["code"], -32602);

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn malformed_requests_get_structured_errors() {
    let server = spawn_server();
    let mut client = server.client;

    client.send_raw("{not json").await;
    let response = client.recv().await.expect("parse error");
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["id"].is_null());

    client.send_raw("[1,2,3]").await;
    let response = client.recv().await.expect("invalid request");
    assert_eq!(response["error"]["code"], -32600);

    client.send_raw(r#"{"jsonrpc":"2.0","id":9}"#).await;
    let response = client.recv().await.expect("missing method");
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(response["id"], 9);

    let response = client.request("vice.nonexistent", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);

    let long_name = "v".repeat(1000);
    let response = client.request(&long_name, json!({})).await;
    assert_eq!(response["error"]["code"], -32600);

    let error = client.tool_error("vice.nonexistent", json!({})).await;
    assert_eq!(error["code"], -32601);
    assert_eq!(error["message"], "Tool not found");

    let response = client.request("tools/call", json!({ "arguments": {} })).await;
    assert_eq!(response["error"]["code"], -32602);
    assert_eq!(response["error"]["message"], "Missing 'name' parameter");

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn tools_answer_as_direct_methods_and_through_tools_call() {
    let server = spawn_server();
    let mut client = server.client;
    client.initialize().await;

    let response = client.request("vice.ping", json!({})).await;
    assert_eq!(response["result"]["status"], "ok");
    assert_eq!(response["result"]["machine"], "C64");

    let pong = client.tool("vice.ping", json!({})).await;
    assert_eq!(pong["version"], vice_mcp::VERSION);

    let response = client
        .request("tools/call", json!({ "name": "vice.ping" }))
        .await;
    let text = response["result"]["content"][0]["text"].as_str().expect("text");
    assert!(!text.contains('\n'), "envelope text is compact JSON");

    client.shutdown(server.task).await;
}

#[tokio::test]
async fn oversized_lines_close_the_connection() {
    let server = spawn_server();
    let mut client = server.client;

    let huge = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"vice.ping","params":{{"pad":"{}"}}}}"#, "x".repeat(vice_mcp::rpc::MAX_LINE_BYTES));
    client.send_raw(&huge).await;
    let response = client.recv().await.expect("error response");
    assert_eq!(response["error"]["code"], -32600);
    assert!(client.recv().await.is_none(), "connection closed after oversized line");

    let outcome = server.task.await.expect("server task");
    assert!(matches!(outcome, Err(vice_mcp::TransportError::LineTooLong)));
}
