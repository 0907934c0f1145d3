//! End-to-end agent transport: one JSON-RPC message per line over stdio.

use assert_cmd::Command;

fn mcp_lines(dir: &std::path::Path, input: &str) -> Vec<serde_json::Value> {
    let output = Command::cargo_bin("huskycat")
        .unwrap()
        .current_dir(dir)
        .env("HUSKYCAT_LOG", "error")
        .env("XDG_CACHE_HOME", dir.join("cache"))
        .arg("mcp-server")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn initialize_then_tools_list() {
    let dir = tempfile::tempdir().unwrap();
    let replies = mcp_lines(
        dir.path(),
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"protocolVersion\":\"2024-11-05\"}}\n\
         {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n",
    );

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[0]["result"]["serverInfo"]["name"], "huskycat");

    let tools = replies[1]["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    for expected in ["validate", "validate_staged", "validate_ruff-check", "validate_mypy"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    for tool in tools {
        assert_eq!(tool["inputSchema"]["properties"]["path"]["type"], "string");
        assert_eq!(tool["inputSchema"]["properties"]["fix"]["type"], "boolean");
    }
}

#[test]
fn malformed_message_does_not_terminate_the_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let replies = mcp_lines(
        dir.path(),
        "this is not json\n{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"tools/list\"}\n",
    );
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["error"]["code"], -32700);
    assert_eq!(replies[1]["id"], 9);
    assert!(replies[1]["result"]["tools"].is_array());
}

#[test]
fn tools_call_returns_text_content() {
    let dir = tempfile::tempdir().unwrap();
    let replies = mcp_lines(
        dir.path(),
        "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/call\",\"params\":{\"name\":\"validate\",\"arguments\":{\"path\":\".\"}}}\n",
    );
    assert_eq!(replies.len(), 1);
    let content = &replies[0]["result"]["content"][0];
    assert_eq!(content["type"], "text");
    let run: serde_json::Value =
        serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert!(run.get("run-id").is_some());
}
