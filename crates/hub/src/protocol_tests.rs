// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parse_single_object_body() -> anyhow::Result<()> {
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    match parse_body(body)? {
        IncomingBody::Single(raw) => {
            let req = validate_message(&raw).map_err(|_| anyhow::anyhow!("rejected"))?;
            assert_eq!(req.method, "initialize");
            assert_eq!(req.id, Some(RequestId::Num(1)));
            assert!(!req.is_notification());
        }
        IncomingBody::Batch(_) => anyhow::bail!("expected single"),
    }
    Ok(())
}

#[test]
fn parse_batch_body_preserves_order() -> anyhow::Result<()> {
    let body = br#"[
        {"jsonrpc":"2.0","id":1,"method":"tools/list"},
        {"jsonrpc":"2.0","method":"notifications/initialized"},
        {"jsonrpc":"2.0","id":"b","method":"ping"}
    ]"#;
    match parse_body(body)? {
        IncomingBody::Batch(items) => {
            assert_eq!(items.len(), 3);
            let first = validate_message(&items[0]).map_err(|_| anyhow::anyhow!("rejected"))?;
            let second = validate_message(&items[1]).map_err(|_| anyhow::anyhow!("rejected"))?;
            assert_eq!(first.method, "tools/list");
            assert!(second.is_notification());
        }
        IncomingBody::Single(_) => anyhow::bail!("expected batch"),
    }
    Ok(())
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert!(parse_body(b"{not json").is_err());
}

#[test]
fn wrong_version_is_invalid_request() {
    let raw = serde_json::json!({"jsonrpc": "1.0", "id": 7, "method": "ping"});
    let resp = match validate_message(&raw) {
        Err(resp) => resp,
        Ok(_) => unreachable!("jsonrpc 1.0 must be rejected"),
    };
    let err = resp.error.unwrap();
    assert_eq!(err.code, INVALID_REQUEST);
    // The salvaged ID correlates the error with the offending entry.
    assert_eq!(resp.id, serde_json::json!(7));
}

#[test]
fn non_object_batch_entry_is_invalid_request() {
    let raw = serde_json::json!("just a string");
    assert!(validate_message(&raw).is_err());
}

#[test]
fn error_response_serializes_null_id() -> anyhow::Result<()> {
    let resp = JsonRpcResponse::error(None, PARSE_ERROR, "Parse error");
    let text = serde_json::to_string(&resp)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(value["id"], serde_json::Value::Null);
    assert_eq!(value["error"]["code"], -32700);
    assert!(value.get("result").is_none());
    Ok(())
}

#[test]
fn result_response_omits_error_field() -> anyhow::Result<()> {
    let resp =
        JsonRpcResponse::result(Some(RequestId::Str("x".into())), serde_json::json!({"ok": true}));
    let value: serde_json::Value = serde_json::to_value(&resp)?;
    assert_eq!(value["id"], "x");
    assert!(value.get("error").is_none());
    Ok(())
}

#[test]
fn tool_info_uses_camel_case_schema_key() -> anyhow::Result<()> {
    let tool = ToolInfo {
        name: "run_script".into(),
        description: Some("Run a package script".into()),
        input_schema: Some(serde_json::json!({"type": "object"})),
    };
    let value = serde_json::to_value(&tool)?;
    assert!(value.get("inputSchema").is_some());
    assert!(value.get("input_schema").is_none());
    Ok(())
}
