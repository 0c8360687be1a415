//! Stdio tool server.
//!
//! Fronts the session controller with newline-delimited JSON-RPC 2.0 over
//! stdin/stdout so MCP-style clients can drive the engine. Each tool is a
//! thin wrapper over the session API.

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::AgentConfig;
use crate::engine::session::{SessionController, WaitOptions};
use crate::errors::{TapwrightError, TapwrightResult};

pub struct ToolServer {
    controller: SessionController,
}

impl ToolServer {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    /// Serve until stdin closes.
    pub async fn serve(mut self) -> TapwrightResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = tokio::io::stdout();

        tracing::info!("tool server listening on stdio");
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Value>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => error_response(Value::Null, -32700, &format!("parse error: {e}")),
            };
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
        tracing::info!("stdin closed, tool server exiting");
        Ok(())
    }

    async fn handle_request(&mut self, request: Value) -> Value {
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default().to_string();

        match method.as_str() {
            "initialize" => result_response(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": { "name": "tapwright", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": { "tools": {} }
                }),
            ),
            "tools/list" => result_response(id, json!({ "tools": tool_definitions() })),
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default().to_string();
                let args = request["params"]["arguments"].clone();
                match self.call_tool(&name, &args).await {
                    Ok(result) => result_response(
                        id,
                        json!({
                            "content": [{
                                "type": "text",
                                "text": result.to_string()
                            }]
                        }),
                    ),
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "tool call failed");
                        result_response(
                            id,
                            json!({
                                "isError": true,
                                "content": [{ "type": "text", "text": e.to_string() }]
                            }),
                        )
                    }
                }
            }
            other => error_response(id, -32601, &format!("unknown method '{other}'")),
        }
    }

    async fn call_tool(&mut self, name: &str, args: &Value) -> TapwrightResult<Value> {
        match name {
            "start_session" => {
                let task = args["task"].as_str().unwrap_or("interactive session");
                let session = self.controller.start_session(task).await?;
                Ok(json!({ "session_id": session.id, "task": session.task }))
            }
            "stop_session" => {
                let success = match &args["status"] {
                    Value::Bool(b) => *b,
                    Value::String(s) => matches!(s.as_str(), "passed" | "success" | "ok"),
                    _ => true,
                };
                let session = self.controller.stop_session(success).await?;
                Ok(serde_json::to_value(&session)?)
            }
            "execute" => {
                let instruction = args["instruction"].as_str().ok_or_else(|| {
                    TapwrightError::Config("execute requires 'instruction'".into())
                })?;
                let pure_vision = args["visionMode"].as_str() == Some("pure");
                let step = if pure_vision {
                    let saved = self.controller.config().clone();
                    let mut forced = saved.clone();
                    forced.vision.pure_vision_only = true;
                    self.controller.reconfigure(forced);
                    let result = self.controller.execute(instruction).await;
                    self.controller.reconfigure(saved);
                    result?
                } else {
                    self.controller.execute(instruction).await?
                };
                Ok(serde_json::to_value(&step)?)
            }
            "assert" => {
                let condition = args["condition"].as_str().ok_or_else(|| {
                    TapwrightError::Config("assert requires 'condition'".into())
                })?;
                let passed = self.controller.assert(condition).await?;
                Ok(json!({ "passed": passed }))
            }
            "wait_for_condition" => {
                let condition = args["condition"].as_str().ok_or_else(|| {
                    TapwrightError::Config("wait_for_condition requires 'condition'".into())
                })?;
                let mut options = WaitOptions::default();
                if let Some(t) = args["timeoutMs"].as_u64() {
                    options.timeout_ms = t;
                }
                if let Some(p) = args["pollMs"].as_u64() {
                    options.poll_ms = p;
                }
                let passed = self.controller.wait_for_condition(condition, options).await?;
                Ok(json!({ "passed": passed }))
            }
            "take_screenshot" => {
                let b64 = self.controller.take_screenshot().await?;
                if args["saveToFile"].as_bool().unwrap_or(false) {
                    let dir = self.controller.config().artifacts_dir().ok_or_else(|| {
                        TapwrightError::Config(
                            "saveToFile requires a configured artifacts dir".into(),
                        )
                    })?;
                    std::fs::create_dir_all(&dir)?;
                    let path = dir.join(format!(
                        "screenshot_{}.png",
                        chrono::Utc::now().format("%Y%m%d_%H%M%S")
                    ));
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(b64.trim())
                        .map_err(|e| {
                            TapwrightError::Perception(format!("screenshot decode: {e}"))
                        })?;
                    std::fs::write(&path, bytes)?;
                    Ok(json!({ "path": path.display().to_string() }))
                } else {
                    Ok(json!({ "screenshot_base64": b64 }))
                }
            }
            "get_state" => {
                let include_screenshot = args["includeScreenshot"].as_bool().unwrap_or(false);
                let state = self.controller.get_current_state(include_screenshot).await?;
                Ok(serde_json::to_value(&state)?)
            }
            "configure" => {
                // Partial update: overlay the supplied keys on the current
                // config and rebind.
                let mut merged = serde_json::to_value(self.controller.config())?;
                merge_json(&mut merged, args);
                let config: AgentConfig = serde_json::from_value(merged)?;
                self.controller.reconfigure(config.clone());
                Ok(serde_json::to_value(&config)?)
            }
            other => Err(TapwrightError::Config(format!("unknown tool '{other}'"))),
        }
    }
}

fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => {
            if !overlay_value.is_null() {
                *base_slot = overlay_value.clone();
            }
        }
    }
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "start_session",
            "description": "Open an automation session against the connected device",
            "inputSchema": {
                "type": "object",
                "properties": { "task": { "type": "string" } }
            }
        }),
        json!({
            "name": "stop_session",
            "description": "Seal the current session with a final status",
            "inputSchema": {
                "type": "object",
                "properties": { "status": { "type": "string" } }
            }
        }),
        json!({
            "name": "execute",
            "description": "Decide and execute one natural-language instruction",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "instruction": { "type": "string" },
                    "visionMode": { "type": "string", "enum": ["auto", "pure"] }
                },
                "required": ["instruction"]
            }
        }),
        json!({
            "name": "assert",
            "description": "Verify a natural-language condition against the current screen",
            "inputSchema": {
                "type": "object",
                "properties": { "condition": { "type": "string" } },
                "required": ["condition"]
            }
        }),
        json!({
            "name": "wait_for_condition",
            "description": "Poll a natural-language condition until it passes or times out",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "condition": { "type": "string" },
                    "timeoutMs": { "type": "integer" },
                    "pollMs": { "type": "integer" }
                },
                "required": ["condition"]
            }
        }),
        json!({
            "name": "take_screenshot",
            "description": "Capture a raw device screenshot",
            "inputSchema": {
                "type": "object",
                "properties": { "saveToFile": { "type": "boolean" } }
            }
        }),
        json!({
            "name": "get_state",
            "description": "Snapshot the current UI state",
            "inputSchema": {
                "type": "object",
                "properties": { "includeScreenshot": { "type": "boolean" } }
            }
        }),
        json!({
            "name": "configure",
            "description": "Apply a partial engine configuration update",
            "inputSchema": { "type": "object" }
        }),
    ]
}
