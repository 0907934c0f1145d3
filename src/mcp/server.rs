//! The stdio dispatch loop and method handlers.
//!
//! One JSON-RPC 2.0 message per line on stdin, one response per line on
//! stdout. The server never initiates traffic and never terminates on a
//! malformed message.

use anyhow::Result;
use huskycat_commons::ExitCode;
use huskycat_core::engine::{ValidationEngine, ValidationRequest};
use huskycat_core::mode::Mode;
use huskycat_core::progress::NoopSink;
use huskycat_core::results;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::context::StartupContext;
use crate::mcp::protocol::{
    self, INTERNAL_ERROR, INVALID_PARAMS, JsonRpcRequest, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::mcp::tasks::TaskTable;

pub struct ServerState {
    engine: Arc<ValidationEngine>,
    tasks: Arc<TaskTable>,
}

impl ServerState {
    pub fn new(engine: ValidationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tasks: Arc::new(TaskTable::new()),
        }
    }
}

/// Arguments accepted by every validation-shaped method.
#[derive(Debug, Default, Deserialize)]
struct ValidateParams {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    fix: Option<bool>,
}

impl ValidateParams {
    fn into_request(self) -> ValidationRequest {
        ValidationRequest {
            targets: self.path.map(PathBuf::from).into_iter().collect(),
            fix: self.fix.unwrap_or(false),
            ..ValidationRequest::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    #[serde(rename = "taskId")]
    task_id: String,
}

pub async fn run(explicit_mode: Option<Mode>) -> Result<ExitCode> {
    let context = StartupContext::resolve(explicit_mode, true)?;
    let engine = context.engine(context.adapter())?;
    let state = ServerState::new(engine);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(reply) = handle_line(&state, line).await {
            let mut payload = serde_json::to_vec(&reply)?;
            payload.push(b'\n');
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        }
    }
    Ok(ExitCode::Success)
}

/// Parse one wire line and dispatch it. Malformed JSON gets a parse-error
/// response; notifications get none.
pub async fn handle_line(state: &ServerState, line: &str) -> Option<Value> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(error) => {
            return Some(protocol::error_response(
                Value::Null,
                PARSE_ERROR,
                format!("malformed request: {error}"),
            ));
        }
    };
    handle_request(state, request).await
}

pub async fn handle_request(state: &ServerState, request: JsonRpcRequest) -> Option<Value> {
    if request.is_notification() {
        debug!(method = %request.method, "notification ignored");
        return None;
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    let result = match request.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "huskycat",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": {} },
        })),
        "tools/list" => Ok(json!({ "tools": tool_descriptors(state) })),
        "tools/call" => match request.parse_params::<ToolCallParams>() {
            Ok(params) => call_tool(state, params).await,
            Err(message) => {
                return Some(protocol::error_response(id, INVALID_PARAMS, message));
            }
        },
        "validate_async" => match request.parse_params::<ValidateParams>() {
            Ok(params) => {
                let task_id = state
                    .tasks
                    .spawn(Arc::clone(&state.engine), params.into_request())
                    .await;
                Ok(json!({ "taskId": task_id }))
            }
            Err(message) => {
                return Some(protocol::error_response(id, INVALID_PARAMS, message));
            }
        },
        "get_task_status" => match request.parse_params::<TaskParams>() {
            Ok(params) => match state.tasks.status(&params.task_id).await {
                Some((task_state, run)) => Ok(json!({
                    "state": task_state,
                    "result": run,
                })),
                None => Err(format!("unknown task {}", params.task_id)),
            },
            Err(message) => {
                return Some(protocol::error_response(id, INVALID_PARAMS, message));
            }
        },
        "cancel_async_task" => match request.parse_params::<TaskParams>() {
            Ok(params) => Ok(json!({
                "cancelled": state.tasks.cancel(&params.task_id).await
            })),
            Err(message) => {
                return Some(protocol::error_response(id, INVALID_PARAMS, message));
            }
        },
        other => {
            return Some(protocol::error_response(
                id,
                METHOD_NOT_FOUND,
                format!("unknown method `{other}`"),
            ));
        }
    };

    Some(match result {
        Ok(value) => protocol::response(id, value),
        Err(message) => protocol::error_response(id, INTERNAL_ERROR, message),
    })
}

/// Tool list: `validate`, `validate_staged`, and one `validate_<name>` per
/// registry entry, each with the stable `{path, fix?}` schema.
fn tool_descriptors(state: &ServerState) -> Vec<Value> {
    let mut tools = vec![
        descriptor("validate", "Validate a path with every matching tool"),
        descriptor("validate_staged", "Validate files staged for commit"),
    ];
    for name in state.engine.registry().names() {
        let description = state
            .engine
            .registry()
            .lookup(name)
            .map(|tool| tool.description.clone())
            .unwrap_or_default();
        tools.push(descriptor(
            &format!("validate_{name}"),
            &format!("Run {name} only: {description}"),
        ));
    }
    tools
}

fn descriptor(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to validate" },
                "fix": { "type": "boolean", "description": "Let supports-fix tools modify files" },
            },
            "required": [],
        },
    })
}

async fn call_tool(state: &ServerState, params: ToolCallParams) -> Result<Value, String> {
    let mut request = params
        .arguments
        .map(|arguments| {
            serde_json::from_value::<ValidateParams>(arguments).map(ValidateParams::into_request)
        })
        .transpose()
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    match params.name.as_str() {
        "validate" => {}
        "validate_staged" => request.staged = true,
        other => match other.strip_prefix("validate_") {
            Some(tool) if state.engine.registry().lookup(tool).is_some() => {
                request.only = vec![tool.to_string()];
            }
            _ => return Err(format!("unknown tool `{other}`")),
        },
    }

    let run = state
        .engine
        .run(&request, Arc::new(NoopSink), CancellationToken::new())
        .await
        .map_err(|e| e.to_string())?;

    let content = results::serialize(
        &run,
        huskycat_core::mode::OutputFormat::Jsonrpc,
        &state.engine.fixable_tools(),
    )
    .map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}
