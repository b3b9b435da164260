//! Static tool table and the protocol-level methods.
//!
//! Tools are registered once, in the order `tools/list` reports them. Every
//! entry carries its handler and the schema of its parameter struct.

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{error_code_of, ErrorCode, ToolError, ToolResult};
use crate::params::{self, parse_params, schema_of, NoParams};
use crate::{checkpoint, debug, execution, interrupt_log, memory, registers, snapshot, symbols, trace};

/// Longest method or tool name the dispatcher will look up.
pub const MAX_METHOD_NAME_LEN: usize = 256;

pub const PROTOCOL_VERSION: &str = "2025-11-25";
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-11-25", "2025-06-18", "2024-11-05"];
const DEFAULT_CLIENT_PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "VICE MCP";

pub type ToolHandler = fn(&mut McpContext, Value) -> ToolResult;

pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub handler: ToolHandler,
    schema: fn() -> Value,
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

macro_rules! tool {
    ($name:literal, $description:literal, $handler:path, $params:ty) => {
        ToolDescriptor {
            name: $name,
            description: $description,
            handler: $handler,
            schema: schema_of::<$params>,
        }
    };
}

pub static TOOLS: &[ToolDescriptor] = &[
    tool!("vice.ping", "Check if VICE is responding", execution::ping, NoParams),
    tool!("vice.execution.run", "Resume execution", execution::execution_run, NoParams),
    tool!("vice.execution.pause", "Pause execution", execution::execution_pause, NoParams),
    tool!(
        "vice.execution.step",
        "Step one or more instructions, optionally stepping over subroutine calls",
        execution::execution_step,
        params::ExecutionStep
    ),
    tool!(
        "vice.run_until",
        "Run until execution reaches an address",
        execution::run_until,
        params::RunUntil
    ),
    tool!(
        "vice.machine.reset",
        "Reset the machine (soft CPU reset or hard power cycle)",
        execution::machine_reset,
        params::MachineReset
    ),
    tool!("vice.registers.get", "Get CPU registers and status flags", registers::registers_get, NoParams),
    tool!("vice.registers.set", "Set a CPU register or status flag", registers::registers_set, params::RegistersSet),
    tool!("vice.memory.read", "Read a memory range", memory::memory_read, params::MemoryRead),
    tool!("vice.memory.write", "Write bytes to memory", memory::memory_write, params::MemoryWrite),
    tool!("vice.memory.banks", "List the machine's memory banks", memory::memory_banks, NoParams),
    tool!(
        "vice.memory.map",
        "Describe the memory layout of a range, with symbol hints per region",
        memory::memory_map,
        params::MemoryMap
    ),
    tool!(
        "vice.memory.search",
        "Search a memory range for a byte pattern, with an optional mask",
        memory::memory_search,
        params::MemorySearch
    ),
    tool!("vice.memory.fill", "Fill a memory range with a repeating pattern", memory::memory_fill, params::MemoryFill),
    tool!(
        "vice.memory.compare",
        "Compare two memory ranges, or memory against a saved snapshot",
        memory::memory_compare,
        params::MemoryCompare
    ),
    tool!("vice.watch.add", "Add a memory watchpoint", debug::watch_add, params::WatchAdd),
    tool!("vice.backtrace", "Reconstruct the call stack from JSR return addresses", debug::backtrace, params::Backtrace),
    tool!("vice.symbols.lookup", "Look up a symbol by name or address", symbols::symbols_lookup, params::SymbolsLookup),
    tool!("vice.symbols.load", "Load a label file into the symbol table", symbols::symbols_load, params::SymbolsLoad),
    tool!(
        "vice.cycles.stopwatch",
        "Measure elapsed CPU cycles",
        debug::cycles_stopwatch,
        params::CyclesStopwatch
    ),
    tool!("vice.checkpoint.add", "Add a checkpoint", checkpoint::checkpoint_add, params::CheckpointAdd),
    tool!("vice.checkpoint.delete", "Delete a checkpoint", checkpoint::checkpoint_delete, params::CheckpointNum),
    tool!("vice.checkpoint.list", "List all checkpoints", checkpoint::checkpoint_list, NoParams),
    tool!("vice.checkpoint.toggle", "Enable or disable a checkpoint", checkpoint::checkpoint_toggle, params::CheckpointToggle),
    tool!(
        "vice.checkpoint.set_condition",
        "Attach a register condition to a checkpoint",
        checkpoint::checkpoint_set_condition,
        params::CheckpointSetCondition
    ),
    tool!(
        "vice.checkpoint.set_ignore_count",
        "Skip the next N hits of a checkpoint",
        checkpoint::checkpoint_set_ignore_count,
        params::CheckpointSetIgnoreCount
    ),
    tool!(
        "vice.checkpoint.group.create",
        "Create a named checkpoint group",
        checkpoint::groups::group_create,
        params::GroupCreate
    ),
    tool!(
        "vice.checkpoint.group.add",
        "Add checkpoints to a group",
        checkpoint::groups::group_add,
        params::GroupAdd
    ),
    tool!(
        "vice.checkpoint.group.toggle",
        "Enable or disable every checkpoint in a group",
        checkpoint::groups::group_toggle,
        params::GroupToggle
    ),
    tool!("vice.checkpoint.group.list", "List checkpoint groups", checkpoint::groups::group_list, NoParams),
    tool!(
        "vice.checkpoint.set_auto_snapshot",
        "Save a rotating snapshot every time a checkpoint hits",
        checkpoint::auto_snapshot::set_auto_snapshot,
        params::SetAutoSnapshot
    ),
    tool!(
        "vice.checkpoint.clear_auto_snapshot",
        "Stop saving snapshots for a checkpoint",
        checkpoint::auto_snapshot::clear_auto_snapshot,
        params::ClearAutoSnapshot
    ),
    tool!("vice.trace.start", "Start recording executed instructions to a file", trace::trace_start, params::TraceStart),
    tool!("vice.trace.stop", "Stop an execution trace", trace::trace_stop, params::TraceStop),
    tool!(
        "vice.interrupt.log.start",
        "Start logging interrupts",
        interrupt_log::interrupt_log_start,
        params::InterruptLogStart
    ),
    tool!(
        "vice.interrupt.log.stop",
        "Stop an interrupt log and return its entries",
        interrupt_log::interrupt_log_stop,
        params::InterruptLogStop
    ),
    tool!(
        "vice.interrupt.log.read",
        "Read interrupt log entries without stopping the log",
        interrupt_log::interrupt_log_read,
        params::InterruptLogRead
    ),
    tool!("vice.snapshot.save", "Save the machine state to a named snapshot", snapshot::snapshot_save, params::SnapshotSave),
    tool!("vice.snapshot.load", "Restore the machine state from a named snapshot", snapshot::snapshot_load, params::SnapshotLoad),
    tool!("vice.snapshot.list", "List saved snapshots", snapshot::snapshot_list, NoParams),
];

/// Looks a tool up by exact name.
pub fn find(name: &str) -> Result<&'static ToolDescriptor, ToolError> {
    if name.len() > MAX_METHOD_NAME_LEN {
        return Err(ToolError::new(ErrorCode::InvalidRequest, "Method name too long"));
    }
    TOOLS
        .iter()
        .find(|tool| tool.name == name)
        .ok_or_else(|| ToolError::new(ErrorCode::MethodNotFound, "Method not found"))
}

/// Runs a tool directly on `ctx`. The execution context uses this once a
/// request has been marshalled onto it.
pub fn dispatch(ctx: &mut McpContext, name: &str, params: Value) -> ToolResult {
    let tool = find(name)?;
    (tool.handler)(ctx, params)
}

pub fn tools_list() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema(),
            })
        })
        .collect();
    let count = tools.len();
    json!({ "tools": tools, "count": count })
}

pub fn initialize(params: Value) -> ToolResult {
    let p: params::Initialize = parse_params(params)?;
    let requested = p
        .protocol_version
        .as_deref()
        .unwrap_or(DEFAULT_CLIENT_PROTOCOL_VERSION);
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
        return Err(ToolError::invalid_params(format!(
            "Unsupported protocol version (supported: {})",
            SUPPORTED_PROTOCOL_VERSIONS.join(", ")
        )));
    }
    tracing::info!(target: "vice.mcp", client_version = requested, "client initialized");
    Ok(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "logging": {},
            "tools": { "listChanged": true },
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": crate::VERSION,
        },
    }))
}

/// Wraps a tool result for `tools/call`.
///
/// A successful value that nevertheless carries a numeric `code` is an error
/// object and is forwarded as such.
pub fn call_envelope(result: ToolResult) -> ToolResult {
    let value = result?;
    if let Some(code) = error_code_of(&value) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Tool failed")
            .to_owned();
        let code = ErrorCode::from_code(code).unwrap_or(ErrorCode::InternalError);
        return Err(ToolError::new(code, message));
    }
    let text = serde_json::to_string(&value).map_err(|_| ToolError::internal("Out of memory"))?;
    Ok(json!({ "content": [{ "type": "text", "text": text }] }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::machine::headless::HeadlessMachine;

    #[test]
    fn tool_names_are_unique_and_prefixed() {
        let mut seen = HashSet::new();
        for tool in TOOLS {
            assert!(tool.name.starts_with("vice."), "{}", tool.name);
            assert!(tool.name.len() <= MAX_METHOD_NAME_LEN);
            assert!(seen.insert(tool.name), "duplicate tool {}", tool.name);
        }
    }

    #[test]
    fn every_schema_is_an_object_schema() {
        for tool in TOOLS {
            let schema = tool.input_schema();
            assert_eq!(schema["type"], "object", "{}", tool.name);
            assert!(schema["properties"].is_object(), "{}", tool.name);
        }
    }

    #[test]
    fn lookup_errors() {
        let err = find("vice.nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        let err = find(&"x".repeat(MAX_METHOD_NAME_LEN + 1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
        assert_eq!(find("vice.ping").map(|tool| tool.name), Ok("vice.ping"));
    }

    #[test]
    fn list_reports_count() {
        let list = tools_list();
        assert_eq!(list["count"], TOOLS.len());
        assert_eq!(list["tools"][0]["name"], "vice.ping");
        assert!(list["tools"][0]["inputSchema"].is_object());
    }

    #[test]
    fn initialize_negotiates_known_versions() {
        let reply = initialize(Value::Null).expect("default version");
        assert_eq!(reply["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(reply["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(reply["capabilities"]["tools"]["listChanged"], true);

        initialize(json!({ "protocolVersion": "2025-06-18" })).expect("older version");
        let err = initialize(json!({ "protocolVersion": "1999-01-01" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(
            err.message,
            "Unsupported protocol version (supported: 2025-11-25, 2025-06-18, 2024-11-05)"
        );
    }

    #[test]
    fn envelope_wraps_compact_json() {
        let wrapped = call_envelope(Ok(json!({ "status": "ok" }))).expect("envelope");
        assert_eq!(wrapped["content"][0]["type"], "text");
        assert_eq!(wrapped["content"][0]["text"], r#"{"status":"ok"}"#);

        let err = call_envelope(Ok(json!({ "code": -32002, "message": "bad address" }))).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAddress);
        assert_eq!(err.message, "bad address");
    }

    #[test]
    fn dispatch_runs_handlers_against_the_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        let pong = dispatch(&mut ctx, "vice.ping", Value::Null).expect("ping");
        assert_eq!(pong["status"], "ok");
        let err = dispatch(&mut ctx, "vice.memory.read", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }
}
