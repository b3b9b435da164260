//! Typed parameters for every tool.
//!
//! Each tool deserializes its `params` object into one of these structs and
//! publishes the struct's JSON schema as its `inputSchema`. Required fields are
//! plain fields so serde reports them as missing; range and format checks that
//! need tool-specific messages are done by the handlers.

use std::path::PathBuf;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::address::AddressArg;
use crate::error::ToolError;

/// Redacts user-supplied values from a serde error message.
///
/// Quoted strings are always redacted. Backticked segments are redacted only
/// for unknown fields/variants and invalid scalars; `missing field `x`` keeps
/// the field name so the error stays actionable.
pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];
        let Some(end) = rest.find('"') else {
            out.push_str("<redacted>");
            rest = "";
            break;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    let mut start = ["unknown field `", "unknown variant `"]
        .iter()
        .filter_map(|pattern| out.find(pattern).map(|pos| pos + pattern.len() - 1))
        .min();
    if start.is_none() && (out.contains("invalid type:") || out.contains("invalid value:")) {
        let boundary = out.find(", expected").unwrap_or(out.len());
        start = out[..boundary].find('`');
    }
    if let Some(start) = start {
        let after = &out[start + 1..];
        let end = after
            .find("`, expected")
            .or_else(|| after.find('`'))
            .map(|rel| start + 1 + rel);
        if let Some(end) = end {
            out.replace_range(start + 1..end, "<redacted>");
        }
    }
    out
}

/// Deserializes tool parameters. Absent (`null`) parameters read as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        _ => return Err(ToolError::invalid_params("Parameters must be an object")),
    };
    serde_json::from_value(params).map_err(|err| {
        ToolError::invalid_params(format!(
            "Invalid parameters: {}",
            sanitize_json_error_message(&err.to_string())
        ))
    })
}

/// JSON schema advertised for a parameter struct in `tools/list`.
pub fn schema_of<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.meta_schema = None;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| json!({ "type": "object" }));
    if let Value::Object(map) = &mut schema {
        map.remove("title");
        map.remove("definitions");
        map.entry("properties").or_insert_with(|| json!({}));
    }
    schema
}

/// Parameters of tools that take none. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct Initialize {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<String>,
}

// Execution

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MachineReset {
    /// `soft` (CPU reset, default) or `hard` (power cycle). `cpu` and
    /// `power` are accepted as aliases.
    pub mode: Option<String>,
    /// Resume execution after the reset (default true).
    pub run_after: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecutionStep {
    /// Number of instructions to execute (default 1).
    pub count: Option<i64>,
    /// Treat a JSR as a single instruction.
    #[serde(rename = "stepOver")]
    pub step_over: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunUntil {
    /// Stop when execution reaches this address.
    pub address: Option<AddressArg>,
    /// Cycle budget, clamped to 0..=10000000.
    pub cycles: Option<i64>,
}

// Registers

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegistersSet {
    /// PC, A, X, Y, SP or one of the flags N, V, B, D, I, Z, C.
    pub register: String,
    pub value: i64,
}

// Memory

/// Memory bank selector: a bank name or number.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum BankArg {
    Number(i64),
    Name(String),
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryRead {
    pub address: AddressArg,
    /// Number of bytes, 1..=65535.
    pub size: i64,
    pub bank: Option<BankArg>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryWrite {
    pub address: AddressArg,
    /// Bytes to store, 0..=255 each.
    pub data: Vec<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemorySearch {
    pub start: AddressArg,
    pub end: AddressArg,
    pub pattern: Vec<i64>,
    /// Per-byte mask applied to memory and pattern before comparing.
    pub mask: Option<Vec<i64>>,
    pub max_results: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryFill {
    pub start: AddressArg,
    pub end: AddressArg,
    pub pattern: Vec<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryMap {
    /// Defaults to `$0000`.
    pub start: Option<AddressArg>,
    /// Defaults to `$FFFF`.
    pub end: Option<AddressArg>,
    /// Regions smaller than this are left out unless nothing precedes them
    /// (default 256, clamped to 1..=65535).
    pub granularity: Option<i64>,
}

/// `mode` selects which of the remaining fields are required.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MemoryCompare {
    /// `ranges` or `snapshot`.
    pub mode: String,
    pub range1_start: Option<AddressArg>,
    pub range1_end: Option<AddressArg>,
    pub range2_start: Option<AddressArg>,
    pub snapshot_name: Option<String>,
    pub start: Option<AddressArg>,
    pub end: Option<AddressArg>,
    pub max_differences: Option<i64>,
}

// Debugging

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WatchAdd {
    pub address: AddressArg,
    pub size: Option<i64>,
    /// `read`, `write` (default) or `both`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub condition: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct Backtrace {
    pub depth: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SymbolsLookup {
    pub name: Option<String>,
    pub address: Option<AddressArg>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SymbolsLoad {
    pub path: PathBuf,
    /// `auto` (default), `vice`, `kickasm` or `simple`.
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CyclesStopwatch {
    /// `reset`, `read` or `reset_and_read`.
    pub action: String,
}

// Checkpoints

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointAdd {
    pub start: AddressArg,
    /// Defaults to `start`.
    pub end: Option<AddressArg>,
    /// Stop execution on hit (default true).
    pub stop: Option<bool>,
    pub load: Option<bool>,
    pub store: Option<bool>,
    pub exec: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointNum {
    pub checkpoint_num: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointToggle {
    pub checkpoint_num: u32,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointSetCondition {
    pub checkpoint_num: u32,
    /// `REG == VALUE` with REG one of A, X, Y, PC, SP.
    pub condition: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckpointSetIgnoreCount {
    pub checkpoint_num: u32,
    pub count: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GroupCreate {
    pub name: String,
    pub checkpoint_ids: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GroupAdd {
    pub group: String,
    pub checkpoint_ids: Vec<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GroupToggle {
    pub group: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetAutoSnapshot {
    pub checkpoint_id: i64,
    /// Letters, digits, `_` and `-` only.
    pub snapshot_prefix: String,
    /// Ring size, 1..=999 (default 10).
    pub max_snapshots: Option<i64>,
    pub include_disks: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearAutoSnapshot {
    pub checkpoint_id: i64,
}

// Tracing

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TraceStart {
    pub output_file: String,
    pub pc_filter_start: Option<i64>,
    pub pc_filter_end: Option<i64>,
    /// Clamped to 1..=1000000 (default 10000).
    pub max_instructions: Option<i64>,
    pub include_registers: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TraceStop {
    pub trace_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InterruptLogStart {
    /// Any of `irq`, `nmi`, `brk` (default all).
    pub types: Option<Vec<String>>,
    pub max_entries: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InterruptLogStop {
    pub log_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InterruptLogRead {
    pub log_id: String,
    pub since_index: Option<i64>,
}

// Snapshots

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SnapshotSave {
    pub name: String,
    pub description: Option<String>,
    pub include_roms: Option<bool>,
    pub include_disks: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SnapshotLoad {
    pub name: String,
}
