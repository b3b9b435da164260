//! Checkpoint manager tools.
//!
//! Checkpoints live in the core's table; these handlers only hold ids and
//! check that an id still exists before touching it.

use serde_json::{json, Value};

use crate::address::AddressError;
use crate::condition;
use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::{Checkpoint, CheckpointSpec, CheckpointTable, MemoryOps, SymbolTable};
use crate::params::{self, parse_params, NoParams};

pub mod auto_snapshot;
pub mod groups;

/// Error text listing the accepted condition forms.
pub(crate) const CONDITION_HELP: &str = "Invalid condition. Supported: 'A == $xx', 'X == $xx', 'Y == $xx', 'PC == $xxxx', 'SP == $xx' (hex with $, 0x, or decimal)";

/// Maps an address resolution failure to `Cannot resolve <what>: <reason>`.
pub(crate) fn cannot_resolve(what: &str) -> impl FnOnce(AddressError) -> ToolError + '_ {
    move |err| ToolError::invalid_params(format!("Cannot resolve {what}: {err}"))
}

fn checkpoint_not_found() -> ToolError {
    ToolError::invalid_params("Checkpoint not found")
}

fn checkpoint_json(cp: &Checkpoint, symbols: &dyn SymbolTable) -> Value {
    let mut item = json!({
        "checkpoint_num": cp.id,
        "start": cp.start,
        "end": cp.end,
        "hit_count": cp.hit_count,
        "ignore_count": cp.ignore_count,
        "stop": cp.stop,
        "enabled": cp.enabled,
        "check_load": cp.ops.load,
        "check_store": cp.ops.store,
        "check_exec": cp.ops.exec,
        "temporary": cp.temporary,
    });
    if let Some(name) = symbols.name_at(cp.start) {
        item["start_symbol"] = json!(name);
    }
    if cp.end != cp.start {
        if let Some(name) = symbols.name_at(cp.end) {
            item["end_symbol"] = json!(name);
        }
    }
    if let Some(condition) = &cp.condition {
        item["condition"] = json!(condition.to_string());
    }
    item
}

pub fn checkpoint_add(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CheckpointAdd = parse_params(params)?;
    let machine = ctx.machine.as_mut();

    let start = p.start.resolve(&*machine).map_err(cannot_resolve("start address"))?;
    let end = match &p.end {
        Some(end) => end.resolve(&*machine).map_err(cannot_resolve("end address"))?,
        None => start,
    };
    if end < start {
        return Err(ToolError::invalid_params("end address must be >= start address"));
    }

    let mut ops = MemoryOps {
        load: p.load.unwrap_or(false),
        store: p.store.unwrap_or(false),
        exec: p.exec.unwrap_or(false),
    };
    if ops.is_empty() {
        ops = MemoryOps::EXEC;
    }
    let stop = p.stop.unwrap_or(true);

    let id = machine
        .add_checkpoint(CheckpointSpec {
            start,
            end,
            stop,
            ops,
            temporary: false,
        })
        .ok_or_else(|| ToolError::internal("Failed to create checkpoint"))?;

    tracing::debug!(target: "vice.mcp.checkpoint", id, start, end, ?ops, stop, "checkpoint added");
    Ok(json!({
        "status": "ok",
        "checkpoint_num": id,
        "start": start,
        "end": end,
        "stop": stop,
        "load": ops.load,
        "store": ops.store,
        "exec": ops.exec,
    }))
}

pub fn checkpoint_delete(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CheckpointNum = parse_params(params)?;
    let id = p.checkpoint_num;
    if ctx.machine.checkpoint(id).is_none() {
        return Err(checkpoint_not_found());
    }
    ctx.machine.remove_checkpoint(id);
    if ctx.auto_snapshots.clear(id) {
        tracing::debug!(target: "vice.mcp.checkpoint", id, "auto-snapshot cleared with checkpoint");
    }
    tracing::debug!(target: "vice.mcp.checkpoint", id, "checkpoint deleted");
    Ok(json!({ "status": "ok", "checkpoint_num": id }))
}

pub fn checkpoint_list(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    let checkpoints: Vec<Value> = machine
        .checkpoints()
        .iter()
        .map(|cp| checkpoint_json(cp, machine))
        .collect();
    let count = checkpoints.len();
    Ok(json!({ "checkpoints": checkpoints, "count": count }))
}

pub fn checkpoint_toggle(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CheckpointToggle = parse_params(params)?;
    let id = p.checkpoint_num;
    if ctx.machine.checkpoint(id).is_none() {
        return Err(checkpoint_not_found());
    }
    ctx.machine.set_checkpoint_enabled(id, p.enabled);
    tracing::debug!(target: "vice.mcp.checkpoint", id, enabled = p.enabled, "checkpoint toggled");
    Ok(json!({ "status": "ok", "checkpoint_num": id, "enabled": p.enabled }))
}

pub fn checkpoint_set_condition(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CheckpointSetCondition = parse_params(params)?;
    let id = p.checkpoint_num;
    if ctx.machine.checkpoint(id).is_none() {
        return Err(checkpoint_not_found());
    }
    let node = condition::parse(&p.condition).map_err(|err| {
        tracing::debug!(target: "vice.mcp.checkpoint", id, error = %err, "rejected condition");
        ToolError::invalid_params(CONDITION_HELP)
    })?;
    ctx.machine.set_checkpoint_condition(id, node);
    tracing::debug!(target: "vice.mcp.checkpoint", id, condition = %node, "condition set");
    Ok(json!({ "status": "ok", "checkpoint_num": id, "condition": p.condition }))
}

pub fn checkpoint_set_ignore_count(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CheckpointSetIgnoreCount = parse_params(params)?;
    let id = p.checkpoint_num;
    if p.count < 0 {
        return Err(ToolError::invalid_params("count must be >= 0"));
    }
    let count = u32::try_from(p.count).unwrap_or(u32::MAX);
    if ctx.machine.checkpoint(id).is_none() {
        return Err(checkpoint_not_found());
    }
    ctx.machine.set_checkpoint_ignore_count(id, count);
    Ok(json!({ "status": "ok", "checkpoint_num": id, "ignore_count": count }))
}
