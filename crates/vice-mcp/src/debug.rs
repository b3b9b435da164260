//! Watchpoints, stack backtrace and the cycle stopwatch.

use serde_json::{json, Value};

use crate::checkpoint::{cannot_resolve, CONDITION_HELP};
use crate::condition;
use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::execution::JSR_OPCODE;
use crate::machine::{CheckpointSpec, CheckpointTable, Clock, Cpu, Memory, MemoryOps, SymbolTable};
use crate::params::{self, parse_params};

pub const DEFAULT_BACKTRACE_DEPTH: i64 = 16;
pub const MAX_BACKTRACE_DEPTH: i64 = 64;
const STACK_PAGE: u16 = 0x0100;

fn watch_ops(kind: &str) -> Option<MemoryOps> {
    let (load, store) = match kind {
        "read" => (true, false),
        "write" => (false, true),
        "both" => (true, true),
        _ => return None,
    };
    Some(MemoryOps {
        load,
        store,
        exec: false,
    })
}

pub fn watch_add(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::WatchAdd = parse_params(params)?;
    let address = p
        .address
        .resolve(ctx.machine.as_ref())
        .map_err(cannot_resolve("address"))?;
    let size = p.size.unwrap_or(1).max(1);
    let end = i64::from(address)
        .checked_add(size - 1)
        .and_then(|end| u16::try_from(end).ok())
        .ok_or_else(|| {
            ToolError::invalid_params("Watch range exceeds address space (address + size > $FFFF)")
        })?;

    let kind = p.kind.as_deref().unwrap_or("write");
    let ops = watch_ops(kind)
        .ok_or_else(|| ToolError::invalid_params("type must be 'read', 'write', or 'both'"))?;

    let id = ctx
        .machine
        .add_checkpoint(CheckpointSpec {
            start: address,
            end,
            stop: true,
            ops,
            temporary: false,
        })
        .ok_or_else(|| ToolError::internal("Failed to create watchpoint"))?;

    if let Some(text) = p.condition.as_deref().filter(|text| !text.is_empty()) {
        match condition::parse(text) {
            Ok(node) => {
                ctx.machine.set_checkpoint_condition(id, node);
            }
            Err(err) => {
                ctx.machine.remove_checkpoint(id);
                tracing::debug!(target: "vice.mcp.checkpoint", id, error = %err, "watchpoint condition rejected");
                return Err(ToolError::invalid_params(CONDITION_HELP));
            }
        }
    }

    tracing::debug!(target: "vice.mcp.checkpoint", id, address, end, kind, "watchpoint added");
    let mut out = json!({
        "status": "ok",
        "checkpoint_num": id,
        "address": address,
        "size": size,
        "type": kind,
    });
    if let Some(text) = p.condition {
        out["condition"] = json!(text);
    }
    Ok(out)
}

/// Scans the stack page above SP for JSR return addresses.
///
/// JSR pushes the return address minus one, high byte first, so each frame
/// reads as a little-endian word at `$0100 + i`.
pub fn backtrace(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::Backtrace = parse_params(params)?;
    let depth = p
        .depth
        .map(|d| d.clamp(1, MAX_BACKTRACE_DEPTH))
        .unwrap_or(DEFAULT_BACKTRACE_DEPTH) as usize;
    let machine = ctx.machine.as_ref();
    let sp = machine.registers().sp;

    let mut frames = Vec::new();
    let mut slot = u16::from(sp) + 1;
    while slot < 0xFF && frames.len() < depth {
        let lo = machine.peek(STACK_PAGE + slot);
        let hi = machine.peek(STACK_PAGE + slot + 1);
        let return_address = u16::from_le_bytes([lo, hi]).wrapping_add(1);
        let offset = STACK_PAGE + slot;
        slot += 2;

        if !(0x0200..=0xFFFC).contains(&return_address) {
            continue;
        }
        let mut frame = json!({
            "return_address": return_address,
            "stack_offset": offset,
        });
        if let Some(symbol) = machine.name_at(return_address) {
            frame["symbol"] = json!(symbol);
        }
        let call_site = return_address - 3;
        if machine.peek(call_site) == JSR_OPCODE {
            let target = u16::from_le_bytes([machine.peek(call_site + 1), machine.peek(call_site + 2)]);
            frame["called_from"] = json!(call_site);
            frame["called_target"] = json!(target);
            if let Some(symbol) = machine.name_at(target) {
                frame["called_symbol"] = json!(symbol);
            }
        }
        frames.push(frame);
    }

    let frame_count = frames.len();
    Ok(json!({ "sp": sp, "frames": frames, "frame_count": frame_count }))
}

pub fn cycles_stopwatch(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::CyclesStopwatch = parse_params(params)?;
    let now = ctx.machine.cycles();
    let elapsed = now.saturating_sub(ctx.stopwatch_base);

    let mut out = match p.action.as_str() {
        "read" => json!({ "cycles": elapsed }),
        "reset" => {
            ctx.stopwatch_base = now;
            json!({ "cycles": 0 })
        }
        "reset_and_read" => {
            ctx.stopwatch_base = now;
            json!({ "cycles": 0, "previous_cycles": elapsed })
        }
        _ => {
            return Err(ToolError::invalid_params(
                "Invalid action. Must be 'reset', 'read', or 'reset_and_read'",
            ))
        }
    };
    out["memspace"] = json!("computer");
    Ok(out)
}
