//! Execution state machine and the execution-control tools.
//!
//! The state is only read and written on the execution context, between
//! instructions. [`McpContext::run_instruction`] is the single place where an
//! instruction executes and where the per-instruction hooks fire.

use serde_json::{json, Value};

use crate::checkpoint::{auto_snapshot, cannot_resolve};
use crate::context::McpContext;
use crate::error::{ErrorCode, ToolError, ToolResult};
use crate::machine::{
    CheckpointSpec, CheckpointTable, Cpu, Execution, Machine, Memory, MemoryOps, ResetKind, SymbolTable,
};
use crate::params::{self, parse_params, NoParams};

pub const JSR_OPCODE: u8 = 0x20;
/// JSR is three bytes; the subroutine returns to the byte after it.
const JSR_LEN: u16 = 3;
pub const MAX_RUN_UNTIL_CYCLES: i64 = 10_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    Stopped,
    Running,
    SteppingInto {
        remaining: u32,
    },
    SteppingOver {
        remaining: u32,
        /// Set while inside a subroutine entered by the step in progress.
        return_to: Option<u16>,
    },
}

impl ExecState {
    pub fn is_stopped(self) -> bool {
        matches!(self, ExecState::Stopped)
    }

    /// Name reported by `vice.ping`.
    pub fn name(self) -> &'static str {
        match self {
            ExecState::Stopped => "paused",
            ExecState::Running => "running",
            ExecState::SteppingInto { .. } | ExecState::SteppingOver { .. } => "stepping",
        }
    }

    fn step(count: u32, step_over: bool) -> Self {
        let remaining = count.max(1);
        if step_over {
            ExecState::SteppingOver {
                remaining,
                return_to: None,
            }
        } else {
            ExecState::SteppingInto { remaining }
        }
    }

    /// State after the instruction at `pc` (opcode `opcode`) executed and
    /// left the CPU at `new_pc`.
    pub fn after_instruction(self, pc: u16, opcode: u8, new_pc: u16) -> Self {
        fn finish_one(remaining: u32, into: impl FnOnce(u32) -> ExecState) -> ExecState {
            if remaining <= 1 {
                ExecState::Stopped
            } else {
                into(remaining - 1)
            }
        }

        match self {
            ExecState::Stopped | ExecState::Running => self,
            ExecState::SteppingInto { remaining } => {
                finish_one(remaining, |remaining| ExecState::SteppingInto { remaining })
            }
            ExecState::SteppingOver {
                remaining,
                return_to: None,
            } if opcode == JSR_OPCODE => ExecState::SteppingOver {
                remaining,
                return_to: Some(pc.wrapping_add(JSR_LEN)),
            },
            ExecState::SteppingOver {
                return_to: Some(target),
                ..
            } if new_pc != target => self,
            ExecState::SteppingOver { remaining, .. } => finish_one(remaining, |remaining| {
                ExecState::SteppingOver {
                    remaining,
                    return_to: None,
                }
            }),
        }
    }
}

impl McpContext {
    /// Executes one instruction unless execution is stopped.
    ///
    /// Feeds the trace hook, advances the stepping state and evaluates exec
    /// checkpoints at the new PC: hits fire their auto-snapshot, temporary
    /// checkpoints delete themselves and stopping checkpoints stop execution.
    /// Returns whether an instruction ran.
    pub fn run_instruction(&mut self) -> bool {
        if self.exec.is_stopped() {
            return false;
        }

        let before = self.machine.registers();
        let opcode = self.machine.peek(before.pc);
        self.machine.execute_instruction();
        self.traces.on_instruction(before.pc, &before);

        let after = self.machine.registers();
        let state = self.exec.after_instruction(before.pc, opcode, after.pc);
        if state.is_stopped() && !self.exec.is_stopped() {
            tracing::debug!(target: "vice.mcp.exec", pc = after.pc, "step complete");
        }
        self.exec = state;

        for hit in self.machine.hit_exec(after.pc, &after) {
            auto_snapshot::take_on_hit(self, hit.id);
            if hit.temporary {
                self.machine.remove_checkpoint(hit.id);
            }
            if hit.stop {
                tracing::debug!(target: "vice.mcp.exec", checkpoint = hit.id, pc = after.pc, "checkpoint stopped execution");
                self.exec = ExecState::Stopped;
            }
        }
        true
    }

    /// Runs until execution stops or `limit` instructions have executed.
    /// Returns the number executed.
    pub fn run_bounded(&mut self, limit: usize) -> usize {
        let mut executed = 0;
        while executed < limit && self.run_instruction() {
            executed += 1;
        }
        executed
    }
}

pub fn ping(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    Ok(json!({
        "status": "ok",
        "version": crate::VERSION,
        "machine": ctx.machine.machine_name(),
        "execution": ctx.exec.name(),
    }))
}

pub fn execution_run(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    ctx.exec = ExecState::Running;
    tracing::debug!(target: "vice.mcp.exec", "execution resumed");
    Ok(json!({ "status": "ok", "message": "Execution resumed" }))
}

pub fn execution_pause(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    ctx.exec = ExecState::Stopped;
    tracing::debug!(target: "vice.mcp.exec", pc = ctx.machine.registers().pc, "execution paused");
    Ok(json!({ "status": "ok", "message": "Execution paused" }))
}

pub fn machine_reset(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MachineReset = parse_params(params)?;
    let kind = match p.mode.as_deref().unwrap_or("soft") {
        "soft" | "cpu" => ResetKind::Soft,
        "hard" | "power" => ResetKind::Hard,
        _ => return Err(ToolError::invalid_params("Invalid mode - use 'soft' or 'hard'")),
    };
    let run_after = p.run_after.unwrap_or(true);

    ctx.machine.reset(kind);
    ctx.exec = if run_after {
        ExecState::Running
    } else {
        ExecState::Stopped
    };
    tracing::info!(target: "vice.mcp.exec", ?kind, run_after, pc = ctx.machine.registers().pc, "machine reset");

    let (mode, message) = match kind {
        ResetKind::Soft => ("soft", "Machine reset (CPU)"),
        ResetKind::Hard => ("hard", "Machine power cycled"),
    };
    Ok(json!({
        "status": "ok",
        "mode": mode,
        "run_after": run_after,
        "message": message,
    }))
}

pub fn execution_step(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::ExecutionStep = parse_params(params)?;
    ctx.require_stopped()?;
    let count = p
        .count
        .map(|n| n.clamp(1, i64::from(u32::MAX)) as u32)
        .unwrap_or(1);
    let step_over = p.step_over.unwrap_or(false);

    ctx.exec = ExecState::step(count, step_over);
    tracing::debug!(target: "vice.mcp.exec", count, step_over, "stepping");
    Ok(json!({ "status": "ok", "instructions": count, "step_over": step_over }))
}

pub fn run_until(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::RunUntil = parse_params(params)?;
    let target = match &p.address {
        Some(address) => Some(
            address
                .resolve(ctx.machine.as_ref())
                .map_err(cannot_resolve("address"))?,
        ),
        None => None,
    };
    let cycle_limit = p.cycles.map(|n| n.clamp(0, MAX_RUN_UNTIL_CYCLES)).unwrap_or(0);

    let Some(target) = target else {
        if cycle_limit == 0 {
            return Err(ToolError::invalid_params("Either 'address' or 'cycles' required"));
        }
        return Err(ToolError::new(
            ErrorCode::NotImplemented,
            "cycles-only mode not yet implemented; provide an address",
        ));
    };

    let id = ctx
        .machine
        .add_checkpoint(CheckpointSpec {
            start: target,
            end: target,
            stop: true,
            ops: MemoryOps::EXEC,
            temporary: true,
        })
        .ok_or_else(|| ToolError::internal("Failed to create temporary breakpoint"))?;
    ctx.exec = ExecState::Running;
    tracing::debug!(target: "vice.mcp.exec", target, checkpoint = id, "running until target");

    let mut response = json!({ "status": "ok", "target_address": target });
    if let Some(symbol) = ctx.machine.name_at(target) {
        response["target_symbol"] = json!(symbol);
    }
    if cycle_limit > 0 {
        response["cycle_limit"] = json!(cycle_limit);
        response["note"] = json!("Cycle limit not yet implemented - using breakpoint only");
    }
    response["message"] = json!("Execution resumed, will stop at target or breakpoint");
    Ok(response)
}
