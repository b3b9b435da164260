use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::{
    Cpu, Registers, FLAG_BREAK, FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW,
    FLAG_ZERO,
};
use crate::params::{self, parse_params, NoParams};

/// Status flags in the order `registers.get` reports them.
const FLAGS: [(&str, u8); 7] = [
    ("N", FLAG_NEGATIVE),
    ("V", FLAG_OVERFLOW),
    ("B", FLAG_BREAK),
    ("D", FLAG_DECIMAL),
    ("I", FLAG_INTERRUPT),
    ("Z", FLAG_ZERO),
    ("C", FLAG_CARRY),
];

pub fn registers_json(regs: &Registers) -> Value {
    let mut out = json!({
        "PC": regs.pc,
        "A": regs.a,
        "X": regs.x,
        "Y": regs.y,
        "SP": regs.sp,
    });
    for (name, mask) in FLAGS {
        out[name] = json!(regs.flag(mask));
    }
    out
}

pub fn registers_get(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    Ok(registers_json(&ctx.machine.registers()))
}

fn byte(name: &str, value: i64) -> Result<u8, ToolError> {
    u8::try_from(value)
        .map_err(|_| ToolError::invalid_params(format!("{name} value out of range (must be 0-255)")))
}

fn applies(regs: &mut Registers, name: &str, value: i64) -> Result<(), ToolError> {
    match name {
        "PC" => {
            regs.pc = u16::try_from(value)
                .map_err(|_| ToolError::invalid_params("PC value out of range (must be 0-65535)"))?;
        }
        "A" => regs.a = byte(name, value)?,
        "X" => regs.x = byte(name, value)?,
        "Y" => regs.y = byte(name, value)?,
        "SP" => regs.sp = byte(name, value)?,
        _ => {
            let (_, mask) = FLAGS.iter().find(|(flag, _)| *flag == name).ok_or_else(|| {
                ToolError::invalid_params(
                    "Unknown register name (must be PC, A, X, Y, SP, N, V, B, D, I, Z, or C)",
                )
            })?;
            if !(0..=1).contains(&value) {
                return Err(ToolError::invalid_params(format!(
                    "{name} flag value out of range (must be 0 or 1)"
                )));
            }
            regs.set_flag(*mask, value == 1);
        }
    }
    Ok(())
}

pub fn registers_set(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::RegistersSet = parse_params(params)?;
    ctx.require_stopped()?;

    let mut regs = ctx.machine.registers();
    applies(&mut regs, &p.register, p.value)?;
    ctx.machine.set_registers(regs);

    tracing::debug!(target: "vice.mcp.exec", register = %p.register, value = p.value, "register set");
    Ok(json!({ "status": "ok", "register": p.register, "value": p.value }))
}
