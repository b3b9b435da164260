//! Memory tools.
//!
//! Reads go through the side-effect-free peek path. Every scan checks its
//! bounds and caps before touching memory.

use serde_json::{json, Value};

use crate::address::AddressArg;
use crate::checkpoint::cannot_resolve;
use crate::context::McpContext;
use crate::error::{ErrorCode, ToolError, ToolResult};
use crate::machine::{Machine, Memory, SymbolTable};
use crate::params::{self, parse_params, BankArg, NoParams};
use crate::snapshot;

pub const MAX_TRANSFER_LEN: i64 = 65_535;
pub const MAX_PATTERN_LEN: usize = 256;
pub const MAX_BANK_NAME_LEN: usize = 63;
pub const DEFAULT_MAX_RESULTS: usize = 100;
pub const MAX_RESULTS_LIMIT: usize = 10_000;

fn hex_address(addr: u16) -> String {
    format!("${addr:04X}")
}

fn clamp_cap(value: Option<i64>) -> usize {
    value
        .map(|n| n.clamp(1, MAX_RESULTS_LIMIT as i64) as usize)
        .unwrap_or(DEFAULT_MAX_RESULTS)
}

fn resolve(arg: &AddressArg, machine: &dyn Machine, what: &str) -> Result<u16, ToolError> {
    arg.resolve(machine).map_err(cannot_resolve(what))
}

/// Validates a byte pattern for search and fill.
fn pattern_bytes(pattern: &[i64]) -> Result<Vec<u8>, ToolError> {
    if pattern.is_empty() {
        return Err(ToolError::invalid_params("pattern array must not be empty"));
    }
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(ToolError::invalid_params("pattern array too large (max 256 bytes)"));
    }
    pattern
        .iter()
        .map(|&b| u8::try_from(b).map_err(|_| ToolError::invalid_params("pattern byte values must be 0-255")))
        .collect()
}

fn resolve_bank(machine: &dyn Machine, bank: &BankArg) -> Result<(u8, Option<String>), ToolError> {
    match bank {
        BankArg::Number(number) => {
            let number = u8::try_from(*number)
                .map_err(|_| ToolError::invalid_params("Bank number out of range (must be 0-255)"))?;
            Ok((number, None))
        }
        BankArg::Name(name) => {
            if name.len() > MAX_BANK_NAME_LEN {
                return Err(ToolError::invalid_params("Bank name too long (max 63 characters)"));
            }
            machine
                .banks()
                .into_iter()
                .find(|bank| bank.name == *name)
                .map(|bank| (bank.number, Some(bank.name)))
                .ok_or_else(|| {
                    ToolError::invalid_params(
                        "Unknown bank name (use vice.memory.banks to list available banks)",
                    )
                })
        }
    }
}

pub fn memory_read(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemoryRead = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    let address = resolve(&p.address, machine, "address")?;
    if !(1..=MAX_TRANSFER_LEN).contains(&p.size) {
        return Err(ToolError::invalid_params("Size out of range (must be 1-65535)"));
    }
    let size = p.size as u16;
    let bank = p.bank.as_ref().map(|bank| resolve_bank(machine, bank)).transpose()?;

    let data: Vec<String> = (0..size)
        .map(|offset| {
            let addr = address.wrapping_add(offset);
            let value = match &bank {
                Some((number, _)) => machine.peek_bank(*number, addr),
                None => machine.peek(addr),
            };
            format!("{value:02X}")
        })
        .collect();

    let mut out = json!({ "address": address, "size": size });
    if let Some((number, name)) = bank {
        out["bank"] = json!(number);
        if let Some(name) = name {
            out["bank_name"] = json!(name);
        }
    }
    out["data"] = json!(data);
    Ok(out)
}

pub fn memory_write(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemoryWrite = parse_params(params)?;
    ctx.require_stopped()?;
    let address = resolve(&p.address, ctx.machine.as_ref(), "address")?;
    if p.data.is_empty() || p.data.len() as i64 > MAX_TRANSFER_LEN {
        return Err(ToolError::invalid_params(
            "Data array size out of range (must be 1-65535)",
        ));
    }
    let bytes: Vec<u8> = p
        .data
        .iter()
        .map(|&b| u8::try_from(b).map_err(|_| ToolError::invalid_params("Byte values must be 0-255")))
        .collect::<Result<_, _>>()?;

    for (offset, byte) in bytes.iter().enumerate() {
        ctx.machine.store(address.wrapping_add(offset as u16), *byte);
    }
    tracing::debug!(target: "vice.mcp", address, len = bytes.len(), "memory written");
    Ok(json!({ "status": "ok", "address": address, "bytes_written": bytes.len() }))
}

pub fn memory_banks(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    let banks: Vec<Value> = ctx
        .machine
        .banks()
        .into_iter()
        .map(|bank| json!({ "name": bank.name, "number": bank.number }))
        .collect();
    Ok(json!({ "banks": banks, "machine": ctx.machine.machine_name() }))
}

pub const DEFAULT_MAP_GRANULARITY: i64 = 256;
/// Symbol names listed per region in `contents_hint`.
const MAP_HINT_SYMBOLS: usize = 5;

/// Machines sharing the C64 memory layout.
const C64_FAMILY: [&str; 5] = ["C64", "C64SC", "C128", "C64DTV", "SCPU64"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegionKind {
    Ram,
    Rom,
    Io,
}

impl RegionKind {
    fn name(self) -> &'static str {
        match self {
            RegionKind::Ram => "ram",
            RegionKind::Rom => "rom",
            RegionKind::Io => "io",
        }
    }
}

struct Region {
    start: u16,
    end: u16,
    kind: RegionKind,
    name: &'static str,
}

const fn region(start: u16, end: u16, kind: RegionKind, name: &'static str) -> Region {
    Region { start, end, kind, name }
}

/// Default (bank 0) layout: BASIC, KERNAL and I/O banked in.
const C64_MEMORY_MAP: [Region; 15] = [
    region(0x0000, 0x00FF, RegionKind::Ram, "Zero Page"),
    region(0x0100, 0x01FF, RegionKind::Ram, "Stack"),
    region(0x0200, 0x03FF, RegionKind::Ram, "BASIC Work Area"),
    region(0x0400, 0x07FF, RegionKind::Ram, "Screen Memory"),
    region(0x0800, 0x9FFF, RegionKind::Ram, "BASIC Program Area"),
    region(0xA000, 0xBFFF, RegionKind::Rom, "BASIC ROM"),
    region(0xC000, 0xCFFF, RegionKind::Ram, "Upper RAM"),
    region(0xD000, 0xD3FF, RegionKind::Io, "VIC-II"),
    region(0xD400, 0xD7FF, RegionKind::Io, "SID"),
    region(0xD800, 0xDBFF, RegionKind::Io, "Color RAM"),
    region(0xDC00, 0xDCFF, RegionKind::Io, "CIA 1"),
    region(0xDD00, 0xDDFF, RegionKind::Io, "CIA 2"),
    region(0xDE00, 0xDEFF, RegionKind::Io, "I/O 1 (Expansion)"),
    region(0xDF00, 0xDFFF, RegionKind::Io, "I/O 2 (Expansion)"),
    region(0xE000, 0xFFFF, RegionKind::Rom, "KERNAL ROM"),
];

/// First few symbol names defined inside `start..=end`, comma separated.
fn contents_hint(machine: &dyn Machine, start: u16, end: u16) -> Option<String> {
    let names: Vec<String> = (start..=end)
        .filter_map(|addr| machine.name_at(addr))
        .take(MAP_HINT_SYMBOLS)
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

pub fn memory_map(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemoryMap = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    if !C64_FAMILY.contains(&machine.machine_name()) {
        return Err(ToolError::new(
            ErrorCode::NotImplemented,
            "Memory map not available for this machine type (C64/C128/DTV only)",
        ));
    }
    let start = match &p.start {
        Some(arg) => resolve(arg, machine, "start address")?,
        None => 0x0000,
    };
    let end = match &p.end {
        Some(arg) => resolve(arg, machine, "end address")?,
        None => 0xFFFF,
    };
    if end < start {
        return Err(ToolError::invalid_params("end address must be >= start address"));
    }
    let granularity = p
        .granularity
        .map(|n| n.clamp(1, 0xFFFF))
        .unwrap_or(DEFAULT_MAP_GRANULARITY);

    let mut regions = Vec::new();
    for region in C64_MEMORY_MAP.iter().filter(|r| r.end >= start && r.start <= end) {
        let from = region.start.max(start);
        let to = region.end.min(end);
        let len = i64::from(to - from) + 1;
        if len < granularity && !regions.is_empty() {
            continue;
        }
        regions.push(json!({
            "start": hex_address(from),
            "end": hex_address(to),
            "type": region.kind.name(),
            "name": region.name,
            "bank": 0,
            "contents_hint": contents_hint(machine, from, to),
        }));
    }

    tracing::debug!(target: "vice.mcp", start, end, regions = regions.len(), "memory map");
    Ok(json!({
        "region_count": regions.len(),
        "regions": regions,
    }))
}

pub fn memory_search(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemorySearch = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    let start = resolve(&p.start, machine, "start address")?;
    let end = resolve(&p.end, machine, "end address")?;
    if end < start {
        return Err(ToolError::invalid_params("end address must be >= start address"));
    }
    if p.pattern.is_empty() {
        return Err(ToolError::invalid_params("pattern cannot be empty"));
    }
    if p.pattern.len() > MAX_PATTERN_LEN {
        return Err(ToolError::invalid_params("pattern too long (max 256 bytes)"));
    }
    let pattern: Vec<u8> = p.pattern.iter().map(|&b| b as u8).collect();
    let mask: Vec<u8> = match &p.mask {
        Some(mask) if mask.len() != pattern.len() => {
            return Err(ToolError::invalid_params("mask length must match pattern length"));
        }
        Some(mask) => mask.iter().map(|&b| b as u8).collect(),
        None => vec![0xFF; pattern.len()],
    };
    let max_results = clamp_cap(p.max_results);

    let span = usize::from(end - start) + 1;
    let mut matches = Vec::new();
    let mut total = 0usize;
    if pattern.len() <= span {
        for offset in 0..=(span - pattern.len()) {
            let at = start.wrapping_add(offset as u16);
            let hit = pattern.iter().zip(&mask).enumerate().all(|(i, (&want, &m))| {
                machine.peek(at.wrapping_add(i as u16)) & m == want & m
            });
            if hit {
                total += 1;
                if matches.len() < max_results {
                    matches.push(hex_address(at));
                }
            }
        }
    }

    Ok(json!({
        "matches": matches,
        "total_matches": total,
        "truncated": matches.len() < total,
    }))
}

pub fn memory_fill(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemoryFill = parse_params(params)?;
    ctx.require_stopped()?;
    let start = resolve(&p.start, ctx.machine.as_ref(), "start address")?;
    let end = resolve(&p.end, ctx.machine.as_ref(), "end address")?;
    if start > end {
        return Err(ToolError::invalid_params("start address must be <= end address"));
    }
    let pattern = pattern_bytes(&p.pattern)?;

    let len = usize::from(end - start) + 1;
    for (offset, byte) in pattern.iter().cycle().take(len).enumerate() {
        ctx.machine.store(start.wrapping_add(offset as u16), *byte);
    }
    tracing::debug!(target: "vice.mcp", start, end, pattern_len = pattern.len(), "memory filled");
    Ok(json!({
        "bytes_written": len,
        "pattern_repetitions": len / pattern.len(),
    }))
}

/// Compares `len` bytes of live memory starting at `start` against
/// `reference(addr)`, reporting addresses relative to live memory.
fn compare(
    machine: &dyn Machine,
    start: u16,
    len: usize,
    max_differences: usize,
    reference: impl Fn(u16, usize) -> u8,
) -> Value {
    let mut differences = Vec::new();
    let mut total = 0usize;
    for offset in 0..len {
        let addr = start.wrapping_add(offset as u16);
        let current = machine.peek(addr);
        let expected = reference(addr, offset);
        if current != expected {
            total += 1;
            if differences.len() < max_differences {
                differences.push(json!({
                    "address": hex_address(addr),
                    "current": current,
                    "reference": expected,
                }));
            }
        }
    }
    json!({
        "differences": differences,
        "total_differences": total,
        "truncated": total > differences.len(),
    })
}

fn required<'a>(arg: &'a Option<AddressArg>, message: &str) -> Result<&'a AddressArg, ToolError> {
    arg.as_ref().ok_or_else(|| ToolError::invalid_params(message))
}

pub fn memory_compare(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::MemoryCompare = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    let max_differences = clamp_cap(p.max_differences);

    match p.mode.as_str() {
        "ranges" => {
            let r1_start = required(&p.range1_start, "range1_start address required for ranges mode")?;
            let r1_start = resolve(r1_start, machine, "range1_start")?;
            let r1_end = required(&p.range1_end, "range1_end address required for ranges mode")?;
            let r1_end = resolve(r1_end, machine, "range1_end")?;
            if r1_end < r1_start {
                return Err(ToolError::invalid_params("range1_end must be >= range1_start"));
            }
            let r2_start = required(&p.range2_start, "range2_start address required for ranges mode")?;
            let r2_start = resolve(r2_start, machine, "range2_start")?;

            let len = usize::from(r1_end - r1_start) + 1;
            if usize::from(r2_start) + len - 1 > 0xFFFF {
                return Err(ToolError::invalid_params("Second range exceeds address space"));
            }
            Ok(compare(machine, r1_start, len, max_differences, |_, offset| {
                machine.peek(r2_start.wrapping_add(offset as u16))
            }))
        }
        "snapshot" => {
            let name = p.snapshot_name.as_deref().ok_or_else(|| {
                ToolError::invalid_params("snapshot_name parameter required for snapshot mode")
            })?;
            if name.is_empty() {
                return Err(ToolError::invalid_params("snapshot_name cannot be empty"));
            }
            if !snapshot::is_valid_name(name) {
                return Err(ToolError::invalid_params(
                    "Invalid snapshot name: use only alphanumeric characters, underscores, and hyphens",
                ));
            }
            let start = required(&p.start, "start address required for snapshot mode")?;
            let start = resolve(start, machine, "start address")?;
            let end = required(&p.end, "end address required for snapshot mode")?;
            let end = resolve(end, machine, "end address")?;
            if end < start {
                return Err(ToolError::invalid_params("end address must be >= start address"));
            }

            let ram = ctx.snapshots.extract_ram(name)?;
            let len = usize::from(end - start) + 1;
            Ok(compare(machine, start, len, max_differences, |addr, _| {
                ram.get(usize::from(addr)).copied().unwrap_or(0)
            }))
        }
        other => Err(ToolError::invalid_params(format!(
            "Unknown mode '{other}' (valid: 'ranges', 'snapshot')"
        ))),
    }
}
