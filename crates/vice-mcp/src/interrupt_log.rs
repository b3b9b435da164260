//! Interrupt log sessions.
//!
//! Each log keeps the first `max_entries` interrupts whose kind passes its
//! filter, and counts every matching interrupt including the ones that no
//! longer fit.

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::Clock;
use crate::params::{self, parse_params};
use crate::slots::SlotTable;

pub const MAX_INTERRUPT_LOGS: usize = 16;
pub const MAX_INTERRUPT_ENTRIES: usize = 10_000;
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterruptKind {
    Irq,
    Nmi,
    Brk,
}

impl InterruptKind {
    pub const ALL: [InterruptKind; 3] = [InterruptKind::Irq, InterruptKind::Nmi, InterruptKind::Brk];

    fn bit(self) -> u8 {
        match self {
            InterruptKind::Irq => 0x01,
            InterruptKind::Nmi => 0x02,
            InterruptKind::Brk => 0x04,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InterruptKind::Irq => "irq",
            InterruptKind::Nmi => "nmi",
            InterruptKind::Brk => "brk",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Set of interrupt kinds a log accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptFilter(u8);

impl InterruptFilter {
    pub const ALL: InterruptFilter = InterruptFilter(0x07);
    pub const NONE: InterruptFilter = InterruptFilter(0);

    pub fn with(self, kind: InterruptKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(self, kind: InterruptKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn kinds(self) -> impl Iterator<Item = InterruptKind> {
        InterruptKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptLogEntry {
    pub kind: InterruptKind,
    pub cycle: u64,
    pub pc: u16,
    pub vector_address: u16,
    pub handler_address: u16,
}

impl InterruptLogEntry {
    fn to_json(&self) -> Value {
        json!({
            "type": self.kind.name(),
            "cycle": self.cycle,
            "pc": self.pc,
            "vector_address": self.vector_address,
            "handler_address": self.handler_address,
        })
    }
}

#[derive(Debug)]
pub struct InterruptLog {
    pub id: String,
    pub filter: InterruptFilter,
    pub max_entries: usize,
    pub entries: Vec<InterruptLogEntry>,
    /// Matching interrupts seen, including ones dropped once the log was full.
    pub total_interrupts: u64,
    pub start_cycles: u64,
}

#[derive(Debug)]
pub struct InterruptLogStore {
    logs: SlotTable<InterruptLog>,
    next_id: u32,
}

impl Default for InterruptLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLogStore {
    pub fn new() -> Self {
        Self {
            logs: SlotTable::with_capacity(MAX_INTERRUPT_LOGS),
            next_id: 0,
        }
    }

    /// Starts a log and returns its `intlog_N` id, or `None` when full.
    pub fn start(&mut self, filter: InterruptFilter, max_entries: usize, cycles: u64) -> Option<String> {
        if self.logs.is_full() {
            return None;
        }
        self.next_id += 1;
        let id = format!("intlog_{}", self.next_id);
        let max_entries = max_entries.clamp(1, MAX_INTERRUPT_ENTRIES);
        self.logs
            .insert(InterruptLog {
                id: id.clone(),
                filter,
                max_entries,
                entries: Vec::with_capacity(max_entries.min(DEFAULT_MAX_ENTRIES)),
                total_interrupts: 0,
                start_cycles: cycles,
            })
            .ok()?;
        Some(id)
    }

    pub fn stop(&mut self, id: &str) -> Option<InterruptLog> {
        let slot = self.logs.find(|log| log.id == id)?;
        self.logs.remove(slot)
    }

    pub fn get(&self, id: &str) -> Option<&InterruptLog> {
        let slot = self.logs.find(|log| log.id == id)?;
        self.logs.get(slot)
    }

    /// Entries from `since_index` onwards plus the index to resume from.
    /// An index past the end is clamped, yielding no entries.
    pub fn read(&self, id: &str, since_index: usize) -> Option<(&[InterruptLogEntry], usize)> {
        let log = self.get(id)?;
        let total = log.entries.len();
        let from = since_index.min(total);
        Some((&log.entries[from..], total))
    }

    pub fn record(&mut self, kind: InterruptKind, cycle: u64, pc: u16, vector_address: u16, handler_address: u16) {
        for (_, log) in self.logs.iter_mut() {
            if !log.filter.contains(kind) {
                continue;
            }
            log.total_interrupts += 1;
            if log.entries.len() < log.max_entries {
                log.entries.push(InterruptLogEntry {
                    kind,
                    cycle,
                    pc,
                    vector_address,
                    handler_address,
                });
            }
        }
    }
}

fn entries_json(entries: &[InterruptLogEntry]) -> Value {
    Value::Array(entries.iter().map(InterruptLogEntry::to_json).collect())
}

fn parse_filter(types: Option<Vec<String>>) -> Result<InterruptFilter, ToolError> {
    let Some(types) = types else {
        return Ok(InterruptFilter::ALL);
    };
    let mut filter = InterruptFilter::NONE;
    for name in &types {
        let kind = InterruptKind::from_name(name).ok_or_else(|| {
            ToolError::invalid_params("Invalid interrupt type: must be 'irq', 'nmi', or 'brk'")
        })?;
        filter = filter.with(kind);
    }
    if filter.is_empty() {
        return Err(ToolError::invalid_params(
            "Invalid types array: must contain at least one valid type",
        ));
    }
    Ok(filter)
}

fn require_log_id(log_id: &str) -> Result<(), ToolError> {
    if log_id.is_empty() {
        Err(ToolError::invalid_params("Invalid log_id: cannot be empty"))
    } else {
        Ok(())
    }
}

pub fn interrupt_log_start(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::InterruptLogStart = parse_params(params)?;
    let filter = parse_filter(p.types)?;
    let max_entries = p
        .max_entries
        .map(|n| n.clamp(1, MAX_INTERRUPT_ENTRIES as i64) as usize)
        .unwrap_or(DEFAULT_MAX_ENTRIES);

    let cycles = ctx.machine.cycles();
    let log_id = ctx
        .interrupt_logs
        .start(filter, max_entries, cycles)
        .ok_or_else(|| ToolError::internal("Maximum interrupt log configurations reached"))?;

    tracing::info!(target: "vice.mcp.trace", log_id = %log_id, max_entries, "interrupt log started");

    let types: Vec<&str> = filter.kinds().map(InterruptKind::name).collect();
    Ok(json!({
        "log_id": log_id,
        "types": types,
        "max_entries": max_entries,
    }))
}

pub fn interrupt_log_stop(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::InterruptLogStop = parse_params(params)?;
    require_log_id(&p.log_id)?;

    match ctx.interrupt_logs.stop(&p.log_id) {
        Some(log) => {
            tracing::info!(
                target: "vice.mcp.trace",
                log_id = %log.id,
                entries = log.entries.len(),
                total = log.total_interrupts,
                "interrupt log stopped"
            );
            Ok(json!({
                "log_id": log.id,
                "entries": entries_json(&log.entries),
                "total_interrupts": log.total_interrupts,
                "stopped": true,
            }))
        }
        None => Ok(json!({
            "log_id": p.log_id,
            "entries": [],
            "total_interrupts": 0,
            "stopped": false,
        })),
    }
}

pub fn interrupt_log_read(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::InterruptLogRead = parse_params(params)?;
    require_log_id(&p.log_id)?;
    let since_index = p.since_index.unwrap_or(0).max(0) as usize;

    let (entries, next_index) = ctx
        .interrupt_logs
        .read(&p.log_id, since_index)
        .ok_or_else(|| ToolError::invalid_params("Invalid log_id: log not found or not active"))?;

    Ok(json!({
        "log_id": p.log_id,
        "entries": entries_json(entries),
        "next_index": next_index,
        "total_entries": next_index,
    }))
}
