//! Execution trace sessions.
//!
//! A session records the PC (and optionally A/X/Y/SP/P) of every executed
//! instruction inside its PC window to a text file, up to an instruction cap.
//! The output file is created on the first recorded instruction and flushed
//! when the session stops.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::{Clock, Registers};
use crate::params::{self, parse_params};
use crate::slots::SlotTable;

pub const MAX_TRACE_SESSIONS: usize = 16;
pub const MAX_OUTPUT_PATH_LEN: usize = 256;
pub const DEFAULT_MAX_INSTRUCTIONS: u32 = 10_000;
pub const MAX_INSTRUCTIONS_LIMIT: u32 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceOptions {
    pub output_file: PathBuf,
    pub pc_filter: RangeInclusive<u16>,
    pub max_instructions: u32,
    pub include_registers: bool,
}

#[derive(Debug)]
struct TraceSession {
    id: String,
    options: TraceOptions,
    instructions_recorded: u32,
    start_cycles: u64,
    writer: Option<BufWriter<File>>,
    failed: bool,
}

impl TraceSession {
    fn record(&mut self, pc: u16, regs: &Registers) {
        if self.failed
            || self.instructions_recorded >= self.options.max_instructions
            || !self.options.pc_filter.contains(&pc)
        {
            return;
        }

        if self.writer.is_none() {
            match File::create(&self.options.output_file) {
                Ok(file) => self.writer = Some(BufWriter::new(file)),
                Err(err) => {
                    tracing::warn!(
                        target: "vice.mcp.trace",
                        trace_id = %self.id,
                        path = %self.options.output_file.display(),
                        error = %err,
                        "cannot open trace output; session will record nothing"
                    );
                    self.failed = true;
                    return;
                }
            }
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let written = if self.options.include_registers {
            writeln!(
                writer,
                "${:04X} A={:02X} X={:02X} Y={:02X} SP={:02X} P={:02X}",
                pc, regs.a, regs.x, regs.y, regs.sp, regs.status
            )
        } else {
            writeln!(writer, "${pc:04X}")
        };
        match written {
            Ok(()) => self.instructions_recorded += 1,
            Err(err) => {
                tracing::warn!(target: "vice.mcp.trace", trace_id = %self.id, error = %err, "trace write failed");
                self.failed = true;
            }
        }
    }

    fn finish(mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                tracing::warn!(target: "vice.mcp.trace", trace_id = %self.id, error = %err, "trace flush failed");
            }
        }
    }
}

/// Statistics captured when a session stops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSummary {
    pub id: String,
    pub output_file: PathBuf,
    pub instructions_recorded: u32,
    pub cycles_elapsed: u64,
}

#[derive(Debug)]
pub struct TraceStore {
    sessions: SlotTable<TraceSession>,
    next_id: u32,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceStore {
    pub fn new() -> Self {
        Self {
            sessions: SlotTable::with_capacity(MAX_TRACE_SESSIONS),
            next_id: 0,
        }
    }

    /// Starts a session and returns its `trace_N` id, or `None` when every
    /// slot is taken.
    pub fn start(&mut self, options: TraceOptions, cycles: u64) -> Option<String> {
        if self.sessions.is_full() {
            return None;
        }
        self.next_id += 1;
        let id = format!("trace_{}", self.next_id);
        let session = TraceSession {
            id: id.clone(),
            options,
            instructions_recorded: 0,
            start_cycles: cycles,
            writer: None,
            failed: false,
        };
        self.sessions.insert(session).ok()?;
        Some(id)
    }

    /// Stops a session, releasing its slot. `None` when no session has `id`.
    pub fn stop(&mut self, id: &str, cycles: u64) -> Option<TraceSummary> {
        let slot = self.sessions.find(|session| session.id == id)?;
        let session = self.sessions.remove(slot)?;
        let summary = TraceSummary {
            id: session.id.clone(),
            output_file: session.options.output_file.clone(),
            instructions_recorded: session.instructions_recorded,
            cycles_elapsed: cycles.saturating_sub(session.start_cycles),
        };
        session.finish();
        Some(summary)
    }

    /// Stops every session. Returns how many were active.
    pub fn stop_all(&mut self, cycles: u64) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|(_, s)| s.id.clone()).collect();
        ids.iter().filter(|id| self.stop(id, cycles).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Instruction hook: `pc` and `regs` describe the instruction just executed.
    pub fn on_instruction(&mut self, pc: u16, regs: &Registers) {
        for (_, session) in self.sessions.iter_mut() {
            session.record(pc, regs);
        }
    }
}

fn filter_bound(value: Option<i64>, default: u16, field: &str) -> Result<u16, ToolError> {
    match value {
        None => Ok(default),
        Some(value) => u16::try_from(value)
            .map_err(|_| ToolError::invalid_params(format!("Invalid {field}: must be 0-65535"))),
    }
}

pub fn trace_start(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::TraceStart = parse_params(params)?;

    if p.output_file.is_empty() {
        return Err(ToolError::invalid_params("Invalid output_file: cannot be empty"));
    }
    if p.output_file.len() >= MAX_OUTPUT_PATH_LEN {
        return Err(ToolError::invalid_params(
            "Invalid output_file: path too long (max 255 characters)",
        ));
    }
    let start = filter_bound(p.pc_filter_start, 0, "pc_filter_start")?;
    let end = filter_bound(p.pc_filter_end, 0xFFFF, "pc_filter_end")?;
    if start > end {
        return Err(ToolError::invalid_params("Invalid PC filter: start must be <= end"));
    }
    let max_instructions = p
        .max_instructions
        .map(|n| n.clamp(1, i64::from(MAX_INSTRUCTIONS_LIMIT)) as u32)
        .unwrap_or(DEFAULT_MAX_INSTRUCTIONS);
    let include_registers = p.include_registers.unwrap_or(false);

    let options = TraceOptions {
        output_file: PathBuf::from(&p.output_file),
        pc_filter: start..=end,
        max_instructions,
        include_registers,
    };
    let cycles = ctx.machine.cycles();
    let trace_id = ctx
        .traces
        .start(options, cycles)
        .ok_or_else(|| ToolError::internal("Maximum trace configurations reached"))?;

    tracing::info!(
        target: "vice.mcp.trace",
        trace_id = %trace_id,
        output_file = %p.output_file,
        pc_start = start,
        pc_end = end,
        max_instructions,
        include_registers,
        "trace started"
    );

    Ok(json!({
        "trace_id": trace_id,
        "output_file": p.output_file,
        "pc_filter": { "start": start, "end": end },
        "max_instructions": max_instructions,
        "include_registers": include_registers,
    }))
}

pub fn trace_stop(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::TraceStop = parse_params(params)?;
    if p.trace_id.is_empty() {
        return Err(ToolError::invalid_params("Invalid trace_id: cannot be empty"));
    }

    let cycles = ctx.machine.cycles();
    let Some(summary) = ctx.traces.stop(&p.trace_id, cycles) else {
        tracing::debug!(target: "vice.mcp.trace", trace_id = %p.trace_id, "trace not found");
        return Ok(json!({ "trace_id": p.trace_id, "stopped": false }));
    };

    tracing::info!(
        target: "vice.mcp.trace",
        trace_id = %summary.id,
        instructions = summary.instructions_recorded,
        cycles = summary.cycles_elapsed,
        "trace stopped"
    );
    Ok(json!({
        "trace_id": summary.id,
        "stopped": true,
        "instructions_recorded": summary.instructions_recorded,
        "output_file": summary.output_file.display().to_string(),
        "cycles_elapsed": summary.cycles_elapsed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(path: PathBuf) -> TraceOptions {
        TraceOptions {
            output_file: path,
            pc_filter: 0x1000..=0x1FFF,
            max_instructions: 3,
            include_registers: false,
        }
    }

    #[test]
    fn ids_keep_counting_across_slot_reuse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = TraceStore::new();
        let first = store.start(options(dir.path().join("a.txt")), 0).expect("slot");
        assert_eq!(first, "trace_1");
        assert!(store.stop(&first, 10).is_some());
        let second = store.start(options(dir.path().join("b.txt")), 0).expect("slot");
        assert_eq!(second, "trace_2");
    }

    #[test]
    fn refuses_sessions_past_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = TraceStore::new();
        for i in 0..MAX_TRACE_SESSIONS {
            assert!(store.start(options(dir.path().join(format!("{i}.txt"))), 0).is_some());
        }
        assert_eq!(store.start(options(dir.path().join("extra.txt")), 0), None);
        assert_eq!(store.len(), MAX_TRACE_SESSIONS);
    }

    #[test]
    fn records_filtered_instructions_up_to_the_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.txt");
        let mut store = TraceStore::new();
        let id = store.start(options(path.clone()), 100).expect("slot");

        let regs = Registers::default();
        for pc in [0x0FFF, 0x1000, 0x1001, 0x2000, 0x1002, 0x1003] {
            store.on_instruction(pc, &regs);
        }

        let summary = store.stop(&id, 150).expect("summary");
        assert_eq!(summary.instructions_recorded, 3);
        assert_eq!(summary.cycles_elapsed, 50);
        let text = std::fs::read_to_string(&path).expect("trace file");
        assert_eq!(text, "$1000\n$1001\n$1002\n");
    }

    #[test]
    fn writes_registers_when_requested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("regs.txt");
        let mut store = TraceStore::new();
        let id = store
            .start(
                TraceOptions {
                    include_registers: true,
                    ..options(path.clone())
                },
                0,
            )
            .expect("slot");

        let regs = Registers {
            pc: 0x1000,
            a: 0x01,
            x: 0x02,
            y: 0x03,
            sp: 0xFD,
            status: 0x32,
        };
        store.on_instruction(0x1000, &regs);
        store.stop(&id, 0);

        let text = std::fs::read_to_string(&path).expect("trace file");
        assert_eq!(text, "$1000 A=01 X=02 Y=03 SP=FD P=32\n");
    }

    #[test]
    fn no_file_is_created_until_something_is_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("never.txt");
        let mut store = TraceStore::new();
        let id = store.start(options(path.clone()), 0).expect("slot");
        store.on_instruction(0x0000, &Registers::default());
        store.stop(&id, 0);
        assert!(!path.exists());
    }

    #[test]
    fn stopping_unknown_ids_is_not_an_error() {
        let mut store = TraceStore::new();
        assert_eq!(store.stop("trace_42", 0), None);
        assert!(store.is_empty());
    }
}
