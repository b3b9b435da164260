//! Contracts the control plane consumes from the emulation core.
//!
//! The emulator owns CPU, memory, checkpoints and snapshot serialization. The
//! control plane only ever reaches them through the traits below, which keeps
//! every tool testable against [`headless::HeadlessMachine`].

use std::io;
use std::path::Path;

use crate::condition::ConditionNode;

pub mod headless;

pub const FLAG_NEGATIVE: u8 = 0x80;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_CARRY: u8 = 0x01;

/// 6502-family register file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub status: u8,
}

impl Registers {
    pub fn flag(&self, mask: u8) -> bool {
        self.status & mask != 0
    }

    pub fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.status |= mask;
        } else {
            self.status &= !mask;
        }
    }
}

/// Memory operations a checkpoint reacts to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryOps {
    pub load: bool,
    pub store: bool,
    pub exec: bool,
}

impl MemoryOps {
    pub const EXEC: MemoryOps = MemoryOps {
        load: false,
        store: false,
        exec: true,
    };

    pub fn is_empty(&self) -> bool {
        !(self.load || self.store || self.exec)
    }
}

/// Arguments for creating a checkpoint in the core's table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointSpec {
    pub start: u16,
    pub end: u16,
    pub stop: bool,
    pub ops: MemoryOps,
    pub temporary: bool,
}

/// Snapshot of one checkpoint as the core currently sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: u32,
    pub start: u16,
    pub end: u16,
    pub stop: bool,
    pub enabled: bool,
    pub ops: MemoryOps,
    pub hit_count: u32,
    pub ignore_count: u32,
    pub temporary: bool,
    pub condition: Option<ConditionNode>,
}

/// A checkpoint that fired on the instruction just executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointHit {
    pub id: u32,
    pub stop: bool,
    pub temporary: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBank {
    pub name: String,
    pub number: u8,
}

/// Address of the 6502 reset vector.
pub const RESET_VECTOR: u16 = 0xFFFC;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetKind {
    /// CPU reset, as if the reset line was pulled. Memory is kept.
    Soft,
    /// Power cycle: memory and every chip start over.
    Hard,
}

pub trait Cpu {
    fn registers(&self) -> Registers;
    fn set_registers(&mut self, registers: Registers);

    /// Resets the machine. The CPU restarts at the address in the reset
    /// vector.
    fn reset(&mut self, kind: ResetKind);
}

pub trait Memory {
    /// Side-effect-free read through the default CPU view.
    fn peek(&self, addr: u16) -> u8;

    /// Side-effect-free read through a specific bank.
    fn peek_bank(&self, bank: u8, addr: u16) -> u8;

    fn store(&mut self, addr: u16, value: u8);

    fn banks(&self) -> Vec<MemoryBank>;
}

pub trait Clock {
    /// Monotonic CPU clock.
    fn cycles(&self) -> u64;
}

pub trait SymbolTable {
    fn address_of(&self, name: &str) -> Option<u16>;
    fn name_at(&self, addr: u16) -> Option<String>;

    /// Registers `name`, replacing any previous address for it.
    fn define_symbol(&mut self, name: &str, addr: u16);
}

/// The core's checkpoint table. Ids are owned and issued by the core.
pub trait CheckpointTable {
    fn add_checkpoint(&mut self, spec: CheckpointSpec) -> Option<u32>;
    fn remove_checkpoint(&mut self, id: u32) -> bool;
    fn checkpoint(&self, id: u32) -> Option<Checkpoint>;
    fn checkpoints(&self) -> Vec<Checkpoint>;
    fn set_checkpoint_enabled(&mut self, id: u32, enabled: bool) -> bool;
    fn set_checkpoint_condition(&mut self, id: u32, condition: ConditionNode) -> bool;
    fn set_checkpoint_ignore_count(&mut self, id: u32, count: u32) -> bool;

    /// Evaluates exec checkpoints for an instruction about to run at `pc`,
    /// updating hit and ignore counters.
    fn hit_exec(&mut self, pc: u16, registers: &Registers) -> Vec<CheckpointHit>;
}

pub trait SnapshotIo {
    fn write_snapshot(&mut self, path: &Path, include_roms: bool, include_disks: bool) -> io::Result<()>;
    fn read_snapshot(&mut self, path: &Path) -> io::Result<()>;
}

pub trait Execution {
    /// Executes exactly one instruction at the current PC.
    fn execute_instruction(&mut self);
}

/// Everything the control plane needs from a running emulator.
pub trait Machine:
    Cpu + Memory + Clock + SymbolTable + CheckpointTable + SnapshotIo + Execution + Send
{
    /// Machine model name, e.g. `C64`.
    fn machine_name(&self) -> &str;

    fn emulator_version(&self) -> &str;
}
