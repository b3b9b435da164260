//! Built-in machine used when no emulator core is attached.
//!
//! Flat 64 KiB RAM, a register file, a checkpoint table, a symbol table and
//! a cycle clock. Every instruction is treated as a one-byte, two-cycle no-op:
//! the point is to exercise the control plane, not to emulate a 6502.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use crate::condition::ConditionNode;
use crate::snapshot::vsf::{self, VsfWriter};

use super::{
    Checkpoint, CheckpointHit, CheckpointSpec, CheckpointTable, Clock, Cpu, Execution, Machine,
    Memory, MemoryBank, Registers, ResetKind, SnapshotIo, SymbolTable, FLAG_INTERRUPT, RESET_VECTOR,
};

pub const MACHINE_NAME: &str = "C64";

/// Version reported in snapshots and `vice.ping`.
pub const EMULATOR_VERSION: &str = "3.9";
const EMULATOR_VERSION_BYTES: [u8; 4] = [3, 9, 0, 0];

const CYCLES_PER_INSTRUCTION: u64 = 2;

/// Bank numbers exposed by [`Memory::banks`]. Both view the same RAM.
const BANKS: [(&str, u8); 2] = [("cpu", 0), ("ram", 1)];

const POWER_ON_REGISTERS: Registers = Registers {
    pc: 0,
    a: 0,
    x: 0,
    y: 0,
    sp: 0xFF,
    status: 0x20,
};

pub struct HeadlessMachine {
    ram: Box<[u8; vsf::RAM_SIZE]>,
    registers: Registers,
    cycles: u64,
    checkpoints: BTreeMap<u32, Checkpoint>,
    next_checkpoint_id: u32,
    symbols: HashMap<String, u16>,
}

impl Default for HeadlessMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessMachine {
    pub fn new() -> Self {
        Self {
            ram: Box::new([0u8; vsf::RAM_SIZE]),
            registers: POWER_ON_REGISTERS,
            cycles: 0,
            checkpoints: BTreeMap::new(),
            next_checkpoint_id: 1,
            symbols: HashMap::new(),
        }
    }

    fn cpu_module(&self) -> Vec<u8> {
        let regs = &self.registers;
        let mut payload = Vec::with_capacity(15);
        payload.extend_from_slice(&self.cycles.to_le_bytes());
        payload.extend_from_slice(&[regs.a, regs.x, regs.y, regs.sp]);
        payload.extend_from_slice(&regs.pc.to_le_bytes());
        payload.push(regs.status);
        payload
    }

    fn restore_cpu_module(&mut self, payload: &[u8]) -> io::Result<()> {
        let [c0, c1, c2, c3, c4, c5, c6, c7, a, x, y, sp, pc_lo, pc_hi, status, ..] = *payload else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "MAINCPU module too short"));
        };
        self.cycles = u64::from_le_bytes([c0, c1, c2, c3, c4, c5, c6, c7]);
        self.registers = Registers {
            pc: u16::from_le_bytes([pc_lo, pc_hi]),
            a,
            x,
            y,
            sp,
            status,
        };
        Ok(())
    }
}

impl Cpu for HeadlessMachine {
    fn registers(&self) -> Registers {
        self.registers
    }

    fn set_registers(&mut self, registers: Registers) {
        self.registers = registers;
    }

    fn reset(&mut self, kind: ResetKind) {
        match kind {
            ResetKind::Soft => {
                // The reset sequence runs three dummy stack reads and sets I.
                self.registers.sp = self.registers.sp.wrapping_sub(3);
                self.registers.set_flag(FLAG_INTERRUPT, true);
            }
            ResetKind::Hard => {
                self.ram.fill(0);
                self.registers = POWER_ON_REGISTERS;
            }
        }
        let vector = [self.ram[RESET_VECTOR as usize], self.ram[RESET_VECTOR as usize + 1]];
        self.registers.pc = u16::from_le_bytes(vector);
    }
}

impl Memory for HeadlessMachine {
    fn peek(&self, addr: u16) -> u8 {
        self.ram[addr as usize]
    }

    fn peek_bank(&self, _bank: u8, addr: u16) -> u8 {
        self.ram[addr as usize]
    }

    fn store(&mut self, addr: u16, value: u8) {
        self.ram[addr as usize] = value;
    }

    fn banks(&self) -> Vec<MemoryBank> {
        BANKS
            .iter()
            .map(|&(name, number)| MemoryBank {
                name: name.to_owned(),
                number,
            })
            .collect()
    }
}

impl Clock for HeadlessMachine {
    fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl SymbolTable for HeadlessMachine {
    fn address_of(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).copied()
    }

    fn name_at(&self, addr: u16) -> Option<String> {
        // Several names may share an address; pick the smallest for stable output.
        self.symbols
            .iter()
            .filter(|(_, a)| **a == addr)
            .map(|(name, _)| name)
            .min()
            .cloned()
    }

    fn define_symbol(&mut self, name: &str, addr: u16) {
        self.symbols.insert(name.to_owned(), addr);
    }
}

impl CheckpointTable for HeadlessMachine {
    fn add_checkpoint(&mut self, spec: CheckpointSpec) -> Option<u32> {
        let id = self.next_checkpoint_id;
        self.next_checkpoint_id = id.checked_add(1)?;
        self.checkpoints.insert(
            id,
            Checkpoint {
                id,
                start: spec.start,
                end: spec.end,
                stop: spec.stop,
                enabled: true,
                ops: spec.ops,
                hit_count: 0,
                ignore_count: 0,
                temporary: spec.temporary,
                condition: None,
            },
        );
        Some(id)
    }

    fn remove_checkpoint(&mut self, id: u32) -> bool {
        self.checkpoints.remove(&id).is_some()
    }

    fn checkpoint(&self, id: u32) -> Option<Checkpoint> {
        self.checkpoints.get(&id).cloned()
    }

    fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.values().cloned().collect()
    }

    fn set_checkpoint_enabled(&mut self, id: u32, enabled: bool) -> bool {
        self.checkpoints
            .get_mut(&id)
            .map(|cp| cp.enabled = enabled)
            .is_some()
    }

    fn set_checkpoint_condition(&mut self, id: u32, condition: ConditionNode) -> bool {
        self.checkpoints
            .get_mut(&id)
            .map(|cp| cp.condition = Some(condition))
            .is_some()
    }

    fn set_checkpoint_ignore_count(&mut self, id: u32, count: u32) -> bool {
        self.checkpoints
            .get_mut(&id)
            .map(|cp| cp.ignore_count = count)
            .is_some()
    }

    fn hit_exec(&mut self, pc: u16, registers: &Registers) -> Vec<CheckpointHit> {
        let mut hits = Vec::new();
        for cp in self.checkpoints.values_mut() {
            if !cp.enabled || !cp.ops.exec || pc < cp.start || pc > cp.end {
                continue;
            }
            if let Some(condition) = &cp.condition {
                if !condition.evaluate(registers) {
                    continue;
                }
            }
            cp.hit_count = cp.hit_count.saturating_add(1);
            if cp.ignore_count > 0 {
                cp.ignore_count -= 1;
                continue;
            }
            hits.push(CheckpointHit {
                id: cp.id,
                stop: cp.stop,
                temporary: cp.temporary,
            });
        }
        hits
    }
}

impl SnapshotIo for HeadlessMachine {
    fn write_snapshot(&mut self, path: &Path, _include_roms: bool, _include_disks: bool) -> io::Result<()> {
        let file = BufWriter::new(File::create(path)?);
        let mut writer = VsfWriter::new(file, MACHINE_NAME, EMULATOR_VERSION_BYTES)?;
        writer.write_module(vsf::CPU_MODULE, (1, 0), &self.cpu_module())?;

        let mut memory = Vec::with_capacity(vsf::RAM_PREFIX_LEN + vsf::RAM_SIZE);
        memory.extend_from_slice(&[0x2F, 0x37, 1, 1]);
        memory.extend_from_slice(&self.ram[..]);
        writer.write_module(vsf::MEMORY_MODULE, (0, 0), &memory)?;
        writer.finish()?;
        Ok(())
    }

    fn read_snapshot(&mut self, path: &Path) -> io::Result<()> {
        let invalid = |err: vsf::VsfError| io::Error::new(io::ErrorKind::InvalidData, err.to_string());

        let ram = vsf::extract_ram_from_path(path).map_err(invalid)?;
        let mut reader = BufReader::new(File::open(path)?);
        let cpu = vsf::read_module(&mut reader, vsf::CPU_MODULE).map_err(invalid)?;

        self.restore_cpu_module(&cpu)?;
        self.ram.copy_from_slice(&ram);
        Ok(())
    }
}

impl Execution for HeadlessMachine {
    fn execute_instruction(&mut self) {
        self.registers.pc = self.registers.pc.wrapping_add(1);
        self.cycles += CYCLES_PER_INSTRUCTION;
    }
}

impl Machine for HeadlessMachine {
    fn machine_name(&self) -> &str {
        MACHINE_NAME
    }

    fn emulator_version(&self) -> &str {
        EMULATOR_VERSION
    }
}
