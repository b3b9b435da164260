use std::path::PathBuf;

use vice_mcp_config::McpConfig;

use crate::checkpoint::auto_snapshot::AutoSnapshotStore;
use crate::checkpoint::groups::GroupRegistry;
use crate::error::{ErrorCode, ToolError};
use crate::execution::ExecState;
use crate::interrupt_log::{InterruptKind, InterruptLogStore};
use crate::machine::{Clock, Machine};
use crate::snapshot::SnapshotStore;
use crate::trace::TraceStore;

/// Everything the tool handlers operate on.
///
/// Owned by the execution context; the network side never holds a reference
/// and reaches it only through [`crate::bridge::BridgeHandle`]. Dropping the
/// context stops every trace session so their files are flushed.
pub struct McpContext {
    pub(crate) machine: Box<dyn Machine>,
    pub(crate) groups: GroupRegistry,
    pub(crate) auto_snapshots: AutoSnapshotStore,
    pub(crate) traces: TraceStore,
    pub(crate) interrupt_logs: InterruptLogStore,
    pub(crate) snapshots: SnapshotStore,
    pub(crate) exec: ExecState,
    pub(crate) stopwatch_base: u64,
}

impl McpContext {
    pub fn new(machine: Box<dyn Machine>, snapshot_dir: impl Into<PathBuf>) -> Self {
        let stopwatch_base = machine.cycles();
        let snapshots = SnapshotStore::new(snapshot_dir);
        tracing::debug!(
            target: "vice.mcp",
            machine = machine.machine_name(),
            snapshot_dir = %snapshots.dir().display(),
            "control plane context created"
        );
        Self {
            machine,
            groups: GroupRegistry::new(),
            auto_snapshots: AutoSnapshotStore::new(),
            traces: TraceStore::new(),
            interrupt_logs: InterruptLogStore::new(),
            snapshots,
            exec: ExecState::Stopped,
            stopwatch_base,
        }
    }

    pub fn from_config(machine: Box<dyn Machine>, config: &McpConfig) -> Self {
        Self::new(machine, config.snapshot_dir())
    }

    pub fn machine(&self) -> &dyn Machine {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> &mut dyn Machine {
        self.machine.as_mut()
    }

    pub fn exec_state(&self) -> ExecState {
        self.exec
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Fails with EmulatorRunning unless execution is stopped.
    pub(crate) fn require_stopped(&self) -> Result<(), ToolError> {
        if self.exec.is_stopped() {
            Ok(())
        } else {
            Err(ToolError::new(
                ErrorCode::EmulatorRunning,
                "Emulator is running; pause execution first (vice.execution.pause)",
            ))
        }
    }

    /// Interrupt hook called by the core when the CPU takes an interrupt.
    pub fn on_interrupt(&mut self, kind: InterruptKind, pc: u16, vector_address: u16, handler_address: u16) {
        let cycle = self.machine.cycles();
        self.interrupt_logs
            .record(kind, cycle, pc, vector_address, handler_address);
    }
}

impl Drop for McpContext {
    fn drop(&mut self) {
        let cycles = self.machine.cycles();
        let stopped = self.traces.stop_all(cycles);
        if stopped > 0 {
            tracing::debug!(target: "vice.mcp.trace", sessions = stopped, "stopped trace sessions on shutdown");
        }
    }
}
