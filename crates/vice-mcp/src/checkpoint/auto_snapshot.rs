//! Snapshots taken automatically when a checkpoint fires.
//!
//! Each configuration owns a ring of `max_snapshots` files named
//! `{prefix}_{index:03}`; hit `n` writes slot `n % max_snapshots`,
//! overwriting whatever the slot held before.

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::CheckpointTable;
use crate::params::{self, parse_params};
use crate::slots::SlotTable;
use crate::snapshot::SaveOptions;

pub const MAX_AUTO_SNAPSHOT_CONFIGS: usize = 64;
pub const MAX_PREFIX_LEN: usize = 64;
pub const DEFAULT_MAX_SNAPSHOTS: u32 = 10;
pub const MAX_SNAPSHOTS_LIMIT: u32 = 999;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoSnapshotConfig {
    pub checkpoint_id: u32,
    pub prefix: String,
    pub max_snapshots: u32,
    pub include_disks: bool,
    pub hit_count: u32,
}

impl AutoSnapshotConfig {
    pub fn snapshot_name(&self, index: u32) -> String {
        format!("{}_{index:03}", self.prefix)
    }
}

#[derive(Debug)]
pub struct AutoSnapshotStore {
    configs: SlotTable<AutoSnapshotConfig>,
}

impl Default for AutoSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoSnapshotStore {
    pub fn new() -> Self {
        Self {
            configs: SlotTable::with_capacity(MAX_AUTO_SNAPSHOT_CONFIGS),
        }
    }

    /// Installs `config`, replacing any configuration for the same
    /// checkpoint. Fails only when the table is full.
    pub fn set(&mut self, config: AutoSnapshotConfig) -> Result<(), AutoSnapshotConfig> {
        match self.configs.find(|c| c.checkpoint_id == config.checkpoint_id) {
            Some(slot) => {
                self.configs.replace(slot, config);
                Ok(())
            }
            None => self.configs.insert(config).map(|_| ()),
        }
    }

    pub fn clear(&mut self, checkpoint_id: u32) -> bool {
        match self.configs.find(|c| c.checkpoint_id == checkpoint_id) {
            Some(slot) => self.configs.remove(slot).is_some(),
            None => false,
        }
    }

    pub fn get(&self, checkpoint_id: u32) -> Option<&AutoSnapshotConfig> {
        let slot = self.configs.find(|c| c.checkpoint_id == checkpoint_id)?;
        self.configs.get(slot)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Records a hit and returns the ring slot name to write plus whether
    /// disks should be included. `None` when the checkpoint has no config.
    pub fn on_hit(&mut self, checkpoint_id: u32) -> Option<(String, bool)> {
        let slot = self.configs.find(|c| c.checkpoint_id == checkpoint_id)?;
        let config = self.configs.get_mut(slot)?;
        let index = config.hit_count % config.max_snapshots.max(1);
        config.hit_count = config.hit_count.wrapping_add(1);
        Some((config.snapshot_name(index), config.include_disks))
    }
}

/// Writes the next ring snapshot for `checkpoint_id`, if configured.
///
/// Failures are logged and otherwise ignored; a failed auto-snapshot never
/// interrupts execution.
pub(crate) fn take_on_hit(ctx: &mut McpContext, checkpoint_id: u32) {
    let Some((name, include_disks)) = ctx.auto_snapshots.on_hit(checkpoint_id) else {
        return;
    };
    let description = format!("Auto snapshot at checkpoint {checkpoint_id}");
    let options = SaveOptions {
        description: Some(&description),
        include_roms: false,
        include_disks,
    };
    match ctx.snapshots.replace(ctx.machine.as_mut(), &name, options) {
        Ok(path) => {
            tracing::info!(target: "vice.mcp.snapshot", checkpoint_id, path = %path.display(), "auto-snapshot saved");
        }
        Err(err) => {
            tracing::warn!(target: "vice.mcp.snapshot", checkpoint_id, name = %name, error = %err, "auto-snapshot failed");
        }
    }
}

fn checkpoint_id(raw: i64) -> Result<u32, ToolError> {
    u32::try_from(raw)
        .ok()
        .filter(|&id| id > 0)
        .ok_or_else(|| ToolError::invalid_params("Invalid checkpoint_id: must be a positive integer"))
}

fn validate_prefix(prefix: &str) -> Result<(), ToolError> {
    if prefix.is_empty() {
        return Err(ToolError::invalid_params("Invalid snapshot_prefix: cannot be empty"));
    }
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ToolError::invalid_params(
            "Invalid snapshot_prefix: use only alphanumeric characters, underscores, and hyphens",
        ));
    }
    if prefix.len() >= MAX_PREFIX_LEN {
        return Err(ToolError::invalid_params(
            "Invalid snapshot_prefix: too long (max 63 characters)",
        ));
    }
    Ok(())
}

pub fn set_auto_snapshot(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::SetAutoSnapshot = parse_params(params)?;
    let id = checkpoint_id(p.checkpoint_id)?;
    validate_prefix(&p.snapshot_prefix)?;
    if ctx.machine.checkpoint(id).is_none() {
        return Err(ToolError::invalid_params("Checkpoint not found"));
    }
    let max_snapshots = p
        .max_snapshots
        .map(|n| n.clamp(1, i64::from(MAX_SNAPSHOTS_LIMIT)) as u32)
        .unwrap_or(DEFAULT_MAX_SNAPSHOTS);
    let include_disks = p.include_disks.unwrap_or(false);

    ctx.auto_snapshots
        .set(AutoSnapshotConfig {
            checkpoint_id: id,
            prefix: p.snapshot_prefix.clone(),
            max_snapshots,
            include_disks,
            hit_count: 0,
        })
        .map_err(|_| ToolError::internal("Maximum auto-snapshot configurations reached"))?;

    tracing::debug!(
        target: "vice.mcp.snapshot",
        checkpoint_id = id,
        prefix = %p.snapshot_prefix,
        max_snapshots,
        "auto-snapshot configured"
    );
    Ok(json!({
        "enabled": true,
        "checkpoint_id": id,
        "snapshot_prefix": p.snapshot_prefix,
        "max_snapshots": max_snapshots,
        "include_disks": include_disks,
    }))
}

pub fn clear_auto_snapshot(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::ClearAutoSnapshot = parse_params(params)?;
    let id = checkpoint_id(p.checkpoint_id)?;
    let cleared = ctx.auto_snapshots.clear(id);
    Ok(json!({ "cleared": cleared, "checkpoint_id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::checkpoint_add;
    use crate::error::ErrorCode;
    use crate::machine::headless::HeadlessMachine;

    fn config(checkpoint_id: u32, max_snapshots: u32) -> AutoSnapshotConfig {
        AutoSnapshotConfig {
            checkpoint_id,
            prefix: "boot".to_owned(),
            max_snapshots,
            include_disks: false,
            hit_count: 0,
        }
    }

    #[test]
    fn hits_cycle_through_the_ring() {
        let mut store = AutoSnapshotStore::new();
        store.set(config(1, 3)).expect("set");
        let names: Vec<String> = (0..5).filter_map(|_| store.on_hit(1)).map(|(name, _)| name).collect();
        assert_eq!(names, ["boot_000", "boot_001", "boot_002", "boot_000", "boot_001"]);
        assert_eq!(store.on_hit(2), None);
    }

    #[test]
    fn reconfiguring_resets_the_hit_counter() {
        let mut store = AutoSnapshotStore::new();
        store.set(config(1, 10)).expect("set");
        store.on_hit(1);
        store.on_hit(1);
        store.set(config(1, 10)).expect("replace");
        assert_eq!(store.len(), 1);
        assert_eq!(store.on_hit(1).map(|(name, _)| name).as_deref(), Some("boot_000"));
    }

    #[test]
    fn store_is_bounded() {
        let mut store = AutoSnapshotStore::new();
        for id in 1..=MAX_AUTO_SNAPSHOT_CONFIGS as u32 {
            store.set(config(id, 1)).expect("set");
        }
        assert!(store.set(config(1000, 1)).is_err());
        assert!(store.set(config(5, 2)).is_ok());
    }

    #[test]
    fn prefix_validation_messages() {
        assert_eq!(
            validate_prefix("").unwrap_err().message,
            "Invalid snapshot_prefix: cannot be empty"
        );
        assert!(validate_prefix("a/b").is_err());
        assert!(validate_prefix(&"p".repeat(64)).is_err());
        assert!(validate_prefix(&"p".repeat(63)).is_ok());
        assert!(validate_prefix("level-2_boss").is_ok());
    }

    #[test]
    fn handler_requires_an_existing_checkpoint_and_clamps_the_ring() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());

        let err = set_auto_snapshot(&mut ctx, json!({ "checkpoint_id": 0, "snapshot_prefix": "x" })).unwrap_err();
        assert_eq!(err.message, "Invalid checkpoint_id: must be a positive integer");

        let err = set_auto_snapshot(&mut ctx, json!({ "checkpoint_id": 7, "snapshot_prefix": "x" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);

        checkpoint_add(&mut ctx, json!({ "start": 0x1000 })).expect("add");
        let ok = set_auto_snapshot(
            &mut ctx,
            json!({ "checkpoint_id": 1, "snapshot_prefix": "x", "max_snapshots": 5000 }),
        )
        .expect("set");
        assert_eq!(ok["max_snapshots"], 999);
        assert_eq!(ok["include_disks"], false);

        let cleared = clear_auto_snapshot(&mut ctx, json!({ "checkpoint_id": 1 })).expect("clear");
        assert_eq!(cleared["cleared"], true);
        let cleared = clear_auto_snapshot(&mut ctx, json!({ "checkpoint_id": 1 })).expect("clear");
        assert_eq!(cleared["cleared"], false);
    }

    #[test]
    fn hits_write_ring_files_into_the_snapshot_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        checkpoint_add(&mut ctx, json!({ "start": 0x1000 })).expect("add");
        set_auto_snapshot(&mut ctx, json!({ "checkpoint_id": 1, "snapshot_prefix": "hit", "max_snapshots": 2 }))
            .expect("set");

        for _ in 0..3 {
            take_on_hit(&mut ctx, 1);
        }
        let mut names: Vec<String> = ctx
            .snapshots
            .list()
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        names.sort();
        assert_eq!(names, ["hit_000", "hit_001"]);
    }
}
