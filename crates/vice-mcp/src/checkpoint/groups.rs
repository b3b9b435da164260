//! Named checkpoint groups.
//!
//! A group stores checkpoint ids only. Ids whose checkpoint has since been
//! deleted stay in the group but are skipped when toggling and counting.

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::CheckpointTable;
use crate::params::{self, parse_params, NoParams};
use crate::slots::SlotTable;

pub const MAX_GROUPS: usize = 32;
pub const MAX_GROUP_MEMBERS: usize = 64;
pub const MAX_GROUP_NAME_LEN: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointGroup {
    pub name: String,
    pub checkpoint_ids: Vec<u32>,
}

impl CheckpointGroup {
    /// Appends ids until the group is full. Returns how many were added.
    fn extend(&mut self, ids: &[u32]) -> usize {
        let room = MAX_GROUP_MEMBERS.saturating_sub(self.checkpoint_ids.len());
        let added = ids.len().min(room);
        self.checkpoint_ids.extend_from_slice(&ids[..added]);
        added
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("Group name too long")]
    NameTooLong,
    #[error("Group already exists")]
    AlreadyExists,
    #[error("Maximum groups reached")]
    Full,
    #[error("Group not found")]
    NotFound,
}

impl From<GroupError> for ToolError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::Full => ToolError::internal(err.to_string()),
            _ => ToolError::invalid_params(err.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct GroupRegistry {
    groups: SlotTable<CheckpointGroup>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: SlotTable::with_capacity(MAX_GROUPS),
        }
    }

    pub fn create(&mut self, name: &str, ids: &[u32]) -> Result<(), GroupError> {
        if name.len() >= MAX_GROUP_NAME_LEN {
            return Err(GroupError::NameTooLong);
        }
        if self.get(name).is_some() {
            return Err(GroupError::AlreadyExists);
        }
        let mut group = CheckpointGroup {
            name: name.to_owned(),
            checkpoint_ids: Vec::new(),
        };
        group.extend(ids);
        self.groups.insert(group).map_err(|_| GroupError::Full)?;
        Ok(())
    }

    pub fn add(&mut self, name: &str, ids: &[u32]) -> Result<usize, GroupError> {
        let slot = self
            .groups
            .find(|group| group.name == name)
            .ok_or(GroupError::NotFound)?;
        let group = self.groups.get_mut(slot).ok_or(GroupError::NotFound)?;
        Ok(group.extend(ids))
    }

    pub fn get(&self, name: &str) -> Option<&CheckpointGroup> {
        let slot = self.groups.find(|group| group.name == name)?;
        self.groups.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckpointGroup> {
        self.groups.iter().map(|(_, group)| group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub fn group_create(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::GroupCreate = parse_params(params)?;
    let ids = p.checkpoint_ids.unwrap_or_default();
    ctx.groups.create(&p.name, &ids)?;
    tracing::debug!(target: "vice.mcp.checkpoint", group = %p.name, members = ids.len(), "group created");
    Ok(json!({ "created": true, "name": p.name }))
}

pub fn group_add(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::GroupAdd = parse_params(params)?;
    let added = ctx.groups.add(&p.group, &p.checkpoint_ids)?;
    Ok(json!({ "added": added }))
}

pub fn group_toggle(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::GroupToggle = parse_params(params)?;
    let group = ctx.groups.get(&p.group).ok_or(GroupError::NotFound)?;
    let machine = ctx.machine.as_mut();

    let mut affected = 0usize;
    for &id in &group.checkpoint_ids {
        if machine.set_checkpoint_enabled(id, p.enabled) {
            affected += 1;
        }
    }
    tracing::debug!(target: "vice.mcp.checkpoint", group = %p.group, enabled = p.enabled, affected, "group toggled");
    Ok(json!({ "affected_count": affected }))
}

pub fn group_list(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    let machine = ctx.machine.as_ref();
    let groups: Vec<Value> = ctx
        .groups
        .iter()
        .map(|group| {
            let (mut enabled, mut disabled) = (0usize, 0usize);
            for cp in group.checkpoint_ids.iter().filter_map(|&id| machine.checkpoint(id)) {
                if cp.enabled {
                    enabled += 1;
                } else {
                    disabled += 1;
                }
            }
            json!({
                "name": group.name,
                "checkpoint_ids": group.checkpoint_ids,
                "enabled_count": enabled,
                "disabled_count": disabled,
            })
        })
        .collect();
    Ok(json!({ "groups": groups }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::checkpoint_add;
    use crate::error::ErrorCode;
    use crate::machine::headless::HeadlessMachine;

    #[test]
    fn names_are_unique_and_bounded() {
        let mut registry = GroupRegistry::new();
        registry.create("init", &[]).expect("create");
        assert_eq!(registry.create("init", &[]), Err(GroupError::AlreadyExists));
        assert_eq!(registry.create(&"x".repeat(64), &[]), Err(GroupError::NameTooLong));
        registry.create(&"x".repeat(63), &[]).expect("63 chars fits");
    }

    #[test]
    fn registry_refuses_groups_past_capacity() {
        let mut registry = GroupRegistry::new();
        for i in 0..MAX_GROUPS {
            registry.create(&format!("g{i}"), &[]).expect("create");
        }
        let err = registry.create("overflow", &[]).unwrap_err();
        assert_eq!(err, GroupError::Full);
        assert_eq!(ToolError::from(err).code, ErrorCode::InternalError);
    }

    #[test]
    fn members_are_capped() {
        let mut registry = GroupRegistry::new();
        let ids: Vec<u32> = (1..=60).collect();
        registry.create("big", &ids).expect("create");
        assert_eq!(registry.add("big", &[100, 101, 102, 103, 104, 105]), Ok(4));
        assert_eq!(registry.get("big").map(|g| g.checkpoint_ids.len()), Some(MAX_GROUP_MEMBERS));
        assert_eq!(registry.add("missing", &[1]), Err(GroupError::NotFound));
    }

    #[test]
    fn toggle_skips_deleted_checkpoints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        for start in [0x1000, 0x2000, 0x3000] {
            checkpoint_add(&mut ctx, json!({ "start": start })).expect("add");
        }
        group_create(&mut ctx, json!({ "name": "loop", "checkpoint_ids": [1, 2, 3] })).expect("create");
        ctx.machine.remove_checkpoint(2);

        let toggled = group_toggle(&mut ctx, json!({ "group": "loop", "enabled": false })).expect("toggle");
        assert_eq!(toggled["affected_count"], 2);

        let listed = group_list(&mut ctx, Value::Null).expect("list");
        let group = &listed["groups"][0];
        assert_eq!(group["checkpoint_ids"], json!([1, 2, 3]));
        assert_eq!(group["enabled_count"], 0);
        assert_eq!(group["disabled_count"], 2);
    }

    #[test]
    fn unknown_groups_are_invalid_params() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        let err = group_toggle(&mut ctx, json!({ "group": "nope", "enabled": true })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(err.message, "Group not found");
    }
}
