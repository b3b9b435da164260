//! Named snapshots under the snapshot directory.
//!
//! Each snapshot is a `{name}.vsf` container written by the machine plus an
//! optional `{name}.json` metadata sidecar.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::context::McpContext;
use crate::error::{ErrorCode, ToolError, ToolResult};
use crate::machine::{Machine, SnapshotIo};
use crate::params::{self, parse_params, NoParams};

pub mod vsf;

use vsf::VsfError;

/// Sidecars larger than this are ignored.
pub const SIDECAR_MAX_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("'name' must not be empty")]
    EmptyName,
    #[error("Invalid name: use only alphanumeric characters, underscores, and hyphens")]
    InvalidName,
    #[error("Snapshot with this name already exists. Use a different name or delete the existing one first.")]
    AlreadyExists,
    #[error("Snapshot not found. Use vice.snapshot.list to see available snapshots.")]
    NotFound,
    #[error("Could not create snapshots directory")]
    Directory(#[source] io::Error),
    #[error("Failed to save snapshot")]
    Write(#[source] io::Error),
    #[error("Failed to load snapshot")]
    Read(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

impl From<SnapshotError> for ToolError {
    fn from(err: SnapshotError) -> Self {
        let code = match &err {
            SnapshotError::EmptyName
            | SnapshotError::InvalidName
            | SnapshotError::AlreadyExists
            | SnapshotError::NotFound => ErrorCode::InvalidParams,
            SnapshotError::Directory(_) => ErrorCode::InternalError,
            SnapshotError::Write(_) | SnapshotError::Read(_) => ErrorCode::SnapshotFailed,
        };
        ToolError::new(code, err.to_string())
    }
}

impl From<VsfError> for ToolError {
    fn from(err: VsfError) -> Self {
        let message = match err {
            VsfError::CannotOpen(_) => "Cannot open snapshot file - does it exist?",
            VsfError::BadMagic => "Invalid snapshot file format",
            VsfError::MachineMismatch => "Snapshot is not for C64 machine",
            VsfError::ModuleNotFound(_) => "C64MEM module not found in snapshot",
            VsfError::ModuleTooSmall => "Snapshot C64MEM module is corrupted",
            VsfError::ReadError => "Failed to read snapshot file",
        };
        ToolError::new(ErrorCode::SnapshotFailed, message)
    }
}

/// True for non-empty names made of ASCII letters, digits, `_` and `-`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SnapshotError::EmptyName);
    }
    if !is_valid_name(name) {
        return Err(SnapshotError::InvalidName);
    }
    Ok(())
}

/// Contents of a `{name}.json` sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vice_version: Option<String>,
    #[serde(default)]
    pub includes_roms: bool,
    #[serde(default)]
    pub includes_disks: bool,
}

impl SnapshotMetadata {
    /// Adds `description`, `created` and `machine` to a tool result object.
    fn merge_into(&self, target: &mut Value) {
        let Value::Object(map) = target else {
            return;
        };
        for (key, value) in [
            ("description", &self.description),
            ("created", &self.created),
            ("machine", &self.machine),
        ] {
            if let Some(value) = value {
                map.insert(key.to_owned(), Value::String(value.clone()));
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SaveOptions<'a> {
    pub description: Option<&'a str>,
    pub include_roms: bool,
    pub include_disks: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub path: PathBuf,
    pub metadata: Option<SnapshotMetadata>,
}

fn created_now() -> Option<String> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    OffsetDateTime::now_utc().format(format).ok()
}

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vsf_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.vsf"))
    }

    fn sidecar_path(vsf_path: &Path) -> PathBuf {
        vsf_path.with_extension("json")
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(SnapshotError::Directory)
    }

    /// Saves a new snapshot. Existing snapshots are never overwritten.
    pub fn save(&self, machine: &mut dyn Machine, name: &str, options: SaveOptions<'_>) -> Result<PathBuf> {
        validate_name(name)?;
        self.ensure_dir()?;
        let path = self.vsf_path(name);
        if path.exists() {
            return Err(SnapshotError::AlreadyExists);
        }
        self.write(machine, &path, name, options)?;
        Ok(path)
    }

    /// Saves a snapshot, first deleting any snapshot of the same name.
    pub fn replace(&self, machine: &mut dyn Machine, name: &str, options: SaveOptions<'_>) -> Result<PathBuf> {
        validate_name(name)?;
        self.ensure_dir()?;
        let path = self.vsf_path(name);
        for stale in [path.clone(), Self::sidecar_path(&path)] {
            match fs::remove_file(&stale) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(SnapshotError::Write(err)),
            }
        }
        self.write(machine, &path, name, options)?;
        Ok(path)
    }

    fn write(&self, machine: &mut dyn Machine, path: &Path, name: &str, options: SaveOptions<'_>) -> Result<()> {
        if let Err(err) = machine.write_snapshot(path, options.include_roms, options.include_disks) {
            let _ = fs::remove_file(path);
            return Err(SnapshotError::Write(err));
        }

        let metadata = SnapshotMetadata {
            name: name.to_owned(),
            description: options.description.map(str::to_owned),
            created: created_now(),
            machine: Some(machine.machine_name().to_owned()),
            vice_version: Some(machine.emulator_version().to_owned()),
            includes_roms: options.include_roms,
            includes_disks: options.include_disks,
        };
        let sidecar = Self::sidecar_path(path);
        let written = serde_json::to_vec_pretty(&metadata)
            .map_err(io::Error::from)
            .and_then(|bytes| fs::write(&sidecar, bytes));
        if let Err(err) = written {
            // The container is usable without its sidecar.
            tracing::warn!(
                target: "vice.mcp.snapshot",
                path = %sidecar.display(),
                error = %err,
                "failed to write snapshot metadata"
            );
        }
        Ok(())
    }

    /// Restores a snapshot into `machine`.
    pub fn load(&self, machine: &mut dyn Machine, name: &str) -> Result<(PathBuf, Option<SnapshotMetadata>)> {
        validate_name(name)?;
        let path = self.vsf_path(name);
        if !path.is_file() {
            return Err(SnapshotError::NotFound);
        }
        machine.read_snapshot(&path).map_err(SnapshotError::Read)?;
        let metadata = Self::read_metadata(&path);
        Ok((path, metadata))
    }

    /// Every `*.vsf` in the directory, sorted by name.
    pub fn list(&self) -> Result<Vec<SnapshotEntry>> {
        self.ensure_dir()?;
        let entries = fs::read_dir(&self.dir).map_err(SnapshotError::Directory)?;

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("vsf") || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            snapshots.push(SnapshotEntry {
                name: name.to_owned(),
                metadata: Self::read_metadata(&path),
                path,
            });
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }

    /// The 64 KiB RAM image stored in snapshot `name`.
    pub fn extract_ram(&self, name: &str) -> vsf::Result<Vec<u8>> {
        vsf::extract_ram_from_path(&self.vsf_path(name))
    }

    /// Reads the sidecar next to `vsf_path`. Missing, oversized or malformed
    /// sidecars read as `None`.
    pub fn read_metadata(vsf_path: &Path) -> Option<SnapshotMetadata> {
        let file = fs::File::open(Self::sidecar_path(vsf_path)).ok()?;
        if file.metadata().ok()?.len() > SIDECAR_MAX_BYTES {
            return None;
        }
        let mut text = String::new();
        file.take(SIDECAR_MAX_BYTES + 1).read_to_string(&mut text).ok()?;
        serde_json::from_str(&text).ok()
    }
}

pub fn snapshot_save(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::SnapshotSave = parse_params(params)?;
    ctx.require_stopped()?;
    let options = SaveOptions {
        description: p.description.as_deref(),
        include_roms: p.include_roms.unwrap_or(false),
        include_disks: p.include_disks.unwrap_or(false),
    };

    let path = ctx.snapshots.save(ctx.machine.as_mut(), &p.name, options)?;
    tracing::info!(target: "vice.mcp.snapshot", name = %p.name, path = %path.display(), "snapshot saved");

    let mut result = json!({
        "status": "ok",
        "name": p.name,
        "path": path.display().to_string(),
        "include_roms": options.include_roms,
        "include_disks": options.include_disks,
    });
    if let Some(description) = &p.description {
        result["description"] = json!(description);
    }
    Ok(result)
}

pub fn snapshot_load(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::SnapshotLoad = parse_params(params)?;
    ctx.require_stopped()?;

    let (path, metadata) = ctx.snapshots.load(ctx.machine.as_mut(), &p.name)?;
    tracing::info!(target: "vice.mcp.snapshot", name = %p.name, path = %path.display(), "snapshot loaded");

    let mut result = json!({
        "status": "ok",
        "name": p.name,
        "path": path.display().to_string(),
        "message": "Snapshot loaded successfully",
    });
    if let Some(metadata) = metadata {
        metadata.merge_into(&mut result);
    }
    Ok(result)
}

pub fn snapshot_list(ctx: &mut McpContext, params: Value) -> ToolResult {
    let _: NoParams = parse_params(params)?;
    let entries = ctx
        .snapshots
        .list()
        .map_err(|_| ToolError::internal("Could not access snapshots directory"))?;

    let snapshots: Vec<Value> = entries
        .into_iter()
        .map(|entry| {
            let mut item = json!({
                "name": entry.name,
                "path": entry.path.display().to_string(),
            });
            if let Some(metadata) = &entry.metadata {
                metadata.merge_into(&mut item);
            }
            item
        })
        .collect();

    Ok(json!({
        "snapshots": snapshots,
        "directory": ctx.snapshots.dir().display().to_string(),
    }))
}
