//! Reader and writer for the VICE snapshot container (VSF).
//!
//! Layout:
//!
//! ```text
//! "VICE Snapshot File\x1a"  19 bytes
//! version                    2 bytes (major, minor)
//! machine name              16 bytes, NUL padded
//! ["VICE Version\x1a"       13 bytes
//!  emulator version          4 bytes
//!  revision                  4 bytes]   optional, absent in old files
//! module*
//! ```
//!
//! Each module starts with a 22-byte header: a 16-byte NUL padded name, a
//! 2-byte version and a little-endian u32 size that counts the header itself.
//! The `C64MEM` module payload starts with four bytes of CPU port and
//! cartridge line state followed by the 64 KiB RAM image.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

pub const MAGIC: &[u8; 19] = b"VICE Snapshot File\x1a";
pub const VERSION_MAGIC: &[u8; 13] = b"VICE Version\x1a";
pub const MACHINE_NAME_LEN: usize = 16;
pub const MODULE_NAME_LEN: usize = 16;
pub const MODULE_HEADER_LEN: usize = 22;

/// Offset of the first module in files written without version info.
pub const LEGACY_MODULES_OFFSET: u64 = (MAGIC.len() + 2 + MACHINE_NAME_LEN) as u64;

/// Bytes skipped after the version magic: emulator version and revision.
const VERSION_INFO_LEN: i64 = 8;

/// Machine names accepted by [`extract_ram`] start with this prefix (`C64`, `C64SC`, ...).
pub const MACHINE_PREFIX: &[u8] = b"C64";

pub const MEMORY_MODULE: &str = "C64MEM";
pub const CPU_MODULE: &str = "MAINCPU";

/// CPU port data/direction plus EXROM/GAME lines preceding the RAM image.
pub const RAM_PREFIX_LEN: usize = 4;
pub const RAM_SIZE: usize = 0x10000;

pub const CONTAINER_VERSION: (u8, u8) = (2, 0);

/// Failure modes of [`extract_ram`]. Each maps to a stable numeric code.
#[derive(Debug, Error)]
pub enum VsfError {
    #[error("cannot open snapshot file: {0}")]
    CannotOpen(#[source] io::Error),
    #[error("invalid snapshot file format")]
    BadMagic,
    #[error("snapshot is not for a C64 machine")]
    MachineMismatch,
    #[error("{0} module not found in snapshot")]
    ModuleNotFound(String),
    #[error("snapshot module is truncated or corrupted")]
    ModuleTooSmall,
    #[error("failed to read snapshot file")]
    ReadError,
}

impl VsfError {
    pub fn code(&self) -> i32 {
        match self {
            VsfError::CannotOpen(_) => -1,
            VsfError::BadMagic => -2,
            VsfError::MachineMismatch => -3,
            VsfError::ModuleNotFound(_) => -4,
            VsfError::ModuleTooSmall => -5,
            VsfError::ReadError => -6,
        }
    }
}

pub type Result<T> = std::result::Result<T, VsfError>;

/// `fread`-style read: fills as much of `buf` as the input allows.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return Err(VsfError::ReadError),
        }
    }
    Ok(filled)
}

fn seek<R: Seek>(reader: &mut R, pos: SeekFrom) -> Result<u64> {
    reader.seek(pos).map_err(|_| VsfError::ReadError)
}

fn padded_name(bytes: &[u8]) -> &[u8] {
    bytes.split(|&b| b == 0).next().unwrap_or_default()
}

/// Validates the file header and leaves `reader` at the first module.
/// Returns the machine name.
fn read_header<R: Read + Seek>(reader: &mut R) -> Result<String> {
    let mut magic = [0u8; MAGIC.len()];
    if read_up_to(reader, &mut magic)? < magic.len() || &magic != MAGIC {
        return Err(VsfError::BadMagic);
    }

    seek(reader, SeekFrom::Current(2))?;

    let mut machine = [0u8; MACHINE_NAME_LEN];
    if read_up_to(reader, &mut machine)? < machine.len() {
        return Err(VsfError::ReadError);
    }
    if !machine.starts_with(MACHINE_PREFIX) {
        return Err(VsfError::MachineMismatch);
    }

    let mut version_magic = [0u8; VERSION_MAGIC.len()];
    let n = read_up_to(reader, &mut version_magic)?;
    if n == version_magic.len() && &version_magic == VERSION_MAGIC {
        seek(reader, SeekFrom::Current(VERSION_INFO_LEN))?;
    } else {
        seek(reader, SeekFrom::Start(LEGACY_MODULES_OFFSET))?;
    }

    Ok(String::from_utf8_lossy(padded_name(&machine)).into_owned())
}

/// Scans modules for `wanted`, leaving `reader` at its payload. Returns the
/// declared module size (header included).
fn seek_module<R: Read + Seek>(reader: &mut R, wanted: &str) -> Result<u32> {
    loop {
        let offset = seek(reader, SeekFrom::Current(0))?;

        let mut header = [0u8; MODULE_HEADER_LEN];
        if read_up_to(reader, &mut header)? < header.len() {
            return Err(VsfError::ModuleNotFound(wanted.to_owned()));
        }

        let size = u32::from_le_bytes([header[18], header[19], header[20], header[21]]);
        // A size smaller than the header would never advance the scan.
        if (size as usize) < MODULE_HEADER_LEN {
            return Err(VsfError::ModuleTooSmall);
        }

        if padded_name(&header[..MODULE_NAME_LEN]) == wanted.as_bytes() {
            return Ok(size);
        }

        seek(reader, SeekFrom::Start(offset + u64::from(size)))?;
    }
}

/// Extracts the 64 KiB RAM image without loading the rest of the snapshot.
pub fn extract_ram<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    read_header(reader)?;
    let size = seek_module(reader, MEMORY_MODULE)?;
    if (size as usize) < MODULE_HEADER_LEN + RAM_PREFIX_LEN + RAM_SIZE {
        return Err(VsfError::ModuleTooSmall);
    }

    seek(reader, SeekFrom::Current(RAM_PREFIX_LEN as i64))?;
    let mut ram = vec![0u8; RAM_SIZE];
    if read_up_to(reader, &mut ram)? < RAM_SIZE {
        return Err(VsfError::ReadError);
    }
    Ok(ram)
}

pub fn extract_ram_from_path(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(VsfError::CannotOpen)?;
    extract_ram(&mut BufReader::new(file))
}

/// Reads the payload of module `name`.
pub fn read_module<R: Read + Seek>(reader: &mut R, name: &str) -> Result<Vec<u8>> {
    read_header(reader)?;
    let size = seek_module(reader, name)?;
    let mut payload = vec![0u8; size as usize - MODULE_HEADER_LEN];
    if read_up_to(reader, &mut payload)? < payload.len() {
        return Err(VsfError::ReadError);
    }
    Ok(payload)
}

/// Streaming writer for a snapshot container.
pub struct VsfWriter<W> {
    writer: W,
}

impl<W: Write> VsfWriter<W> {
    /// Writes the file header, including the version info block.
    pub fn new(mut writer: W, machine: &str, emulator_version: [u8; 4]) -> io::Result<Self> {
        writer.write_all(MAGIC)?;
        writer.write_all(&[CONTAINER_VERSION.0, CONTAINER_VERSION.1])?;
        writer.write_all(&padded::<MACHINE_NAME_LEN>(machine))?;
        writer.write_all(VERSION_MAGIC)?;
        writer.write_all(&emulator_version)?;
        writer.write_all(&0u32.to_le_bytes())?;
        Ok(Self { writer })
    }

    pub fn write_module(&mut self, name: &str, version: (u8, u8), payload: &[u8]) -> io::Result<()> {
        let size = u32::try_from(MODULE_HEADER_LEN + payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "snapshot module too large"))?;
        self.writer.write_all(&padded::<MODULE_NAME_LEN>(name))?;
        self.writer.write_all(&[version.0, version.1])?;
        self.writer.write_all(&size.to_le_bytes())?;
        self.writer.write_all(payload)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn padded<const N: usize>(name: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = name.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}
