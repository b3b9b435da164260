//! Label files and the symbol tools.
//!
//! Three formats are understood:
//!
//! * `vice`: monitor label files, `al C:1000 .start`.
//! * `kickasm`: KickAssembler symbol files, `.label start=$1000` and
//!   `.const`, with `.namespace name {` blocks prefixing nested names.
//! * `simple`: `start = $1000` assignments.
//!
//! The `vice` and `simple` parsers accept each other's line forms.

use std::fs;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::context::McpContext;
use crate::error::{ToolError, ToolResult};
use crate::machine::SymbolTable;
use crate::params::{self, parse_params};

pub const MAX_NAMESPACE_DEPTH: usize = 8;
const MAX_LABEL_LEN: usize = 127;
const MAX_NAMESPACE_LEN: usize = 63;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelFormat {
    Vice,
    KickAsm,
    Simple,
}

impl LabelFormat {
    pub fn name(self) -> &'static str {
        match self {
            LabelFormat::Vice => "vice",
            LabelFormat::KickAsm => "kickasm",
            LabelFormat::Simple => "simple",
        }
    }

    /// Guesses the format from the first line that is not blank or a comment.
    pub fn detect(text: &str) -> Self {
        let Some(first) = text.lines().map(str::trim_start).find(|line| !is_skippable(line)) else {
            return LabelFormat::Simple;
        };
        if [".label ", ".namespace ", ".const ", ".var "]
            .iter()
            .any(|marker| first.starts_with(marker))
        {
            LabelFormat::KickAsm
        } else if first.starts_with("al ") {
            LabelFormat::Vice
        } else {
            LabelFormat::Simple
        }
    }
}

impl FromStr for LabelFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vice" => Ok(LabelFormat::Vice),
            "kickasm" => Ok(LabelFormat::KickAsm),
            "simple" => Ok(LabelFormat::Simple),
            _ => Err(()),
        }
    }
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with("//")
}

/// Reads the leading hex digits of `text` the way `%x` does: an optional
/// `0x` prefix, then as many hex digits as follow. Wider values wrap.
fn leading_hex(text: &str) -> Option<u16> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].chars().try_fold(0u16, |acc, c| {
        Some(acc.wrapping_mul(16).wrapping_add(c.to_digit(16)? as u16))
    })
}

/// `al C:1000 .start` (any single-character memspace).
fn parse_vice_line(line: &str) -> Option<(String, u16)> {
    let rest = line.strip_prefix("al ")?;
    let mut tokens = rest.split_whitespace();
    let location = tokens.next()?;
    let (space, addr) = location.split_once(':')?;
    if space.chars().count() != 1 {
        return None;
    }
    let addr = leading_hex(addr)?;
    let label = tokens.next()?.strip_prefix('.')?;
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return None;
    }
    Some((label.to_owned(), addr))
}

/// `start = $1000` or `start = 1000`.
fn parse_simple_line(line: &str) -> Option<(String, u16)> {
    let mut tokens = line.split_whitespace();
    let label = tokens.next()?;
    if tokens.next()? != "=" || label.len() > MAX_LABEL_LEN {
        return None;
    }
    let value = tokens.next()?;
    let addr = leading_hex(value.strip_prefix('$').unwrap_or(value))?;
    Some((label.to_owned(), addr))
}

/// Line-oriented KickAssembler parser; namespace and brace state spans lines.
#[derive(Debug, Default)]
struct KickAsmParser {
    namespaces: Vec<String>,
    /// Open `{` blocks that belong to labels rather than namespaces.
    label_braces: usize,
}

impl KickAsmParser {
    fn line(&mut self, line: &str) -> Option<(String, u16)> {
        if let Some(rest) = line.strip_prefix(".namespace ") {
            let name: String = rest
                .trim_start()
                .chars()
                .take_while(|c| !matches!(c, '{' | ' ' | '\t'))
                .take(MAX_NAMESPACE_LEN)
                .collect();
            if !name.is_empty() && self.namespaces.len() < MAX_NAMESPACE_DEPTH {
                self.namespaces.push(name);
            }
            return None;
        }
        if line.starts_with('}') {
            if self.label_braces > 0 {
                self.label_braces -= 1;
            } else {
                self.namespaces.pop();
            }
            return None;
        }

        let rest = line
            .strip_prefix(".label ")
            .or_else(|| line.strip_prefix(".const "))?;
        let (name, value) = rest.split_once('=')?;
        if name.is_empty() || name.len() >= MAX_LABEL_LEN {
            return None;
        }
        let name = name.trim();
        let value = value.trim_start();
        let addr = leading_hex(value.strip_prefix('$').unwrap_or(value))?;
        if value.contains('{') {
            self.label_braces += 1;
        }

        let mut full = String::new();
        for namespace in &self.namespaces {
            full.push_str(namespace);
            full.push('.');
        }
        full.push_str(name);
        Some((full, addr))
    }
}

/// Parses a label file into `(name, address)` pairs in file order.
pub fn parse_labels(text: &str, format: LabelFormat) -> Vec<(String, u16)> {
    let mut kickasm = KickAsmParser::default();
    text.lines()
        .map(str::trim_start)
        .filter(|line| !is_skippable(line))
        .filter_map(|line| match format {
            LabelFormat::KickAsm => kickasm.line(line),
            LabelFormat::Vice | LabelFormat::Simple => {
                parse_vice_line(line).or_else(|| parse_simple_line(line))
            }
        })
        .collect()
}

pub fn symbols_load(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::SymbolsLoad = parse_params(params)?;
    let requested = match p.format.as_deref() {
        None | Some("auto") => None,
        Some(name) => Some(name.parse::<LabelFormat>().map_err(|()| {
            ToolError::invalid_params("format must be 'auto', 'vice', 'kickasm', or 'simple'")
        })?),
    };

    let bytes = fs::read(&p.path).map_err(|err| {
        tracing::debug!(target: "vice.mcp", path = %p.path.display(), error = %err, "cannot open symbol file");
        ToolError::invalid_params("Cannot open symbol file")
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let format = requested.unwrap_or_else(|| LabelFormat::detect(&text));

    let labels = parse_labels(&text, format);
    for (name, addr) in &labels {
        ctx.machine.define_symbol(name, *addr);
    }
    tracing::info!(
        target: "vice.mcp",
        path = %p.path.display(),
        format = format.name(),
        count = labels.len(),
        "symbols loaded"
    );
    Ok(json!({
        "status": "ok",
        "path": p.path.display().to_string(),
        "format_detected": format.name(),
        "symbols_loaded": labels.len(),
    }))
}

pub fn symbols_lookup(ctx: &mut McpContext, params: Value) -> ToolResult {
    let p: params::SymbolsLookup = parse_params(params)?;
    let machine = ctx.machine.as_ref();

    if let Some(name) = &p.name {
        let address = machine
            .address_of(name)
            .ok_or_else(|| ToolError::invalid_params("Symbol not found"))?;
        return Ok(json!({ "status": "ok", "name": name, "address": address }));
    }
    if let Some(address) = &p.address {
        let address = address
            .resolve(machine)
            .map_err(crate::checkpoint::cannot_resolve("address"))?;
        let name = machine
            .name_at(address)
            .ok_or_else(|| ToolError::invalid_params("No symbol at address"))?;
        return Ok(json!({ "status": "ok", "address": address, "name": name }));
    }
    Err(ToolError::invalid_params("Either 'name' or 'address' required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::headless::HeadlessMachine;

    #[test]
    fn detects_format_from_first_meaningful_line() {
        assert_eq!(LabelFormat::detect("; comment\n\nal C:1000 .start\n"), LabelFormat::Vice);
        assert_eq!(LabelFormat::detect("// kick\n.label start=$1000\n"), LabelFormat::KickAsm);
        assert_eq!(LabelFormat::detect("  .namespace game {\n"), LabelFormat::KickAsm);
        assert_eq!(LabelFormat::detect("start = $1000\n"), LabelFormat::Simple);
        assert_eq!(LabelFormat::detect("# nothing\n"), LabelFormat::Simple);
    }

    #[test]
    fn vice_files_accept_simple_assignments_too() {
        let text = "al C:0801 .basic\nal C:c000 .irq_handler\nborder = $d020\ngarbage line\n";
        let labels = parse_labels(text, LabelFormat::Vice);
        assert_eq!(
            labels,
            vec![
                ("basic".to_owned(), 0x0801),
                ("irq_handler".to_owned(), 0xC000),
                ("border".to_owned(), 0xD020),
            ]
        );
    }

    #[test]
    fn kickasm_namespaces_prefix_labels() {
        let text = "\
.label start=$0810
.namespace game {
    .label loop=$1000 {
        .label inner=$1004
    }
    .const SPEED = 3
}
.label after=$2000
";
        let labels = parse_labels(text, LabelFormat::KickAsm);
        assert_eq!(
            labels,
            vec![
                ("start".to_owned(), 0x0810),
                ("game.loop".to_owned(), 0x1000),
                ("game.inner".to_owned(), 0x1004),
                ("game.SPEED".to_owned(), 0x0003),
                ("after".to_owned(), 0x2000),
            ]
        );
    }

    #[test]
    fn namespace_depth_is_bounded() {
        let mut text = String::new();
        for i in 0..10 {
            text.push_str(&format!(".namespace n{i} {{\n"));
        }
        text.push_str(".label deep=$1234\n");
        let labels = parse_labels(&text, LabelFormat::KickAsm);
        assert_eq!(labels[0].0, "n0.n1.n2.n3.n4.n5.n6.n7.deep");
    }

    #[test]
    fn load_and_lookup_through_the_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("labels.txt");
        fs::write(&path, "al C:1000 .main\nal C:1010 .loop\n").expect("write labels");

        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        let out = symbols_load(&mut ctx, json!({ "path": path })).expect("load");
        assert_eq!(out["symbols_loaded"], 2);
        assert_eq!(out["format_detected"], "vice");

        let found = symbols_lookup(&mut ctx, json!({ "name": "loop" })).expect("by name");
        assert_eq!(found["address"], 0x1010);
        let found = symbols_lookup(&mut ctx, json!({ "address": "$1000" })).expect("by address");
        assert_eq!(found["name"], "main");

        let err = symbols_lookup(&mut ctx, json!({ "name": "nope" })).unwrap_err();
        assert_eq!(err.message, "Symbol not found");
        let err = symbols_lookup(&mut ctx, json!({})).unwrap_err();
        assert_eq!(err.message, "Either 'name' or 'address' required");
    }

    #[test]
    fn missing_files_and_unknown_formats_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ctx = McpContext::new(Box::new(HeadlessMachine::new()), dir.path());
        let err = symbols_load(&mut ctx, json!({ "path": dir.path().join("none.sym") })).unwrap_err();
        assert_eq!(err.message, "Cannot open symbol file");
        let err = symbols_load(&mut ctx, json!({ "path": "x", "format": "ca65" })).unwrap_err();
        assert_eq!(err.message, "format must be 'auto', 'vice', 'kickasm', or 'simple'");
    }
}
