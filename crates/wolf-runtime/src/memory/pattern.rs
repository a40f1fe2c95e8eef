//! Byte-pattern ("signature") search over module images.

use log::*;

use super::{ModuleInfo, ProcessMemory};
use crate::error::{Error, Result};

/// How much memory to read per step while scanning.
const SCAN_CHUNK_SIZE: usize = 0x10000;

/// Parses a space-separated hex pattern such as `"48 8B ?? 05"`.
///
/// If `mask` is non-empty it must have one character per byte: `x` means the
/// byte must match and `?` means it's a wildcard. `??` tokens in the pattern
/// are wildcards regardless of the mask.
pub fn parse_pattern(pattern: &str, mask: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16)
            .map_err(|e| Error::Pattern(format!("invalid token '{token}': {e}")))?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::Pattern("pattern is empty".to_string()));
    }

    if !mask.is_empty() {
        if mask.len() != bytes.len() {
            return Err(Error::Pattern(format!(
                "mask has {} characters but pattern has {} bytes",
                mask.len(),
                bytes.len()
            )));
        }
        for (byte, m) in bytes.iter_mut().zip(mask.chars()) {
            match m {
                'x' | 'X' => {}
                '?' => *byte = None,
                other => return Err(Error::Pattern(format!("invalid mask character '{other}'"))),
            }
        }
    }

    Ok(bytes)
}

/// Formats a parsed pattern back into its textual form.
pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{value:02X}"),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the offset of every match of `pattern` within `buffer`.
pub fn find_in_slice(buffer: &[u8], pattern: &[Option<u8>]) -> Vec<usize> {
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return Vec::new();
    }
    buffer
        .windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| {
            window
                .iter()
                .zip(pattern)
                .all(|(b, p)| p.is_none_or(|p| p == *b))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Scans `[start, start + len)` for `pattern` and returns the absolute address
/// of every match.
///
/// Memory is read in chunks with enough overlap that a match straddling two
/// chunks is still found. Chunks that can't be read are skipped.
pub fn scan_range(
    memory: &dyn ProcessMemory,
    start: usize,
    len: usize,
    pattern: &[Option<u8>],
) -> Vec<usize> {
    let mut results = Vec::new();
    let mut tail: Vec<u8> = Vec::new();
    let mut offset = 0;

    while offset < len {
        let read_size = (len - offset).min(SCAN_CHUNK_SIZE);
        let addr = start + offset;

        let chunk = match memory.read_bytes(addr, read_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Pattern scan skipped {read_size:#x} bytes at {addr:#x}: {e}");
                tail.clear();
                offset += read_size;
                continue;
            }
        };

        let mut data = Vec::with_capacity(tail.len() + chunk.len());
        data.extend_from_slice(&tail);
        data.extend_from_slice(&chunk);

        let data_base = addr - tail.len();
        results.extend(find_in_slice(&data, pattern).into_iter().map(|i| data_base + i));

        let keep = pattern.len().saturating_sub(1);
        tail = if data.len() >= keep {
            data[data.len() - keep..].to_vec()
        } else {
            data
        };

        offset += read_size;
    }

    results.sort_unstable();
    results.dedup();
    results
}

/// Searches for `pattern` in the module named `module`, or in every loaded
/// module if `module` is `None`.
pub fn find_pattern(
    memory: &dyn ProcessMemory,
    pattern: &str,
    mask: &str,
    module: Option<&str>,
) -> Result<Vec<usize>> {
    let bytes = parse_pattern(pattern, mask)?;
    let modules: Vec<ModuleInfo> = match module {
        Some(name) => vec![
            memory
                .module(name)
                .ok_or_else(|| Error::ModuleNotFound(name.to_string()))?,
        ],
        None => memory.modules(),
    };

    let mut results = Vec::new();
    for module in &modules {
        let found = scan_range(memory, module.base, module.size, &bytes);
        debug!(
            "Pattern {} matched {} time(s) in {}",
            format_pattern(&bytes),
            found.len(),
            module.name
        );
        results.extend(found);
    }
    Ok(results)
}

/// Returns the first match of `pattern`, if any.
pub fn find_first_pattern(
    memory: &dyn ProcessMemory,
    pattern: &str,
    mask: &str,
    module: Option<&str>,
) -> Result<Option<usize>> {
    Ok(find_pattern(memory, pattern, mask, module)?.into_iter().next())
}
