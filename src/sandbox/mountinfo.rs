/*!
 * Mount Table Parsing
 * Reads /proc/self/mountinfo to find mounts left below the sandbox root
 */

use std::path::{Path, PathBuf};

pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

/// Parse a single mountinfo line; `None` for malformed lines
///
/// Layout: `id parent major:minor root mount_point options [optional...] - fstype source super_options`
pub fn parse_line(line: &str) -> Option<MountEntry> {
    let (head, tail) = line.split_once(" - ")?;
    let mut fields = head.split_whitespace();
    let mount_id = fields.next()?.parse().ok()?;
    let parent_id = fields.next()?.parse().ok()?;
    let _dev = fields.next()?;
    let _root = fields.next()?;
    let mount_point = PathBuf::from(unescape(fields.next()?));

    let mut tail = tail.split_whitespace();
    let fs_type = tail.next()?.to_string();
    let source = tail.next().map(unescape).unwrap_or_default();

    Some(MountEntry {
        mount_id,
        parent_id,
        mount_point,
        fs_type,
        source,
    })
}

/// Parse a whole mountinfo table, skipping lines that do not parse
pub fn parse_table(table: &str) -> Vec<MountEntry> {
    table.lines().filter_map(parse_line).collect()
}

/// Mount points at or below `root`, newest first
///
/// The kernel lists mounts in creation order, so reversing the table puts
/// children and stacked mounts before what they cover. A path mounted twice
/// appears twice.
pub fn mounts_under(entries: &[MountEntry], root: &Path) -> Vec<PathBuf> {
    entries
        .iter()
        .rev()
        .filter(|e| e.mount_point.starts_with(root))
        .map(|e| e.mount_point.clone())
        .collect()
}

/// Read the current process' table and select mounts under `root`
pub fn read_mounts_under(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let table = std::fs::read_to_string(MOUNTINFO_PATH)?;
    Ok(mounts_under(&parse_table(&table), root))
}

/// Decode the octal escapes the kernel uses for space, tab, newline and backslash
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
