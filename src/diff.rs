//! Line-level diff computation for multi-line text values
//!
//! Changed text fields (configuration file contents, command output) are
//! reported as a unified-style patch instead of two full copies of the value.
//!
//! ## Overview
//!
//! The algorithm strips the common prefix and suffix of both texts, runs a
//! Myers diff (via `similar`) over the remaining lines, and groups the
//! resulting edit script into hunks with a configurable number of context
//! lines.
//!
//! ## Examples
//!
//! ```rust
//! use sysdelta::diff::{compute_line_diff, render_patch, DiffOptions};
//!
//! let old = "line1\nline2\nline3\n";
//! let new = "line1\nline2 modified\nline3\n";
//!
//! let hunks = compute_line_diff(old, new, &DiffOptions::default());
//! let patch = render_patch(&hunks);
//! assert!(patch.contains("-line2\n+line2 modified"));
//!
//! // Identical texts produce no hunks at all
//! assert!(compute_line_diff(old, old, &DiffOptions::default()).is_empty());
//! ```
//!
//! ## Performance
//!
//! Myers runs in linear space and `O((m + n) * d)` time, where `d` is the
//! number of differing lines. [`DiffOptions::timeout`] bounds the time spent
//! on large, mostly different texts; past the deadline the remaining region
//! is reported as a plain delete/insert block, which is still a valid patch
//! but not a minimal one.

use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices_deadline, Algorithm, DiffOp};
use std::fmt::Write;
use std::time::{Duration, Instant};

/// Options controlling diff generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Number of unchanged lines shown around each change
    pub context_lines: usize,
    /// Compare lines with surrounding whitespace trimmed
    pub ignore_whitespace: bool,
    /// Time budget for finding a minimal edit script (`None` = unbounded)
    pub timeout: Option<Duration>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 2,
            ignore_whitespace: false,
            timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// A single line in a hunk, carrying its 1-based line number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineChange {
    /// Unchanged line (old line number)
    Context(usize, String),
    /// Line only in the new text (new line number)
    Added(usize, String),
    /// Line only in the old text (old line number)
    Deleted(usize, String),
}

/// A contiguous group of changes with surrounding context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// First old line covered by the hunk (1-based, 0 when the hunk covers no old lines)
    pub from_line: usize,
    /// Number of old lines covered
    pub from_count: usize,
    /// First new line covered by the hunk (1-based, 0 when the hunk covers no new lines)
    pub to_line: usize,
    /// Number of new lines covered
    pub to_count: usize,
    /// Lines of the hunk in order
    pub changes: Vec<LineChange>,
}

/// Compute line-level diff between two texts
///
/// # Arguments
///
/// * `old` - Text from the older snapshot
/// * `new` - Text from the newer snapshot
/// * `options` - Options controlling diff generation
///
/// # Returns
///
/// The hunks describing the changes; empty when both texts have the same lines
pub fn compute_line_diff(old: &str, new: &str, options: &DiffOptions) -> Vec<DiffHunk> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    if old_lines.is_empty() && new_lines.is_empty() {
        return Vec::new();
    }

    let deadline = options.timeout.map(|t| Instant::now() + t);
    let ops = compute_changes(&old_lines, &new_lines, options.ignore_whitespace, deadline);
    create_hunks(&ops, &old_lines, &new_lines, options.context_lines)
}

/// Render hunks as patch text
///
/// Each hunk starts with an `@@ -a,b +c,d @@` header followed by its lines
/// prefixed with ` `, `-` or `+`. Every line ends with `\n`.
pub fn render_patch(hunks: &[DiffHunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.from_line, hunk.from_count, hunk.to_line, hunk.to_count
        );
        for change in &hunk.changes {
            let (prefix, text) = match change {
                LineChange::Context(_, t) => (' ', t),
                LineChange::Deleted(_, t) => ('-', t),
                LineChange::Added(_, t) => ('+', t),
            };
            let _ = writeln!(out, "{}{}", prefix, text);
        }
    }
    out
}

/// Convenience wrapper: diff two texts and render the patch
pub fn unified_patch(old: &str, new: &str, options: &DiffOptions) -> String {
    render_patch(&compute_line_diff(old, new, options))
}

/// Check if content appears to be binary
pub fn is_binary_content(content: &[u8]) -> bool {
    // NUL byte in the first 8KB
    let check_len = content.len().min(8192);
    content[..check_len].contains(&0)
}

/// Represents a change operation in the diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOp {
    Keep(usize, usize), // (old_line_idx, new_line_idx)
    Delete(usize),      // old_line_idx
    Insert(usize),      // new_line_idx
}

/// Compute the full edit script, common prefix and suffix included
fn compute_changes(
    old_lines: &[&str],
    new_lines: &[&str],
    ignore_whitespace: bool,
    deadline: Option<Instant>,
) -> Vec<ChangeOp> {
    let prefix = old_lines
        .iter()
        .zip(new_lines)
        .take_while(|(a, b)| lines_equal(a, b, ignore_whitespace))
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| lines_equal(a, b, ignore_whitespace))
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut ops: Vec<ChangeOp> = (0..prefix).map(|i| ChangeOp::Keep(i, i)).collect();
    ops.extend(
        myers_changes(old_mid, new_mid, ignore_whitespace, deadline)
            .into_iter()
            .map(|op| match op {
                ChangeOp::Keep(o, n) => ChangeOp::Keep(o + prefix, n + prefix),
                ChangeOp::Delete(o) => ChangeOp::Delete(o + prefix),
                ChangeOp::Insert(n) => ChangeOp::Insert(n + prefix),
            }),
    );

    let old_tail = old_lines.len() - suffix;
    let new_tail = new_lines.len() - suffix;
    ops.extend((0..suffix).map(|i| ChangeOp::Keep(old_tail + i, new_tail + i)));
    ops
}

/// Edit script of two line slices, indices relative to the slices
fn myers_changes(
    old_lines: &[&str],
    new_lines: &[&str],
    ignore_whitespace: bool,
    deadline: Option<Instant>,
) -> Vec<ChangeOp> {
    if old_lines.is_empty() || new_lines.is_empty() {
        return (0..old_lines.len())
            .map(ChangeOp::Delete)
            .chain((0..new_lines.len()).map(ChangeOp::Insert))
            .collect();
    }

    let old_keys = line_keys(old_lines, ignore_whitespace);
    let new_keys = line_keys(new_lines, ignore_whitespace);

    let mut changes = Vec::with_capacity(old_lines.len().max(new_lines.len()));
    for op in capture_diff_slices_deadline(Algorithm::Myers, &old_keys, &new_keys, deadline) {
        match op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => changes.extend((0..len).map(|i| ChangeOp::Keep(old_index + i, new_index + i))),
            DiffOp::Delete {
                old_index, old_len, ..
            } => changes.extend((old_index..old_index + old_len).map(ChangeOp::Delete)),
            DiffOp::Insert {
                new_index, new_len, ..
            } => changes.extend((new_index..new_index + new_len).map(ChangeOp::Insert)),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                changes.extend((old_index..old_index + old_len).map(ChangeOp::Delete));
                changes.extend((new_index..new_index + new_len).map(ChangeOp::Insert));
            }
        }
    }
    changes
}

fn line_keys<'a>(lines: &[&'a str], ignore_whitespace: bool) -> Vec<&'a str> {
    if ignore_whitespace {
        lines.iter().map(|l| l.trim()).collect()
    } else {
        lines.to_vec()
    }
}

fn lines_equal(a: &str, b: &str, ignore_whitespace: bool) -> bool {
    if ignore_whitespace {
        a.trim() == b.trim()
    } else {
        a == b
    }
}

/// Group change operations into hunks with `context_lines` of context
fn create_hunks(
    ops: &[ChangeOp],
    old_lines: &[&str],
    new_lines: &[&str],
    context_lines: usize,
) -> Vec<DiffHunk> {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, ChangeOp::Keep(..)))
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    // Merge change positions whose context windows touch
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &pos in &changed {
        let start = pos.saturating_sub(context_lines);
        let end = (pos + context_lines + 1).min(ops.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }

    // Old/new lines consumed before each op
    let mut positions = Vec::with_capacity(ops.len());
    let (mut old_pos, mut new_pos) = (0usize, 0usize);
    for op in ops {
        positions.push((old_pos, new_pos));
        match op {
            ChangeOp::Keep(..) => {
                old_pos += 1;
                new_pos += 1;
            }
            ChangeOp::Delete(_) => old_pos += 1,
            ChangeOp::Insert(_) => new_pos += 1,
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            let mut hunk = HunkBuilder::new(positions[start]);
            for op in &ops[start..end] {
                match *op {
                    ChangeOp::Keep(o, _) => hunk.add_context(o, old_lines[o]),
                    ChangeOp::Delete(o) => hunk.add_deletion(o, old_lines[o]),
                    ChangeOp::Insert(n) => hunk.add_insertion(n, new_lines[n]),
                }
            }
            hunk.build()
        })
        .collect()
}

/// Helper for building diff hunks
struct HunkBuilder {
    old_before: usize,
    new_before: usize,
    from_count: usize,
    to_count: usize,
    changes: Vec<LineChange>,
}

impl HunkBuilder {
    fn new((old_before, new_before): (usize, usize)) -> Self {
        Self {
            old_before,
            new_before,
            from_count: 0,
            to_count: 0,
            changes: Vec::new(),
        }
    }

    fn add_context(&mut self, old_idx: usize, content: &str) {
        self.from_count += 1;
        self.to_count += 1;
        self.changes.push(LineChange::Context(old_idx + 1, content.to_string()));
    }

    fn add_deletion(&mut self, old_idx: usize, content: &str) {
        self.from_count += 1;
        self.changes.push(LineChange::Deleted(old_idx + 1, content.to_string()));
    }

    fn add_insertion(&mut self, new_idx: usize, content: &str) {
        self.to_count += 1;
        self.changes.push(LineChange::Added(new_idx + 1, content.to_string()));
    }

    fn build(self) -> DiffHunk {
        // Unified diff convention: an empty side points at the line before it
        let from_line = if self.from_count == 0 { self.old_before } else { self.old_before + 1 };
        let to_line = if self.to_count == 0 { self.new_before } else { self.new_before + 1 };
        DiffHunk {
            from_line,
            from_count: self.from_count,
            to_line,
            to_count: self.to_count,
            changes: self.changes,
        }
    }
}
