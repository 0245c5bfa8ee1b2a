//! Line-oriented unified diffs between two source versions.
//!
//! The edit script comes from `similar` (Myers, a longest-common-subsequence
//! search) over the two line sequences. Rendering is done here so the output
//! stays byte-stable: `--- previous` / `+++ current` file headers, difflib
//! style `@@ -a,b +c,d @@` hunk headers, three lines of context, lines
//! joined by `\n` with no trailing newline.

use similar::{capture_diff_slices, group_diff_ops, Algorithm, DiffTag};

const CONTEXT_LINES: usize = 3;
const OLD_HEADER: &str = "--- previous";
const NEW_HEADER: &str = "+++ current";

/// A rendered diff and the number of `+`/`-` lines in it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineDiff {
    pub text: String,
    pub changed_lines: usize,
}

impl LineDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_lines == 0
    }
}

/// Diff two versions. Absent versions are treated as empty text.
pub fn diff(old: Option<&str>, new: Option<&str>) -> LineDiff {
    let old_lines: Vec<&str> = old.unwrap_or("").lines().collect();
    let new_lines: Vec<&str> = new.unwrap_or("").lines().collect();

    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);
    let groups = group_diff_ops(ops, CONTEXT_LINES);

    let mut out: Vec<String> = Vec::new();
    let mut changed_lines = 0usize;

    for group in &groups {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        if out.is_empty() {
            out.push(OLD_HEADER.to_string());
            out.push(NEW_HEADER.to_string());
        }

        let old_span = first.old_range().start..last.old_range().end;
        let new_span = first.new_range().start..last.new_range().end;
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(old_span.start, old_span.end),
            format_range(new_span.start, new_span.end)
        ));

        for op in group {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    for line in &old_lines[old_range] {
                        out.push(format!(" {}", line));
                    }
                }
                DiffTag::Delete => {
                    for line in &old_lines[old_range] {
                        out.push(format!("-{}", line));
                        changed_lines += 1;
                    }
                }
                DiffTag::Insert => {
                    for line in &new_lines[new_range] {
                        out.push(format!("+{}", line));
                        changed_lines += 1;
                    }
                }
                DiffTag::Replace => {
                    for line in &old_lines[old_range] {
                        out.push(format!("-{}", line));
                        changed_lines += 1;
                    }
                    for line in &new_lines[new_range] {
                        out.push(format!("+{}", line));
                        changed_lines += 1;
                    }
                }
            }
        }
    }

    LineDiff {
        text: out.join("\n"),
        changed_lines,
    }
}

// difflib's unified range: "start,len", bare "start" when len == 1,
// and "start-1,0" for an empty range.
fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    let beginning = if length == 0 { start } else { start + 1 };
    if length == 1 {
        beginning.to_string()
    } else {
        format!("{},{}", beginning, length)
    }
}

/// Iterate body lines of rendered diff text, skipping the file headers
/// that precede the first hunk.
fn body_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().skip_while(|line| !line.starts_with("@@"))
}

/// Count `+`/`-` lines of rendered diff text, excluding the file headers.
pub fn count_changed_lines(text: &str) -> usize {
    body_lines(text)
        .filter(|line| line.starts_with('+') || line.starts_with('-'))
        .count()
}

/// The added lines of rendered diff text, `+` prefix included.
pub fn added_lines(text: &str) -> Vec<&str> {
    body_lines(text)
        .filter(|line| line.starts_with('+'))
        .collect()
}
