//! Line and byte comparison of actual against expected output.
//!
//! Text is compared twice. The *soft* pass ignores whitespace entirely and
//! detects genuinely wrong content. Only when that pass is clean does the
//! *hard* pass run, which is whitespace sensitive and surfaces presentation
//! problems (trailing spaces, missing blank lines, line endings).
//!
//! Everything here is a pure function of its inputs.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));
static WHITESPACE_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\n]").expect("static regex"));

/// Character substituted for whitespace when visible diffs are requested.
pub const VISIBLE_MARKER: &str = "#";

/// Similarity a replaced line pair needs before an intraline hint is shown.
const HINT_CUTOFF: f64 = 0.75;

/// Contents of an output file, read either as lines or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Lines including their terminators.
    Text(Vec<String>),
    Binary(Vec<u8>),
}

impl Content {
    /// Split text into lines, keeping each line's terminator.
    pub fn text(s: &str) -> Self {
        Content::Text(split_lines(s))
    }

    /// Decode `bytes` as either lines of text or an opaque blob. Invalid UTF-8
    /// in text is replaced rather than rejected.
    pub fn from_bytes(bytes: Vec<u8>, is_text: bool) -> Self {
        if is_text {
            Content::text(&String::from_utf8_lossy(&bytes))
        } else {
            Content::Binary(bytes)
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Content::Text(_))
    }
}

/// Split text into lines, each keeping its `\n` terminator.
pub fn split_lines(s: &str) -> Vec<String> {
    s.split_inclusive('\n').map(str::to_string).collect()
}

/// Comparison tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Replace whitespace with [`VISIBLE_MARKER`] in the hard pass.
    pub visible_whitespace: bool,
    /// Number of added plus removed lines a diff needs before it counts.
    pub fuzz: usize,
}

/// Classification of one line of a line diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    /// Present in both sequences.
    Common,
    /// Present only in the actual output.
    Added,
    /// Present only in the expected output.
    Removed,
    /// Guide line pointing at the changed characters of a replaced line.
    Hint,
}

impl LineTag {
    fn prefix(self) -> &'static str {
        match self {
            LineTag::Common => "  ",
            LineTag::Added => "+ ",
            LineTag::Removed => "- ",
            LineTag::Hint => "? ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub tag: LineTag,
    /// Line text including its terminator, if it had one.
    pub text: String,
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.prefix(), self.text)
    }
}

/// A non-empty difference between actual and expected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diff {
    /// Full line diff (common lines included for context).
    Lines(Vec<DiffLine>),
    /// Binary mismatch; carries the actual content.
    Bytes(Vec<u8>),
}

impl Diff {
    /// Number of added plus removed lines (or 1 for a binary mismatch).
    pub fn change_count(&self) -> usize {
        match self {
            Diff::Lines(lines) => count_changes(lines),
            Diff::Bytes(_) => 1,
        }
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diff::Lines(lines) => {
                for line in lines {
                    write!(f, "{line}")?;
                    if !line.text.ends_with('\n') {
                        writeln!(f)?;
                    }
                }
                Ok(())
            }
            Diff::Bytes(bytes) => writeln!(f, "<binary output differs, {} bytes>", bytes.len()),
        }
    }
}

/// Outcome of comparing one output file against its expected counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffOutcome {
    /// Content-level difference. When present it shows the unnormalized diff.
    pub soft: Option<Diff>,
    /// Presentation-only difference; only computed when `soft` is `None`.
    pub hard: Option<Diff>,
}

impl DiffOutcome {
    pub fn is_match(&self) -> bool {
        self.soft.is_none() && self.hard.is_none()
    }
}

/// Compare `actual` against `expected`.
///
/// The expected content decides the mode: when it is binary, the actual
/// content is compared byte for byte.
pub fn diff(actual: &Content, expected: &Content, opts: DiffOptions) -> DiffOutcome {
    match (actual, expected) {
        (Content::Text(a), Content::Text(e)) => diff_text(a, e, opts),
        (Content::Binary(a), Content::Binary(e)) => diff_bytes(a, e),
        (Content::Text(a), Content::Binary(e)) => diff_bytes(a.concat().as_bytes(), e),
        (Content::Binary(a), Content::Text(e)) => {
            let actual = split_lines(&String::from_utf8_lossy(a));
            diff_text(&actual, e, opts)
        }
    }
}

/// Exact byte comparison.
pub fn diff_bytes(actual: &[u8], expected: &[u8]) -> DiffOutcome {
    if actual == expected {
        DiffOutcome::default()
    } else {
        DiffOutcome {
            soft: Some(Diff::Bytes(actual.to_vec())),
            hard: None,
        }
    }
}

/// Soft then hard comparison of two line sequences.
pub fn diff_text(actual: &[String], expected: &[String], opts: DiffOptions) -> DiffOutcome {
    let soft_expected = normalize(expected);
    let soft_actual = normalize(actual);

    if line_diff(&soft_expected, &soft_actual, opts.fuzz).is_some() {
        // Content really differs: report the raw diff, not the normalized one.
        return DiffOutcome {
            soft: line_diff(expected, actual, 0),
            hard: None,
        };
    }

    let hard = if opts.visible_whitespace {
        line_diff(&make_visible(expected), &make_visible(actual), opts.fuzz)
    } else {
        line_diff(expected, actual, opts.fuzz)
    };
    DiffOutcome { soft: None, hard }
}

/// Strip every line, drop the blank ones and delete all remaining whitespace.
pub fn normalize(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| format!("{}\n", WHITESPACE_RUN.replace_all(line, "")))
        .collect()
}

/// Replace each whitespace character (line terminators included) by the
/// visible marker. Every resulting line ends with a plain newline.
pub fn make_visible(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| format!("{}\n", WHITESPACE_CHAR.replace_all(line, VISIBLE_MARKER)))
        .collect()
}

/// Line diff of `expected` against `actual`.
///
/// Returns `None` unless the number of added plus removed lines reaches
/// `fuzz` (a fuzz of 0 behaves like 1: any change counts).
pub fn line_diff(expected: &[String], actual: &[String], fuzz: usize) -> Option<Diff> {
    let diff = Diff::Lines(compare_lines(expected, actual));
    let changes = diff.change_count();
    (changes > 0 && changes >= fuzz).then_some(diff)
}

fn count_changes(lines: &[DiffLine]) -> usize {
    lines
        .iter()
        .filter(|l| matches!(l.tag, LineTag::Added | LineTag::Removed))
        .count()
}

/// Full line-level comparison including common lines and intraline hints.
pub fn compare_lines(expected: &[String], actual: &[String]) -> Vec<DiffLine> {
    let ops = edit_script(expected, actual);
    let mut out = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        if let Op::Keep(e) = ops[i] {
            out.push(tagged(LineTag::Common, &expected[e]));
            i += 1;
            continue;
        }
        // Collect one block of consecutive changes.
        let start = i;
        while i < ops.len() && !matches!(ops[i], Op::Keep(_)) {
            i += 1;
        }
        let removed: Vec<&String> = ops[start..i]
            .iter()
            .filter_map(|op| match op {
                Op::Delete(e) => Some(&expected[*e]),
                _ => None,
            })
            .collect();
        let added: Vec<&String> = ops[start..i]
            .iter()
            .filter_map(|op| match op {
                Op::Insert(a) => Some(&actual[*a]),
                _ => None,
            })
            .collect();
        emit_block(&removed, &added, &mut out);
    }
    out
}

/// Emit a change block. Equal-length blocks are paired line by line so that
/// similar lines get hints; anything else is listed removed-then-added.
fn emit_block(removed: &[&String], added: &[&String], out: &mut Vec<DiffLine>) {
    if removed.len() != added.len() {
        out.extend(removed.iter().map(|t| tagged(LineTag::Removed, t)));
        out.extend(added.iter().map(|t| tagged(LineTag::Added, t)));
        return;
    }
    for (old, new) in removed.iter().zip(added) {
        let (old_hint, new_hint) = intraline_hints(old, new);
        out.push(tagged(LineTag::Removed, old));
        out.extend(old_hint.map(|h| tagged(LineTag::Hint, &h)));
        out.push(tagged(LineTag::Added, new));
        out.extend(new_hint.map(|h| tagged(LineTag::Hint, &h)));
    }
}

fn tagged(tag: LineTag, text: &str) -> DiffLine {
    DiffLine {
        tag,
        text: text.to_string(),
    }
}

/// Guide lines marking the characters removed from `old` (`-`) and added to
/// `new` (`+`). Both are `None` when the lines are too dissimilar; a side
/// with nothing to mark is `None` as well.
fn intraline_hints(old: &str, new: &str) -> (Option<String>, Option<String>) {
    let a: Vec<char> = old.trim_end_matches(['\n', '\r']).chars().collect();
    let b: Vec<char> = new.trim_end_matches(['\n', '\r']).chars().collect();
    if a.is_empty() && b.is_empty() {
        return (None, None);
    }
    let ops = edit_script(&a, &b);
    let kept = ops.iter().filter(|op| matches!(op, Op::Keep(_))).count();
    let ratio = 2.0 * kept as f64 / (a.len() + b.len()) as f64;
    if ratio < HINT_CUTOFF {
        return (None, None);
    }

    let mut old_marks = vec![' '; a.len()];
    let mut new_marks = vec![' '; b.len()];
    for op in ops {
        match op {
            Op::Delete(i) => old_marks[i] = '-',
            Op::Insert(j) => new_marks[j] = '+',
            Op::Keep(_) => {}
        }
    }
    (render_marks(&old_marks), render_marks(&new_marks))
}

fn render_marks(marks: &[char]) -> Option<String> {
    let s: String = marks.iter().collect();
    let s = s.trim_end();
    (!s.is_empty()).then(|| format!("{s}\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// Index into the first sequence of an element common to both.
    Keep(usize),
    /// Index into the first sequence.
    Delete(usize),
    /// Index into the second sequence.
    Insert(usize),
}

/// Shortest edit script turning `a` into `b`.
///
/// Myers' O(ND) search in linear space: each region is split at a point on
/// an optimal path, found by searching from both ends until the searches
/// meet. Deletions are ordered before insertions within a change block.
fn edit_script<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
    let mut ops = Vec::with_capacity(a.len().max(b.len()));
    diff_region(a, b, 0, 0, &mut ops);
    order_deletes_first(ops)
}

/// Append the edit script of `a` against `b`, two windows starting at
/// `a_at` and `b_at` in the full sequences.
fn diff_region<T: PartialEq>(a: &[T], b: &[T], a_at: usize, b_at: usize, ops: &mut Vec<Op>) {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    ops.extend((a_at..a_at + prefix).map(Op::Keep));
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let (a_at, b_at) = (a_at + prefix, b_at + prefix);

    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);

    if a.is_empty() {
        ops.extend((b_at..b_at + b.len()).map(Op::Insert));
    } else if b.is_empty() {
        ops.extend((a_at..a_at + a.len()).map(Op::Delete));
    } else if let Some((x, y)) = bisect(a, b) {
        diff_region(&a[..x], &b[..y], a_at, b_at, ops);
        diff_region(&a[x..], &b[y..], a_at + x, b_at + y, ops);
    } else {
        ops.extend((a_at..a_at + a.len()).map(Op::Delete));
        ops.extend((b_at..b_at + b.len()).map(Op::Insert));
    }

    let tail = a_at + a.len();
    ops.extend((tail..tail + suffix).map(Op::Keep));
}

/// Point where an optimal path crosses from the forward half of the edit
/// graph into the reverse half, or `None` if the searches never meet.
///
/// `fwd[k]` is the furthest `x` reached on diagonal `k = x - y` from the
/// start; `rev[k]` the same measured from the end.
fn bisect<T: PartialEq>(a: &[T], b: &[T]) -> Option<(usize, usize)> {
    let (n, m) = (a.len() as isize, b.len() as isize);
    let max_d = (n + m + 1) / 2;
    let offset = max_d;
    let len = 2 * max_d + 2;
    let mut fwd = vec![-1isize; len as usize];
    let mut rev = vec![-1isize; len as usize];
    fwd[(offset + 1) as usize] = 0;
    rev[(offset + 1) as usize] = 0;
    let delta = n - m;
    // With an odd delta the searches first meet while extending forward.
    let meet_forward = delta % 2 != 0;
    let (mut fwd_lo, mut fwd_hi, mut rev_lo, mut rev_hi) = (0, 0, 0, 0);

    for d in 0..max_d {
        let mut k = -d + fwd_lo;
        while k <= d - fwd_hi {
            let i = (offset + k) as usize;
            let mut x = if k == -d || (k != d && fwd[i - 1] < fwd[i + 1]) {
                fwd[i + 1]
            } else {
                fwd[i - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            fwd[i] = x;
            if x > n {
                fwd_hi += 2;
            } else if y > m {
                fwd_lo += 2;
            } else if meet_forward {
                let j = offset + delta - k;
                if (0..len).contains(&j) && rev[j as usize] != -1 && x >= n - rev[j as usize] {
                    return Some((x as usize, y as usize));
                }
            }
            k += 2;
        }

        let mut k = -d + rev_lo;
        while k <= d - rev_hi {
            let i = (offset + k) as usize;
            let mut x = if k == -d || (k != d && rev[i - 1] < rev[i + 1]) {
                rev[i + 1]
            } else {
                rev[i - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[(n - x - 1) as usize] == b[(m - y - 1) as usize] {
                x += 1;
                y += 1;
            }
            rev[i] = x;
            if x > n {
                rev_hi += 2;
            } else if y > m {
                rev_lo += 2;
            } else if !meet_forward {
                let j = offset + delta - k;
                if (0..len).contains(&j) && fwd[j as usize] != -1 {
                    let fx = fwd[j as usize];
                    let fy = fx - (j - offset);
                    if fx >= n - x {
                        return Some((fx as usize, fy as usize));
                    }
                }
            }
            k += 2;
        }
    }
    None
}

/// Within every run of consecutive changes, list deletions before insertions.
fn order_deletes_first(ops: Vec<Op>) -> Vec<Op> {
    let mut out = Vec::with_capacity(ops.len());
    let mut pending_insert = Vec::new();
    for op in ops {
        match op {
            Op::Insert(_) => pending_insert.push(op),
            Op::Delete(_) => out.push(op),
            Op::Keep(_) => {
                out.append(&mut pending_insert);
                out.push(op);
            }
        }
    }
    out.append(&mut pending_insert);
    out
}
