//! Unified-diff parsing and application.
//!
//! Supports single-file diffs as produced by `diff -u` / `git diff`: optional
//! `---`/`+++` headers, `@@ -a,b +c,d @@` hunks, and the
//! `\ No newline at end of file` marker. Hunks are placed at their stated
//! line (adjusted by the drift of earlier hunks) or, failing that, at the
//! nearest position where their context matches exactly. There is no fuzz:
//! a hunk whose context does not match anywhere is an error.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
    lines: Vec<HunkLine>,
    old_missing_newline: bool,
    new_missing_newline: bool,
}

impl Hunk {
    fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
            HunkLine::Add(_) => None,
        })
    }

    fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Add(text) => Some(text.as_str()),
            HunkLine::Remove(_) => None,
        })
    }

    fn reversed(&self) -> Self {
        Self {
            old_start: self.new_start,
            old_len: self.new_len,
            new_start: self.old_start,
            new_len: self.old_len,
            lines: self
                .lines
                .iter()
                .map(|line| match line {
                    HunkLine::Context(t) => HunkLine::Context(t.clone()),
                    HunkLine::Remove(t) => HunkLine::Add(t.clone()),
                    HunkLine::Add(t) => HunkLine::Remove(t.clone()),
                })
                .collect(),
            old_missing_newline: self.new_missing_newline,
            new_missing_newline: self.old_missing_newline,
        }
    }
}

/// Why a diff could not be parsed or applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// The patch text is not a valid single-file unified diff.
    Malformed { line: usize, reason: String },
    /// Hunk `hunk` (1-based) matches nowhere in the target.
    HunkMismatch { hunk: usize, expected_line: usize },
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { line, reason } => write!(f, "malformed patch at line {line}: {reason}"),
            Self::HunkMismatch { hunk, expected_line } => {
                write!(f, "hunk #{hunk} does not match the target near line {expected_line}")
            }
        }
    }
}

impl std::error::Error for DiffError {}

/// A parsed single-file unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    hunks: Vec<Hunk>,
}

impl UnifiedDiff {
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut hunks = Vec::new();
        let mut i = 0;
        let mut seen_file_header = false;

        while i < lines.len() {
            let line = lines[i];
            if line.starts_with("@@") {
                let (hunk, next) = parse_hunk(&lines, i)?;
                hunks.push(hunk);
                i = next;
                continue;
            }
            if line.starts_with("--- ") {
                if seen_file_header && !hunks.is_empty() {
                    return Err(DiffError::Malformed {
                        line: i + 1,
                        reason: "multi-file patches are not supported".to_string(),
                    });
                }
                seen_file_header = true;
            }
            // Headers (`diff`, `index`, `---`, `+++`) and free-form preamble.
            i += 1;
        }

        if hunks.is_empty() {
            return Err(DiffError::Malformed {
                line: lines.len().max(1),
                reason: "no hunks found".to_string(),
            });
        }
        Ok(Self { hunks })
    }

    #[must_use]
    pub fn hunk_count(&self) -> usize {
        self.hunks.len()
    }

    /// Applies every hunk to `target`, returning the patched text.
    pub fn apply(&self, target: &str) -> Result<String, DiffError> {
        apply_hunks(&self.hunks, target)
    }

    /// True when the diff is already present in `target` (it reverse-applies).
    #[must_use]
    pub fn is_applied_to(&self, target: &str) -> bool {
        let reversed: Vec<Hunk> = self.hunks.iter().map(Hunk::reversed).collect();
        apply_hunks(&reversed, target).is_ok()
    }
}

fn parse_range(text: &str, line: usize) -> Result<(usize, usize), DiffError> {
    let malformed = || DiffError::Malformed {
        line,
        reason: format!("bad hunk range '{text}'"),
    };
    let (start, len) = match text.split_once(',') {
        Some((start, len)) => (start, len.parse().map_err(|_| malformed())?),
        None => (text, 1),
    };
    Ok((start.parse().map_err(|_| malformed())?, len))
}

fn parse_hunk(lines: &[&str], at: usize) -> Result<(Hunk, usize), DiffError> {
    let header = lines[at];
    let line_no = at + 1;
    let malformed = |reason: &str| DiffError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let body = header
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split_once(" @@"))
        .map(|(ranges, _)| ranges)
        .ok_or_else(|| malformed("bad hunk header"))?;
    let (old, new) = body.split_once(' ').ok_or_else(|| malformed("bad hunk header"))?;
    let old = old.strip_prefix('-').ok_or_else(|| malformed("bad old range"))?;
    let new = new.strip_prefix('+').ok_or_else(|| malformed("bad new range"))?;
    let (old_start, old_len) = parse_range(old, line_no)?;
    let (new_start, new_len) = parse_range(new, line_no)?;

    let mut hunk = Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };

    let (mut old_seen, mut new_seen) = (0, 0);
    let mut i = at + 1;
    while i < lines.len() && (old_seen < old_len || new_seen < new_len) {
        let raw = lines[i].strip_suffix('\r').unwrap_or(lines[i]);
        let mut chars = raw.chars();
        let tag = chars.next();
        let text = chars.as_str().to_string();
        match tag {
            Some(' ') | None => {
                hunk.lines.push(HunkLine::Context(text));
                old_seen += 1;
                new_seen += 1;
            }
            Some('-') => {
                hunk.lines.push(HunkLine::Remove(text));
                old_seen += 1;
            }
            Some('+') => {
                hunk.lines.push(HunkLine::Add(text));
                new_seen += 1;
            }
            Some('\\') => mark_missing_newline(&mut hunk),
            Some(_) => {
                return Err(DiffError::Malformed {
                    line: i + 1,
                    reason: format!("unexpected line in hunk: '{raw}'"),
                });
            }
        }
        i += 1;
    }

    if old_seen != old_len || new_seen != new_len {
        return Err(malformed("hunk is truncated or its counts are wrong"));
    }

    if lines.get(i).is_some_and(|line| line.starts_with('\\')) {
        mark_missing_newline(&mut hunk);
        i += 1;
    }

    Ok((hunk, i))
}

fn mark_missing_newline(hunk: &mut Hunk) {
    match hunk.lines.last() {
        Some(HunkLine::Remove(_)) => hunk.old_missing_newline = true,
        Some(HunkLine::Add(_)) => hunk.new_missing_newline = true,
        Some(HunkLine::Context(_)) => {
            hunk.old_missing_newline = true;
            hunk.new_missing_newline = true;
        }
        None => {}
    }
}

fn apply_hunks(hunks: &[Hunk], target: &str) -> Result<String, DiffError> {
    let eol = if target.contains("\r\n") { "\r\n" } else { "\n" };
    let mut trailing_newline = target.is_empty() || target.ends_with('\n');
    let mut lines: Vec<String> = target
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();

    let mut drift: isize = 0;
    let mut cursor = 0usize;

    for (index, hunk) in hunks.iter().enumerate() {
        let old: Vec<&str> = hunk.old_lines().collect();
        let new: Vec<String> = hunk.new_lines().map(str::to_string).collect();

        // Pure insertions (`-n,0`) go after line n; everything else starts at n.
        let stated = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let expected = (stated as isize + drift).max(cursor as isize) as usize;

        let position = find_match(&lines, &old, expected, cursor).ok_or(DiffError::HunkMismatch {
            hunk: index + 1,
            expected_line: expected + 1,
        })?;

        let touches_end = position + old.len() == lines.len();
        if touches_end && hunk.old_missing_newline && trailing_newline {
            return Err(DiffError::HunkMismatch {
                hunk: index + 1,
                expected_line: position + 1,
            });
        }

        drift += position as isize - stated as isize + new.len() as isize - old.len() as isize;
        cursor = position + new.len();
        lines.splice(position..position + old.len(), new);

        if touches_end {
            if hunk.new_missing_newline {
                trailing_newline = false;
            } else if hunk.old_missing_newline {
                trailing_newline = true;
            }
        }
    }

    let mut result = lines.join(eol);
    if trailing_newline && !lines.is_empty() {
        result.push_str(eol);
    }
    Ok(result)
}

fn find_match(lines: &[String], old: &[&str], expected: usize, min: usize) -> Option<usize> {
    let fits = |pos: usize| {
        pos >= min
            && pos + old.len() <= lines.len()
            && lines[pos..pos + old.len()].iter().zip(old).all(|(a, b)| a == b)
    };

    if fits(expected) {
        return Some(expected);
    }
    let max_distance = lines.len().max(expected);
    (1..=max_distance).find_map(|distance| {
        let before = expected.checked_sub(distance).filter(|&pos| fits(pos));
        before.or_else(|| Some(expected + distance).filter(|&pos| fits(pos)))
    })
}
