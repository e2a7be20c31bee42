//! Operational transform engine for plain-text documents.
//!
//! Pure, synchronous functions with no knowledge of rooms, users, or
//! networking. Everything here operates on **character** offsets (not bytes),
//! so multi-byte UTF-8 content never splits a code point.
//!
//! ```text
//! concurrent edits            transform(a, b)
//! a: insert "x" @ 5   ──────────────────────────► a': insert "x" @ 5+|b|
//! b: insert "yy" @ 3  (already applied)
//! ```
//!
//! Out-of-range coordinates are clamped, never rejected: `transform` and
//! `apply` must always produce an applicable result so that an accepted
//! operation can never wedge a room.
//!
//! Reference: Ellis & Gibbs — Concurrency Control in Groupware Systems

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The three edit shapes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Insert,
    Delete,
    Replace,
}

/// A single immutable edit against a document.
///
/// `position` and `length` are character offsets valid at the moment the
/// operation was issued; transformation rewrites them against edits that were
/// accepted in between. `sequence` is assigned by the server at acceptance
/// time (0 = not yet accepted) and is the sole ordering key within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub position: usize,
    /// Inserted text. Required for insert/replace.
    pub content: Option<String>,
    /// Removed character count. Required for delete/replace.
    pub length: Option<usize>,
    pub author_id: String,
    pub sequence: u64,
}

impl Operation {
    /// Create an insert of `content` at `position`.
    pub fn insert(
        position: usize,
        content: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: OpKind::Insert,
            position,
            content: Some(content.into()),
            length: None,
            author_id: author_id.into(),
            sequence: 0,
        }
    }

    /// Create a delete of `length` characters starting at `position`.
    pub fn delete(position: usize, length: usize, author_id: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Delete,
            position,
            content: None,
            length: Some(length),
            author_id: author_id.into(),
            sequence: 0,
        }
    }

    /// Create a replace: remove `length` characters at `position`, then
    /// insert `content` there.
    pub fn replace(
        position: usize,
        length: usize,
        content: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: OpKind::Replace,
            position,
            content: Some(content.into()),
            length: Some(length),
            author_id: author_id.into(),
            sequence: 0,
        }
    }

    /// Structural validation. Checked before any transform is attempted;
    /// an operation that fails here never enters a room's history.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.kind {
            OpKind::Insert if self.content.is_none() => Err("insert requires content"),
            OpKind::Delete if self.length.is_none() => Err("delete requires length"),
            OpKind::Replace if self.content.is_none() => Err("replace requires content"),
            OpKind::Replace if self.length.is_none() => Err("replace requires length"),
            _ => Ok(()),
        }
    }

    /// Character count of the inserted content (0 for deletes).
    pub fn insert_len(&self) -> usize {
        self.content.as_deref().map_or(0, |c| c.chars().count())
    }

    /// Character count of the removed span (0 for inserts).
    pub fn delete_len(&self) -> usize {
        self.length.unwrap_or(0)
    }
}

/// Transform `op_a` so it can be applied after `op_b`, assuming both were
/// issued against the same prior document state.
///
/// Same-position insert ties break on lexicographic author id: the smaller
/// id keeps the left position. The rule is symmetric, so transforming in
/// either order converges.
pub fn transform(op_a: &Operation, op_b: &Operation) -> Operation {
    match op_b.kind {
        OpKind::Insert => after_insert(op_a, op_b.position, op_b.insert_len(), &op_b.author_id),
        OpKind::Delete => after_delete(op_a, op_b.position, op_b.delete_len()),
        OpKind::Replace => {
            // A replace acts as its delete immediately followed by its insert.
            let shifted = after_delete(op_a, op_b.position, op_b.delete_len());
            after_insert(&shifted, op_b.position, op_b.insert_len(), &op_b.author_id)
        }
    }
}

/// Rewrite `op` to account for `len` characters inserted at `at`.
fn after_insert(op: &Operation, at: usize, len: usize, author_id: &str) -> Operation {
    let mut out = op.clone();
    match op.kind {
        OpKind::Insert => {
            let shifts = match op.position.cmp(&at) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => op.author_id.as_str() >= author_id,
            };
            if shifts {
                out.position += len;
            }
        }
        OpKind::Delete | OpKind::Replace => {
            if at <= op.position {
                out.position += len;
            }
        }
    }
    out
}

/// Rewrite `op` to account for `len` characters deleted at `at`.
fn after_delete(op: &Operation, at: usize, len: usize) -> Operation {
    let mut out = op.clone();
    match op.kind {
        OpKind::Insert => {
            if op.position <= at {
                // before the removed range: unaffected
            } else if op.position >= at + len {
                out.position -= len;
            } else {
                // inside the removed range: collapse to its start
                out.position = at;
            }
        }
        OpKind::Delete | OpKind::Replace => {
            // The surviving part of op's range is contiguous once the prior
            // delete collapses the overlap, so remapping the start index and
            // shrinking by the overlap is exact. Fully subsumed → length 0.
            let span = op.delete_len();
            let overlap = (op.position + span)
                .min(at + len)
                .saturating_sub(op.position.max(at));
            out.position = remap_index(op.position, at, len);
            out.length = Some(span - overlap);
        }
    }
    out
}

/// Where index `i` lands after `len` characters are deleted at `at`.
fn remap_index(i: usize, at: usize, len: usize) -> usize {
    if i < at {
        i
    } else if i < at + len {
        at
    } else {
        i - len
    }
}

/// Apply `op` to `document`, returning a new string.
///
/// Coordinates are clamped into `[0, len]`; a delete reaching past the end
/// removes only what exists. Input is never mutated.
pub fn apply(document: &str, op: &Operation) -> String {
    match op.kind {
        OpKind::Insert => splice_insert(document, op.position, op.content.as_deref().unwrap_or("")),
        OpKind::Delete => splice_delete(document, op.position, op.delete_len()),
        OpKind::Replace => {
            let removed = splice_delete(document, op.position, op.delete_len());
            splice_insert(&removed, op.position, op.content.as_deref().unwrap_or(""))
        }
    }
}

/// Merge two same-author contiguous operations into one, for optional local
/// coalescing before submission. Returns `None` when the pair is not
/// composable (different authors, already accepted, non-adjacent, or mixed
/// kinds); correctness never depends on composition happening.
pub fn compose(op_a: &Operation, op_b: &Operation) -> Option<Operation> {
    if op_a.author_id != op_b.author_id || op_a.sequence != 0 || op_b.sequence != 0 {
        return None;
    }
    match (op_a.kind, op_b.kind) {
        (OpKind::Insert, OpKind::Insert)
            if op_b.position == op_a.position + op_a.insert_len() =>
        {
            let mut content = op_a.content.clone().unwrap_or_default();
            content.push_str(op_b.content.as_deref().unwrap_or(""));
            Some(Operation::insert(op_a.position, content, op_a.author_id.clone()))
        }
        (OpKind::Delete, OpKind::Delete) if op_b.position == op_a.position => Some(
            Operation::delete(
                op_a.position,
                op_a.delete_len() + op_b.delete_len(),
                op_a.author_id.clone(),
            ),
        ),
        _ => None,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of character `char_pos`, saturating to the end of the string.
fn byte_at(s: &str, char_pos: usize) -> usize {
    s.char_indices().nth(char_pos).map_or(s.len(), |(i, _)| i)
}

fn splice_insert(document: &str, position: usize, content: &str) -> String {
    let pos = position.min(char_len(document));
    let at = byte_at(document, pos);
    let mut out = String::with_capacity(document.len() + content.len());
    out.push_str(&document[..at]);
    out.push_str(content);
    out.push_str(&document[at..]);
    out
}

fn splice_delete(document: &str, position: usize, length: usize) -> String {
    let total = char_len(document);
    let start = position.min(total);
    let end = start + length.min(total - start);
    let start_b = byte_at(document, start);
    let end_b = byte_at(document, end);
    let mut out = String::with_capacity(document.len() - (end_b - start_b));
    out.push_str(&document[..start_b]);
    out.push_str(&document[end_b..]);
    out
}
