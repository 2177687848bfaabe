//! Text diff and patch engine for note content sync.
//!
//! Instead of shipping a note's full body on every save, the editor
//! computes a patch set between the last-synced baseline and the current
//! buffer, and the persistence layer applies that patch set against its
//! own stored copy. Each hunk carries a margin of unchanged context on
//! both sides, which lets [`apply_patch`] relocate a hunk when the stored
//! text has drifted slightly from the text the patch was diffed against
//! (a concurrent minor edit, normalized whitespace). A hunk that cannot
//! be located within tolerance is reported as failed, never applied at a
//! wrong offset and never silently dropped.
//!
//! The character diff itself comes from the `similar` crate; the hunk
//! grouping and the fuzzy apply are implemented here.
//!
//! All offsets are in characters, not bytes, so patch sets survive
//! serialization between platforms with different string encodings.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Characters of unchanged context carried on each side of a hunk.
const CONTEXT_MARGIN: usize = 8;

/// How far (in chars) from the expected location a drifted hunk is
/// searched for before giving up.
const MATCH_DISTANCE: usize = 1000;

/// Highest tolerated error ratio for an imperfect context match.
const MATCH_THRESHOLD: f64 = 0.5;

/// Imperfect matching is skipped for needles longer than this; a hunk
/// that large must match exactly or it fails.
const FUZZY_MAX_LEN: usize = 256;

/// A single tagged edit operation over a text span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum EditOp {
    Equal(String),
    Insert(String),
    Delete(String),
}

impl EditOp {
    /// The text span this operation covers
    pub fn text(&self) -> &str {
        match self {
            EditOp::Equal(s) | EditOp::Insert(s) | EditOp::Delete(s) => s,
        }
    }

    fn char_len(&self) -> usize {
        self.text().chars().count()
    }
}

/// A contiguous unit of change, bundled with surrounding unchanged
/// context for relocation tolerance.
///
/// `source_start`/`source_len` locate the hunk in the diffed source
/// text; `target_start`/`target_len` locate it in the target. The apply
/// routine searches near the target coordinates because earlier hunks,
/// once applied, shift the base toward target space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub source_start: usize,
    pub source_len: usize,
    pub target_start: usize,
    pub target_len: usize,
    pub ops: Vec<EditOp>,
}

impl Hunk {
    /// The text this hunk expects to find in the base (equal + delete)
    pub fn source_text(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            if !matches!(op, EditOp::Insert(_)) {
                out.push_str(op.text());
            }
        }
        out
    }

    /// The text this hunk produces (equal + insert)
    pub fn target_text(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            if !matches!(op, EditOp::Delete(_)) {
                out.push_str(op.text());
            }
        }
        out
    }
}

/// An ordered sequence of hunks transforming one text into another.
pub type PatchSet = Vec<Hunk>;

/// How a single hunk fared during [`apply_patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HunkApplication {
    /// Exact match at the expected location
    Clean,
    /// Located within the tolerance window (shifted or imperfect context)
    Fuzzy,
    /// Could not be located; the hunk was not applied
    Failed,
}

impl HunkApplication {
    pub fn applied(&self) -> bool {
        !matches!(self, HunkApplication::Failed)
    }
}

/// Result of applying a patch set to a base text.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The resulting text, with every successfully located hunk applied
    pub text: String,
    /// Per-hunk application status, in patch order
    pub hunks: Vec<HunkApplication>,
}

impl ApplyOutcome {
    /// True if every hunk matched exactly at its expected location
    pub fn is_clean(&self) -> bool {
        self.hunks.iter().all(|h| matches!(h, HunkApplication::Clean))
    }

    /// True if no hunk failed (clean and fuzzy both count as applied)
    pub fn fully_applied(&self) -> bool {
        self.hunks.iter().all(|h| h.applied())
    }

    /// Indices of hunks that could not be applied
    pub fn failed_hunks(&self) -> Vec<usize> {
        self.hunks
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.applied())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Compute a patch set sufficient to transform `source` into `target`.
///
/// Deterministic for a given input pair. `apply_patch(&compute_diff(a, b), a)`
/// yields `b` exactly, with every hunk clean.
pub fn compute_diff(source: &str, target: &str) -> PatchSet {
    if source == target {
        return Vec::new();
    }
    let ops = char_diff(source, target);
    group_into_hunks(ops)
}

/// Char-level diff, coalesced into runs of equal/insert/delete.
fn char_diff(source: &str, target: &str) -> Vec<EditOp> {
    let diff = TextDiff::from_chars(source, target);
    let mut ops: Vec<EditOp> = Vec::new();

    for change in diff.iter_all_changes() {
        let value = change.value();
        let extend = match (ops.last_mut(), change.tag()) {
            (Some(EditOp::Equal(s)), ChangeTag::Equal)
            | (Some(EditOp::Insert(s)), ChangeTag::Insert)
            | (Some(EditOp::Delete(s)), ChangeTag::Delete) => {
                s.push_str(value);
                true
            }
            _ => false,
        };
        if !extend {
            ops.push(match change.tag() {
                ChangeTag::Equal => EditOp::Equal(value.to_string()),
                ChangeTag::Insert => EditOp::Insert(value.to_string()),
                ChangeTag::Delete => EditOp::Delete(value.to_string()),
            });
        }
    }

    ops
}

/// Group a flat op sequence into context-carrying hunks.
///
/// An equality of at least `2 * CONTEXT_MARGIN` chars closes the open
/// hunk (keeping a margin as trailing context) and separates it from the
/// next; shorter equalities are folded into the hunk whole.
fn group_into_hunks(ops: Vec<EditOp>) -> PatchSet {
    let mut hunks: PatchSet = Vec::new();
    let mut hunk: Option<Hunk> = None;
    // Chars consumed so far in source/target, before the current op.
    let mut src_pos = 0usize;
    let mut tgt_pos = 0usize;
    // Full text of the most recent equality, for leading context.
    let mut last_equal = String::new();

    for op in ops {
        let len = op.char_len();
        match &op {
            EditOp::Equal(text) => {
                if let Some(h) = hunk.as_mut() {
                    if len >= 2 * CONTEXT_MARGIN {
                        let ctx: String = text.chars().take(CONTEXT_MARGIN).collect();
                        let ctx_len = ctx.chars().count();
                        if ctx_len > 0 {
                            h.source_len += ctx_len;
                            h.target_len += ctx_len;
                            h.ops.push(EditOp::Equal(ctx));
                        }
                        hunks.push(hunk.take().unwrap());
                    } else {
                        h.source_len += len;
                        h.target_len += len;
                        h.ops.push(op.clone());
                    }
                }
                last_equal = text.clone();
                src_pos += len;
                tgt_pos += len;
            }
            EditOp::Insert(_) | EditOp::Delete(_) => {
                let h = hunk.get_or_insert_with(|| {
                    let ctx: String = tail_chars(&last_equal, CONTEXT_MARGIN);
                    let ctx_len = ctx.chars().count();
                    let mut h = Hunk {
                        source_start: src_pos - ctx_len,
                        source_len: ctx_len,
                        target_start: tgt_pos - ctx_len,
                        target_len: ctx_len,
                        ops: Vec::new(),
                    };
                    if ctx_len > 0 {
                        h.ops.push(EditOp::Equal(ctx));
                    }
                    h
                });
                match &op {
                    EditOp::Insert(_) => {
                        h.target_len += len;
                        tgt_pos += len;
                    }
                    EditOp::Delete(_) => {
                        h.source_len += len;
                        src_pos += len;
                    }
                    EditOp::Equal(_) => unreachable!(),
                }
                h.ops.push(op);
            }
        }
    }

    if let Some(h) = hunk {
        hunks.push(h);
    }
    hunks
}

/// Last `n` chars of a string
fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

/// Apply a patch set against `base`, tolerating minor drift.
///
/// Hunks are located near their expected (delta-adjusted) positions:
/// first by exact match, then by exact search within a bounded window,
/// then by imperfect context matching under an error-ratio threshold.
/// Drifted context inside an imperfectly matched hunk is preserved by
/// mapping the hunk's operations through a diff of expected-vs-found
/// text. Failed hunks are skipped and reported; the caller decides
/// whether any failure rejects the whole result.
pub fn apply_patch(patches: &PatchSet, base: &str) -> ApplyOutcome {
    let mut text: Vec<char> = base.chars().collect();
    let mut results = Vec::with_capacity(patches.len());
    // Cumulative shift between target coordinates and the evolving base.
    let mut delta = 0isize;

    for hunk in patches {
        let needle: Vec<char> = hunk.source_text().chars().collect();
        let expected =
            (hunk.target_start as isize + delta).clamp(0, text.len() as isize) as usize;

        let loc = match locate(&text, &needle, expected) {
            Some(loc) => loc,
            None => {
                tracing::debug!(
                    expected,
                    needle_len = needle.len(),
                    "hunk could not be located, skipping"
                );
                results.push(HunkApplication::Failed);
                // Cancel the growth this hunk would have contributed.
                delta -= hunk.target_len as isize - hunk.source_len as isize;
                continue;
            }
        };
        // The found location pins the actual shift between target
        // coordinates and the evolving base.
        delta = loc as isize - hunk.target_start as isize;

        let window_end = (loc + needle.len()).min(text.len());
        let matched: Vec<char> = text[loc..window_end].to_vec();

        if matched == needle {
            let replacement: Vec<char> = hunk.target_text().chars().collect();
            text.splice(loc..window_end, replacement);
            results.push(if loc == expected {
                HunkApplication::Clean
            } else {
                HunkApplication::Fuzzy
            });
        } else {
            match apply_imperfect(hunk, &needle, &matched) {
                Some(rebuilt) => {
                    text.splice(loc..window_end, rebuilt);
                    results.push(HunkApplication::Fuzzy);
                }
                None => {
                    results.push(HunkApplication::Failed);
                    delta -= hunk.target_len as isize - hunk.source_len as isize;
                }
            }
        }
    }

    ApplyOutcome {
        text: text.into_iter().collect(),
        hunks: results,
    }
}

/// Find the position of `needle` in `text` closest to `expected`.
///
/// Tries exact matches spiralling outward first, then imperfect matches
/// scored by banded edit distance with a proximity penalty.
fn locate(text: &[char], needle: &[char], expected: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(expected.min(text.len()));
    }
    if needle.len() > text.len() + MATCH_DISTANCE {
        return None;
    }

    // Exact match, nearest candidate first.
    if needle.len() <= text.len() {
        let last_start = text.len() - needle.len();
        for dist in 0..=MATCH_DISTANCE {
            if dist <= expected {
                let c = expected - dist;
                if c <= last_start && text[c..c + needle.len()] == *needle {
                    return Some(c);
                }
            }
            if dist > 0 {
                let c = expected + dist;
                if c <= last_start && text[c..c + needle.len()] == *needle {
                    return Some(c);
                }
            }
            if dist >= expected && expected + dist > last_start {
                break;
            }
        }
    }

    if needle.len() > FUZZY_MAX_LEN {
        return None;
    }

    // Imperfect match: score every candidate start in the window.
    let lo = expected.saturating_sub(MATCH_DISTANCE);
    let hi = (expected + MATCH_DISTANCE).min(text.len().saturating_sub(1));
    let mut best: Option<(f64, usize)> = None;
    for c in lo..=hi {
        let end = (c + needle.len()).min(text.len());
        let window = &text[c..end];
        if window.len() * 2 < needle.len() {
            continue;
        }
        let errors = edit_distance(needle, window);
        let err_ratio = errors as f64 / needle.len() as f64;
        if err_ratio > MATCH_THRESHOLD {
            continue;
        }
        let proximity = expected.abs_diff(c) as f64 / MATCH_DISTANCE as f64;
        let score = err_ratio + proximity * 0.1;
        if best.map_or(true, |(s, _)| score < s) {
            best = Some((score, c));
        }
    }
    best.map(|(_, c)| c)
}

/// Plain Levenshtein distance over char slices.
///
/// Needles here are bounded by `FUZZY_MAX_LEN`, so the quadratic cost is
/// capped.
fn edit_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            curr[j + 1] = sub.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Apply a hunk whose context matched only approximately.
///
/// Diffs the expected text against what was actually found, then walks
/// the hunk's operations through that mapping: equal spans are copied
/// from the found text (preserving its drift), deletes skip the mapped
/// span, inserts contribute their own text. Returns the rebuilt window,
/// or None if the found text is too different to trust.
fn apply_imperfect(hunk: &Hunk, needle: &[char], matched: &[char]) -> Option<Vec<char>> {
    let needle_s: String = needle.iter().collect();
    let matched_s: String = matched.iter().collect();
    let diffs = char_diff(&needle_s, &matched_s);

    let errors = levenshtein_of(&diffs);
    if errors as f64 / needle.len().max(1) as f64 > MATCH_THRESHOLD {
        return None;
    }

    let mut out: Vec<char> = Vec::with_capacity(matched.len());
    let mut pos = 0usize; // position in the hunk's source text
    for op in &hunk.ops {
        let len = op.char_len();
        match op {
            EditOp::Equal(_) => {
                let a = x_index(&diffs, pos).min(matched.len());
                let b = x_index(&diffs, pos + len).min(matched.len());
                out.extend_from_slice(&matched[a..b]);
                pos += len;
            }
            EditOp::Delete(_) => {
                pos += len;
            }
            EditOp::Insert(text) => {
                out.extend(text.chars());
            }
        }
    }
    Some(out)
}

/// Total edit weight of a diff: per change cluster, the larger of the
/// inserted and deleted char counts.
fn levenshtein_of(diffs: &[EditOp]) -> usize {
    let mut total = 0usize;
    let mut ins = 0usize;
    let mut del = 0usize;
    for op in diffs {
        match op {
            EditOp::Insert(_) => ins += op.char_len(),
            EditOp::Delete(_) => del += op.char_len(),
            EditOp::Equal(_) => {
                total += ins.max(del);
                ins = 0;
                del = 0;
            }
        }
    }
    total + ins.max(del)
}

/// Map a position in the diff's left-hand text to the corresponding
/// position in its right-hand text.
fn x_index(diffs: &[EditOp], pos: usize) -> usize {
    let mut chars1 = 0usize;
    let mut chars2 = 0usize;
    let mut last1 = 0usize;
    let mut last2 = 0usize;
    for op in diffs {
        let len = op.char_len();
        if !matches!(op, EditOp::Insert(_)) {
            chars1 += len;
        }
        if !matches!(op, EditOp::Delete(_)) {
            chars2 += len;
        }
        if chars1 > pos {
            return if matches!(op, EditOp::Delete(_)) {
                last2
            } else {
                last2 + (pos - last1)
            };
        }
        last1 = chars1;
        last2 = chars2;
    }
    last2 + pos.saturating_sub(last1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(a: &str, b: &str) {
        let patches = compute_diff(a, b);
        let outcome = apply_patch(&patches, a);
        assert_eq!(outcome.text, b, "round trip {a:?} -> {b:?}");
        assert!(outcome.is_clean(), "round trip should apply clean");
    }

    #[test]
    fn test_round_trip_simple() {
        round_trip("Hello world", "Hello brave world");
    }

    #[test]
    fn test_round_trip_empty_source() {
        round_trip("", "brand new note\nwith two lines\n");
    }

    #[test]
    fn test_round_trip_empty_target() {
        round_trip("delete everything", "");
    }

    #[test]
    fn test_round_trip_multiple_hunks() {
        let a = "# Title\n\nFirst paragraph stays.\n\nSecond paragraph changes here.\n\nThird paragraph stays put too.\n\nFourth one gets an edit as well.\n";
        let b = "# Title!\n\nFirst paragraph stays.\n\nSecond paragraph was rewritten.\n\nThird paragraph stays put too.\n\nFourth one got an edit as well.\n";
        round_trip(a, b);

        let patches = compute_diff(a, b);
        assert!(patches.len() > 1, "expected several hunks");
    }

    #[test]
    fn test_round_trip_unicode() {
        round_trip("héllo wörld ✨", "héllo brave wörld ✨🎉");
    }

    #[test]
    fn test_identical_content_yields_empty_patch() {
        let patches = compute_diff("same text", "same text");
        assert!(patches.is_empty());

        let outcome = apply_patch(&patches, "same text");
        assert_eq!(outcome.text, "same text");
        assert!(outcome.is_clean());
        assert!(outcome.hunks.is_empty());
    }

    #[test]
    fn test_determinism() {
        let a = "one two three four five";
        let b = "one 2 three 4 five";
        assert_eq!(compute_diff(a, b), compute_diff(a, b));
    }

    #[test]
    fn test_patch_set_serialization() {
        let patches = compute_diff("Hello world", "Hello brave world");
        let json = serde_json::to_string(&patches).unwrap();
        let back: PatchSet = serde_json::from_str(&json).unwrap();
        assert_eq!(patches, back);

        let outcome = apply_patch(&back, "Hello world");
        assert_eq!(outcome.text, "Hello brave world");
    }

    #[test]
    fn test_fuzzy_apply_shifted_base() {
        // Base drifted by an insertion before the edited region: the hunk
        // is found at a shifted offset and the drift is preserved.
        let a = "alpha\nbravo\ncharlie\ndelta\necho\nfoxtrot\n";
        let b = "alpha\nbravo\ncharlie\ndelta\necho\nFOXTROT\n";
        let patches = compute_diff(a, b);

        let drifted = "NEW FIRST LINE\nalpha\nbravo\ncharlie\ndelta\necho\nfoxtrot\n";
        let outcome = apply_patch(&patches, drifted);
        assert!(outcome.fully_applied());
        assert_eq!(
            outcome.text,
            "NEW FIRST LINE\nalpha\nbravo\ncharlie\ndelta\necho\nFOXTROT\n"
        );
    }

    #[test]
    fn test_fuzzy_apply_perturbed_context() {
        // A context char inside the hunk changed (trailing whitespace):
        // the hunk applies fuzzily and the perturbation survives.
        let a = "line one\nline two\nline three\n";
        let b = "line one\nline 2\nline three\n";
        let patches = compute_diff(a, b);

        let perturbed = "line one \nline two\nline three\n";
        let outcome = apply_patch(&patches, perturbed);
        assert!(outcome.fully_applied(), "hunks: {:?}", outcome.hunks);
        assert!(!outcome.is_clean());
        assert!(outcome.text.contains("line 2"));
        assert!(
            outcome.text.starts_with("line one \n"),
            "perturbation lost: {:?}",
            outcome.text
        );
    }

    #[test]
    fn test_hard_failure_on_unrelated_base() {
        let a = "The quick brown fox jumps over the lazy dog";
        let b = "The quick brown cat jumps over the lazy dog";
        let patches = compute_diff(a, b);

        let unrelated = "1234567890!@#$%^&*()_+=-[]{};:0987654321";
        let outcome = apply_patch(&patches, unrelated);
        assert!(!outcome.fully_applied());
        assert_eq!(outcome.failed_hunks(), vec![0]);
        // Base must come through untouched.
        assert_eq!(outcome.text, unrelated);
    }

    #[test]
    fn test_concurrent_drift_outside_hunk() {
        // Server grew "!!" after the client's baseline; the insertion of
        // "brave " still lands and the "!!" is kept.
        let patches = compute_diff("Hello world", "Hello brave world");
        let outcome = apply_patch(&patches, "Hello world!!");
        assert!(outcome.fully_applied());
        assert_eq!(outcome.text, "Hello brave world!!");
    }

    #[test]
    fn test_large_document_round_trip() {
        let mut a = String::new();
        for i in 0..2000 {
            a.push_str(&format!("paragraph {i} with some filler text\n"));
        }
        let b = a.replace("paragraph 1500 with", "paragraph 1500 had");
        round_trip(&a, &b);
    }

    #[test]
    fn test_edit_distance() {
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(edit_distance(&a, &b), 3);
        assert_eq!(edit_distance(&a, &a), 0);
        assert_eq!(edit_distance(&a, &[]), 6);
    }

    #[test]
    fn test_hunk_source_and_target_text() {
        let patches = compute_diff("Hello world", "Hello brave world");
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].source_text(), "Hello world");
        assert_eq!(patches[0].target_text(), "Hello brave world");
    }
}
