//! Minimal insert/remove edit scripts between two strings.
//!
//! Edits reference indices into the string as it stands after all earlier
//! edits in the list, matching [`apply_text_edits`]. Near-equal inputs (the
//! common case for live text: a headline re-render, characters appended to a
//! ticker) are handled in linear time by trimming the common prefix and
//! suffix; the divergent middle falls back to a full LCS alignment.

use domreel_protocol::TextEdit;

/// Above this many cells the LCS table is not worth its memory; the middle is
/// replaced wholesale instead. Still correct, no longer edit-minimal.
const MAX_LCS_CELLS: usize = 1 << 22;

/// Compute an edit script turning `a` into `b`.
pub fn string_diff(a: &str, b: &str) -> Vec<TextEdit> {
    if a == b {
        return Vec::new();
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    // Common prefix
    let mut prefix = 0;
    while prefix < a_chars.len() && prefix < b_chars.len() && a_chars[prefix] == b_chars[prefix] {
        prefix += 1;
    }
    // Common suffix (not overlapping the prefix)
    let mut suffix = 0;
    while suffix < a_chars.len() - prefix
        && suffix < b_chars.len() - prefix
        && a_chars[a_chars.len() - 1 - suffix] == b_chars[b_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let a_mid = &a_chars[prefix..a_chars.len() - suffix];
    let b_mid = &b_chars[prefix..b_chars.len() - suffix];

    let mut edits = Vec::new();
    if a_mid.len() * b_mid.len() > MAX_LCS_CELLS {
        if !a_mid.is_empty() {
            edits.push(TextEdit::Remove {
                index: prefix as u32,
                count: a_mid.len() as u32,
            });
        }
        if !b_mid.is_empty() {
            edits.push(TextEdit::Insert {
                index: prefix as u32,
                content: b_mid.iter().collect(),
            });
        }
        return edits;
    }

    diff_middle(a_mid, b_mid, prefix, &mut edits);
    edits
}

/// LCS-align the divergent middles and emit coalesced range edits. `pos`
/// tracks the index into the current string as edits apply left-to-right.
fn diff_middle(a: &[char], b: &[char], start: usize, edits: &mut Vec<TextEdit>) {
    let n = a.len();
    let m = b.len();

    // lcs[i][j] = LCS length of a[i..], b[j..]
    let mut lcs = vec![0u32; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[idx(i, j)] = if a[i] == b[j] {
                lcs[idx(i + 1, j + 1)] + 1
            } else {
                lcs[idx(i + 1, j)].max(lcs[idx(i, j + 1)])
            };
        }
    }

    // Walk the alignment. Removals win ties so each divergence emits its
    // removal before its insertion, deterministically.
    #[derive(PartialEq, Clone, Copy)]
    enum Step {
        Match,
        Remove,
        Insert,
    }
    let mut steps = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            steps.push(Step::Match);
            i += 1;
            j += 1;
        } else if j >= m || (i < n && lcs[idx(i + 1, j)] >= lcs[idx(i, j + 1)]) {
            steps.push(Step::Remove);
            i += 1;
        } else {
            steps.push(Step::Insert);
            j += 1;
        }
    }

    // Coalesce runs into range edits. `pos` is the index into the current
    // string as the edits apply left-to-right.
    let mut pos = start;
    let mut bj = 0;
    let mut s = 0;
    while s < steps.len() {
        match steps[s] {
            Step::Match => {
                pos += 1;
                bj += 1;
                s += 1;
            }
            Step::Remove => {
                let mut count = 0u32;
                while s < steps.len() && steps[s] == Step::Remove {
                    count += 1;
                    s += 1;
                }
                edits.push(TextEdit::Remove {
                    index: pos as u32,
                    count,
                });
            }
            Step::Insert => {
                let run_start = bj;
                while s < steps.len() && steps[s] == Step::Insert {
                    bj += 1;
                    s += 1;
                }
                let content: String = b[run_start..bj].iter().collect();
                edits.push(TextEdit::Insert {
                    index: pos as u32,
                    content,
                });
                pos += bj - run_start;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domreel_protocol::apply_text_edits;

    fn check(a: &str, b: &str) -> Vec<TextEdit> {
        let edits = string_diff(a, b);
        assert_eq!(
            apply_text_edits(a, &edits),
            b,
            "diff of {a:?} -> {b:?} must apply back: {edits:?}"
        );
        edits
    }

    #[test]
    fn equal_strings_need_no_edits() {
        assert!(check("hello", "hello").is_empty());
        assert!(check("", "").is_empty());
    }

    #[test]
    fn appends_and_prepends_are_single_inserts() {
        let edits = check("live scores", "live scores: 2-1");
        assert_eq!(edits.len(), 1);
        let edits = check("scores", "live scores");
        assert_eq!(edits.len(), 1);
    }

    #[test]
    fn single_char_runs_are_coalesced_into_ranges() {
        let edits = check("aaaa", "aabbbbaa");
        assert_eq!(
            edits,
            vec![TextEdit::Insert {
                index: 2,
                content: "bbbb".to_string()
            }]
        );
        let edits = check("aabbbbaa", "aaaa");
        assert_eq!(edits, vec![TextEdit::Remove { index: 2, count: 4 }]);
    }

    #[test]
    fn middle_replacement() {
        let edits = check("breaking: rain expected", "breaking: sun expected");
        assert!(edits.len() <= 2, "{edits:?}");
    }

    #[test]
    fn total_divergence() {
        check("", "something");
        check("something", "");
        check("abcdef", "xyz");
    }

    #[test]
    fn multibyte_content() {
        check("héllo wörld", "héllo, wörld!");
        check("日本語", "日本語のテキスト");
    }

    #[test]
    fn interleaved_changes_apply_in_order() {
        check("the quick brown fox", "the slow brown wolf");
        check("abcabcabc", "abcxabcyabcz");
    }
}
