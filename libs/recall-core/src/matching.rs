//! Answer matching for typed mode study sessions.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::MatchingMode;

/// Result of comparing a typed answer to the correct answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Whether the answer is considered correct.
    pub is_correct: bool,
    /// Levenshtein similarity of the normalized strings, 0.0 to 1.0.
    pub similarity: f64,
    /// The matching mode used.
    pub matching_mode: MatchingMode,
    /// Normalized typed answer (for display).
    pub typed_normalized: String,
    /// Normalized correct answer (for display).
    pub correct_normalized: String,
    /// Token alignment of the normalized strings.
    pub diff: Vec<DiffSegment>,
}

/// Compare a typed answer to the correct answer.
///
/// The threshold only matters in fuzzy mode and must lie in `[0, 1]` there.
pub fn compare(
    typed: &str,
    correct: &str,
    mode: MatchingMode,
    fuzzy_threshold: f64,
) -> Result<MatchResult, ValidationError> {
    if mode == MatchingMode::Fuzzy && !(0.0..=1.0).contains(&fuzzy_threshold) {
        return Err(ValidationError::InvalidThreshold(fuzzy_threshold));
    }

    let typed_normalized = normalize(typed, mode);
    let correct_normalized = normalize(correct, mode);
    let similarity = normalized_similarity(&typed_normalized, &correct_normalized);

    let is_correct = match mode {
        MatchingMode::Exact | MatchingMode::CaseInsensitive => {
            typed_normalized == correct_normalized
        }
        MatchingMode::Fuzzy => similarity >= fuzzy_threshold,
    };

    let diff = diff(&typed_normalized, &correct_normalized);

    Ok(MatchResult {
        is_correct,
        similarity,
        matching_mode: mode,
        typed_normalized,
        correct_normalized,
        diff,
    })
}

/// Trim, and lowercase for every mode except exact.
fn normalize(s: &str, mode: MatchingMode) -> String {
    let trimmed = s.trim();
    match mode {
        MatchingMode::Exact => trimmed.to_string(),
        MatchingMode::CaseInsensitive | MatchingMode::Fuzzy => trimmed.to_lowercase(),
    }
}

/// Calculate Levenshtein distance between two strings, in chars.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Two rows instead of the full matrix
    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;

        for j in 1..=n {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);

            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Similarity in `[0, 1]`: 1 - distance / max(len). Two empty strings are
/// identical.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = levenshtein_distance(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Segment tag in a typed-vs-correct diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Text is the same in both strings.
    Same,
    /// Text only in the typed answer.
    Added,
    /// Text only in the correct answer.
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSegment {
    pub text: String,
    pub diff_type: DiffType,
}

impl DiffSegment {
    fn new(text: &str, diff_type: DiffType) -> Self {
        Self {
            text: text.to_string(),
            diff_type,
        }
    }
}

/// Token-level diff between typed and correct answers.
///
/// Tokens are maximal runs of whitespace or non-whitespace, so every byte of
/// both inputs lands in exactly one segment. Concatenating `Same` + `Added`
/// gives back `typed`; `Same` + `Removed` gives back `correct`.
pub fn diff(typed: &str, correct: &str) -> Vec<DiffSegment> {
    let a = tokenize(typed);
    let b = tokenize(correct);
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut segments: Vec<DiffSegment> = Vec::new();
    let mut push = |text: &str, diff_type: DiffType| match segments.last_mut() {
        Some(last) if last.diff_type == diff_type => last.text.push_str(text),
        _ => segments.push(DiffSegment::new(text, diff_type)),
    };

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            push(a[i], DiffType::Same);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            push(a[i], DiffType::Added);
            i += 1;
        } else {
            push(b[j], DiffType::Removed);
            j += 1;
        }
    }
    for &token in &a[i..] {
        push(token, DiffType::Added);
    }
    for &token in &b[j..] {
        push(token, DiffType::Removed);
    }

    segments
}

fn tokenize(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = None;

    for (idx, ch) in s.char_indices() {
        let is_space = ch.is_whitespace();
        match in_space {
            Some(prev) if prev != is_space => {
                tokens.push(&s[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(is_space);
    }
    if start < s.len() {
        tokens.push(&s[start..]);
    }
    tokens
}
