//! Choosing one page text from several OCR candidates.

use std::collections::HashSet;

/// When the merged text is more than this many times longer than the best
/// single candidate, we prefer the merge.
pub const MERGE_LENGTH_RATIO: f64 = 1.2;

/// Select the consensus text for a page from the candidate texts of its passes.
///
/// The best single candidate is the longest one, measured in characters. The
/// merged candidate is every distinct non-empty line (trimmed) in first-seen
/// order. We return the merge if it is substantially longer than the best
/// single candidate, because then the passes found lines that no single pass
/// found alone. Otherwise we return the best candidate unchanged, since it
/// keeps the engine's own layout.
///
/// Returns an empty string if there are no candidates.
pub fn select(candidates: &[String]) -> String {
    // `max_by_key` keeps the last maximum, and we want the first.
    let Some(best) = candidates.iter().fold(None::<&String>, |best, candidate| {
        match best {
            Some(best) if char_len(best) >= char_len(candidate) => Some(best),
            _ => Some(candidate),
        }
    }) else {
        return String::new();
    };

    let merged = merge_lines(candidates);
    if char_len(&merged) as f64 > MERGE_LENGTH_RATIO * char_len(best) as f64 {
        merged
    } else {
        best.clone()
    }
}

/// Combine the distinct trimmed lines of all candidates, in first-seen order.
fn merge_lines(candidates: &[String]) -> String {
    let mut seen = HashSet::new();
    let mut lines = vec![];
    for line in candidates.iter().flat_map(|c| c.lines()).map(str::trim) {
        if !line.is_empty() && seen.insert(line) {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn no_candidates_gives_empty_text() {
        assert_eq!(select(&[]), "");
    }

    #[test]
    fn single_candidate_is_returned_unchanged() {
        let text = "  first line\n\nsecond line  ";
        assert_eq!(select(&strings(&[text])), text);
    }

    #[test]
    fn complementary_candidates_are_merged() {
        let candidates = strings(&["AB\nCD", "CD\nEF"]);
        assert_eq!(select(&candidates), "AB\nCD\nEF");
    }

    #[test]
    fn extra_lines_win_when_substantially_longer() {
        // "hello world\nhello" is 17 chars, more than 1.2 * 11.
        let candidates = strings(&["hello world", "hello"]);
        assert_eq!(select(&candidates), "hello world\nhello");
    }

    #[test]
    fn identical_candidates_give_the_best_text() {
        let candidates = strings(&["same text", "same text", "same text"]);
        assert_eq!(select(&candidates), "same text");
    }

    #[test]
    fn small_additions_keep_the_best_candidate() {
        let candidates = strings(&["a long line of recognized text", "x"]);
        assert_eq!(select(&candidates), "a long line of recognized text");
    }

    #[test]
    fn ties_go_to_the_earliest_candidate() {
        let candidates = strings(&["abc", "xyz"]);
        // The merge "abc\nxyz" is 7 chars, more than 1.2 * 3, so merge.
        assert_eq!(select(&candidates), "abc\nxyz");

        let candidates = strings(&["abcd\n", "abcd "]);
        // Both contain one line, "abcd", so the merge is short.
        assert_eq!(select(&candidates), "abcd\n");
    }

    #[test]
    fn length_is_measured_in_characters() {
        // Arabic letters are 2 bytes each in UTF-8.
        assert_eq!(char_len("مرحبا"), 5);
        // The best candidate is "hello!", and 12 characters is more than 1.2 * 6.
        let candidates = strings(&["hello!", "مرحبا"]);
        assert_eq!(select(&candidates), "hello!\nمرحبا");
    }
}
