//! Turning raw recognizer output into one plate string.

use common::plates::TextCandidate;

/// Shortest cleaned text accepted as a plate
pub const MIN_PLATE_LEN: usize = 4;

/// Longest cleaned text accepted as a plate
pub const MAX_PLATE_LEN: usize = 10;

/// Uppercase and keep only `A-Z` and `0-9`
pub fn clean_plate_text(raw: &str) -> String {
    raw.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Pick the plate string among the recognizer's candidates.
///
/// Candidates whose cleaned text has a plausible plate length win, highest
/// confidence first. When none qualifies, the highest-confidence raw
/// candidate is returned uppercased and trimmed, possibly empty. Ties go to
/// the earlier candidate. Confidence is passed through unchanged.
pub fn select_plate_candidate(candidates: &[TextCandidate]) -> Option<(String, f32)> {
    let plausible = candidates
        .iter()
        .map(|c| (clean_plate_text(&c.text), c.confidence))
        .filter(|(text, _)| (MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&text.len()));

    if let Some(best) = first_max_by_confidence(plausible) {
        return Some(best);
    }

    first_max_by_confidence(
        candidates
            .iter()
            .map(|c| (c.text.to_uppercase().trim().to_string(), c.confidence)),
    )
}

fn first_max_by_confidence(items: impl Iterator<Item = (String, f32)>) -> Option<(String, f32)> {
    items.fold(None, |best, item| match best {
        Some(current) if current.1 >= item.1 => Some(current),
        _ => Some(item),
    })
}
