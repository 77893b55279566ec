//! Shared utility functions for the stagehand crate.

use uuid::Uuid;

/// Generate a short 8-character workflow identifier.
pub fn make_wid() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Truncate a string with ellipsis, breaking at a newline or space near the
/// limit when one is close enough.
pub fn truncate_output(s: &str, max_len: usize) -> String {
    const SUFFIX: &str = "... (truncated)";
    if s.len() <= max_len {
        return s.to_string();
    }

    let cut = max_len.saturating_sub(SUFFIX.len()).max(1);
    let cut = floor_char_boundary(s, cut);
    let head = &s[..cut];

    // Prefer a clean break within the last stretch before the cut.
    let window_start = floor_char_boundary(head, cut.saturating_sub(50));
    let break_at = head[window_start..]
        .rfind('\n')
        .or_else(|| head[window_start..].rfind(' '))
        .map(|i| window_start + i);

    match break_at {
        Some(i) if i > 0 => format!("{}{}", &head[..i], SUFFIX),
        _ => format!("{}{}", head, SUFFIX),
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
