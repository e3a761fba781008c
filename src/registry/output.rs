//! Size guard applied to every gadget result handed back to a caller.

use crate::config::MAX_RESULT_LEN;

const ELLIPSIS: &str = "…";

const TRUNCATION_NOTE: &str = "The output was truncated because it exceeded the maximum size. \
Use more specific parameters (for example a namespace, pod or filter) to narrow the results.";

/// Wrap raw gadget output in `<results>` tags, truncating above the result ceiling.
///
/// Truncation cuts at the last UTF-8 boundary at or below the ceiling, so the
/// embedded content is at most [`MAX_RESULT_LEN`] bytes plus the ellipsis.
pub fn wrap_results(raw: &str) -> String {
    wrap_with_limit(raw, MAX_RESULT_LEN)
}

fn wrap_with_limit(raw: &str, limit: usize) -> String {
    if raw.len() <= limit {
        return format!("<results>{raw}</results>");
    }

    let mut end = limit;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "<results truncated=\"true\">{}{ELLIPSIS}</results>\n{TRUNCATION_NOTE}",
        &raw[..end]
    )
}
