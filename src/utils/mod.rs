//! Small shared helpers.
//!
//! Pure functions only. No side effects beyond filesystem reads.

pub mod path;

/// Format a count with a pluralized noun: `plural_count(3, "output")` -> `"3 outputs"`.
pub fn plural_count(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
