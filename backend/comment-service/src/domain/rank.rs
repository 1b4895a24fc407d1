//! Rank encoder for comment ordering
//!
//! Every comment stores a materialized path built from its ancestors' ids:
//!
//! ```text
//! 0000000000000000001                                          root #1
//! 0000000000000000001-0000000000000000003                      reply #3 to #1
//! 0000000000000000001-0000000000000000003-0000000000000000005  reply #5 to #3
//! 0000000000000000002                                          root #2
//! ```
//!
//! Sorting these strings bytewise yields the pre-order traversal of the tree
//! with siblings in creation order, so pagination becomes a single range scan.

/// Width of a zero-padded id segment (decimal digits of `i64::MAX`)
pub const SEGMENT_WIDTH: usize = 19;

/// Segment separator. Must sort below every decimal digit.
pub const SEPARATOR: char = '-';

/// Build the rank of a comment from its parent's rank (empty for a root) and
/// its own id.
///
/// Returns `None` for non-positive ids; the stores never assign those.
pub fn encode(parent_rank: &str, id: i64) -> Option<String> {
    if id <= 0 {
        return None;
    }

    let mut rank = String::with_capacity(parent_rank.len() + 1 + SEGMENT_WIDTH);
    if !parent_rank.is_empty() {
        rank.push_str(parent_rank);
        rank.push(SEPARATOR);
    }
    rank.push_str(&format!("{:0width$}", id, width = SEGMENT_WIDTH));
    Some(rank)
}

/// Nesting depth of a rank (0 for root comments)
pub fn depth(rank: &str) -> usize {
    rank.matches(SEPARATOR).count()
}
