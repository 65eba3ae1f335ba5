use serde::{Deserialize, Serialize};

/// A git worktree created and managed by the server.
///
/// `index_number` is the smallest positive integer not currently assigned
/// to any live worktree of the same repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub id: String,
    pub repository_id: String,
    /// Absolute path under the managed worktree root. Unique across rows.
    pub path: String,
    pub index_number: i64,
    pub created_at: String,
}

/// Allocate the smallest unused positive index from a set of taken indices.
pub fn smallest_free_index(taken: &[i64]) -> i64 {
    let mut n = 1;
    while taken.contains(&n) {
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_free_index_empty() {
        assert_eq!(smallest_free_index(&[]), 1);
    }

    #[test]
    fn test_smallest_free_index_fills_gap() {
        assert_eq!(smallest_free_index(&[1, 2, 4]), 3);
    }

    #[test]
    fn test_smallest_free_index_appends() {
        assert_eq!(smallest_free_index(&[1, 2, 3]), 4);
    }

    #[test]
    fn test_smallest_free_index_ignores_order() {
        assert_eq!(smallest_free_index(&[3, 1]), 2);
    }
}
