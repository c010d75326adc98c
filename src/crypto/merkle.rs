//! Merkle root accumulation over hex digests
//!
//! Leaves are canonical hashes. Each parent is `hash(left + right)` where
//! `+` is string concatenation of the two hex digests. An odd level pairs
//! its last hash with itself. An empty tree has root `hash("")`.

use super::hash::hash;

/// Calculate the Merkle root of a list of hex digests
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return hash("");
    }

    let mut current_level: Vec<String> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for chunk in current_level.chunks(2) {
            let left = &chunk[0];
            let right = chunk.get(1).unwrap_or(left);
            next_level.push(combine(left, right));
        }

        current_level = next_level;
    }

    current_level.remove(0)
}

fn combine(left: &str, right: &str) -> String {
    let mut joined = String::with_capacity(left.len() + right.len());
    joined.push_str(left);
    joined.push_str(right);
    hash(joined.as_str())
}
