/// Maps a result identifier onto one of `max_index` result chunks.
///
/// This must agree bit-for-bit with the hash the dump producer used when it
/// sharded the result table: a 32-bit wrapping `h * 31 + c` accumulation over
/// the identifier's characters, made non-negative, modulo the chunk count.
pub fn hash_key(id: &str, max_index: usize) -> usize {
    let mut hash: i32 = 0;
    for ch in id.chars() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(ch as i32);
    }
    (hash.unsigned_abs() as usize) % max_index.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_values() {
        assert_eq!(hash_key("a", 10), 7);
        assert_eq!(hash_key("ab", 10), 5);
        assert_eq!(hash_key("", 10), 0);
    }

    #[test]
    fn stays_in_bounds_for_long_ids() {
        for id in ["result:1234567890", "🦀🦀🦀", "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"] {
            for n in [1, 2, 7, 64] {
                assert!(hash_key(id, n) < n);
                assert_eq!(hash_key(id, n), hash_key(id, n));
            }
        }
    }
}
