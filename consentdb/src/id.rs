use nanoid::nanoid;

/// Canonical alphabet for record identifiers (no ambiguous glyphs).
const ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
/// Length of the random part of an identifier.
const ID_LENGTH: usize = 20;

/// Generates `<prefix>_<random>`, or a bare random id when `prefix` is empty.
pub fn generate_id(prefix: &str) -> String {
    let random = nanoid!(ID_LENGTH, ID_ALPHABET);
    if prefix.is_empty() {
        random
    } else {
        format!("{prefix}_{random}")
    }
}
