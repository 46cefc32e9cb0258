//! Identifier generation for the `generate` field directive.

use rand::rngs::OsRng;
use rand::RngCore;

// Crockford base-32 alphabet (excludes I, L, O, U).
const LETTERS: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// A random RFC-4122 v4 UUID string.
pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A 26-character ULID, lexicographically sortable by creation time.
pub fn ulid() -> String {
    rusty_ulid::generate_ulid_string()
}

/// A crypto-random Crockford base-32 string of the given length.
///
/// Sizes of 10 or more are suitably collision-resistant for entity ids.
pub fn uid(size: usize) -> String {
    let mut buf = vec![0u8; size];
    OsRng.fill_bytes(&mut buf);
    buf.iter()
        .map(|b| LETTERS[(b % 32) as usize] as char)
        .collect()
}

/// Resolve a `generate` directive: `uuid`, `ulid`, `uid` or `uid(N)`.
/// Unrecognised directives fall back to a UUID.
pub(crate) fn generate(spec: &str) -> String {
    match spec {
        "uuid" => uuid(),
        "ulid" => ulid(),
        "uid" => uid(10),
        other => {
            if let Some(n) = other
                .strip_prefix("uid(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.parse::<usize>().ok())
            {
                uid(n)
            } else {
                uuid()
            }
        }
    }
}
