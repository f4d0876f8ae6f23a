//! Run-id formatting and path normalisation — pure functions, no IO.
//!
//! Sequenced run-id allocation (`RUN{N}`) requires an atomic
//! read-increment-write against the checkpoint store and therefore lives in
//! `conveyor-store::StartNewRun`; this module only owns the id *shape* and
//! the skip-id derivation, which needs no store access.

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;

/// Format a sequenced run id from its allocated number.
pub fn format_run_id(n: i64) -> String {
    format!("RUN{n}")
}

/// `SKIP-YYYYMMDD-HHMMSS-xx` — issued when a run is allocated but performs
/// no persisted work, so as not to steal a sequenced id (spec.md §4.3).
/// `xx` is two random base-36 characters; `rand_u8` supplies the entropy so
/// callers can pass a deterministic source in tests.
pub fn derive_skip_id(at: DateTime<Utc>, rand_u8: u8) -> String {
    let ist = at.with_timezone(&Kolkata);
    let suffix = base36_pair(rand_u8);
    format!("SKIP-{}-{}", ist.format("%Y%m%d-%H%M%S"), suffix)
}

/// A byte of low-stakes entropy for the skip id's random suffix, taken from
/// the current instant's sub-second jitter. Skip ids only need to avoid
/// colliding with another skip id issued in the same IST second — not
/// resist prediction — so this stays in `std::time` rather than pulling in
/// a `rand` dependency the pack never uses.
pub fn entropy_byte() -> u8 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 256) as u8
}

fn base36_pair(byte: u8) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let hi = (byte >> 4) % 36;
    let lo = byte % 36;
    format!(
        "{}{}",
        ALPHABET[hi as usize] as char,
        ALPHABET[lo as usize] as char
    )
}

/// Normalise a relative path: backslashes → forward slashes, leading
/// slashes stripped (spec.md §4.1). Idempotent.
pub fn normalize_relative_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    slashed.trim_start_matches('/').to_string()
}
