use chrono::Local;
use rand::Rng;

/// Local timestamp in `YYYY-MM-DDTHH:MM:SS` form, the format session files
/// and consolidation headers use.
pub fn now_iso8601() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Short opaque identifier (lowercase alphanumeric), used for cron job ids
/// and synthesized tool-call ids.
pub fn random_id(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Trim ASCII whitespace from both ends.
pub fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n')
}
