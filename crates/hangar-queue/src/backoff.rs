/// Base retry delay in milliseconds.
pub const BASE_MS: i64 = 1_000;
/// Retry delay ceiling in milliseconds (5 minutes).
pub const CAP_MS: i64 = 300_000;

/// Exponential backoff for the nth failed attempt (1-based):
/// `min(BASE * 2^(n-1), CAP)`.
pub fn backoff_ms(attempts: i64) -> i64 {
    let n = attempts.max(1);
    let exponent = (n - 1).min(62) as u32;
    match BASE_MS.checked_mul(1_i64 << exponent) {
        Some(delay) => delay.min(CAP_MS),
        None => CAP_MS,
    }
}
