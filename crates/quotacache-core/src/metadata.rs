//! Request metadata understood by the cache service.
//!
//! - `dry-run`: when set to [`DRY_RUN_MARKER`], `Store` validates the request
//!   without mutating the cache.
//! - `grpc-timeout`: the caller's remaining time budget, set by tonic from
//!   [`tonic::Request::set_timeout`]. The server reads it back to bound the
//!   calls it makes on the caller's behalf.

use core::time::Duration;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

pub const DRY_RUN_KEY: &str = "dry-run";

/// The only value of [`DRY_RUN_KEY`] that enables dry-run mode.
pub const DRY_RUN_MARKER: &str = "1";

pub const GRPC_TIMEOUT_KEY: &str = "grpc-timeout";

/// Returns `true` if the request asks for a dry run.
///
/// Absence, non-ASCII values and anything but the literal marker all mean a
/// regular run.
pub fn is_dry_run(metadata: &MetadataMap) -> bool {
    metadata
        .get(DRY_RUN_KEY)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == DRY_RUN_MARKER)
}

pub fn set_dry_run(metadata: &mut MetadataMap) {
    metadata.insert(DRY_RUN_KEY, AsciiMetadataValue::from_static(DRY_RUN_MARKER));
}

/// Parses the `grpc-timeout` entry (`<up to 8 digits><unit>`), if present and
/// well formed.
pub fn timeout(metadata: &MetadataMap) -> Option<Duration> {
    let raw = metadata.get(GRPC_TIMEOUT_KEY)?.to_str().ok()?;
    if raw.len() < 2 || raw.len() > 9 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(value.checked_mul(60 * 60)?),
        "M" => Duration::from_secs(value.checked_mul(60)?),
        "S" => Duration::from_secs(value),
        "m" => Duration::from_millis(value),
        "u" => Duration::from_micros(value),
        "n" => Duration::from_nanos(value),
        _ => return None,
    };
    Some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(key: &'static str, value: &'static str) -> MetadataMap {
        let mut md = MetadataMap::new();
        md.insert(key, AsciiMetadataValue::from_static(value));
        md
    }

    #[test]
    fn dry_run_requires_the_exact_marker() {
        assert!(!is_dry_run(&MetadataMap::new()));
        assert!(!is_dry_run(&with(DRY_RUN_KEY, "true")));
        assert!(!is_dry_run(&with(DRY_RUN_KEY, "0")));
        assert!(is_dry_run(&with(DRY_RUN_KEY, "1")));

        let mut md = MetadataMap::new();
        set_dry_run(&mut md);
        assert!(is_dry_run(&md));
    }

    #[test]
    fn parses_every_timeout_unit() {
        let cases = [
            ("2H", Duration::from_secs(7200)),
            ("3M", Duration::from_secs(180)),
            ("4S", Duration::from_secs(4)),
            ("100m", Duration::from_millis(100)),
            ("250u", Duration::from_micros(250)),
            ("99999999n", Duration::from_nanos(99_999_999)),
        ];
        for (raw, expected) in cases {
            assert_eq!(timeout(&with(GRPC_TIMEOUT_KEY, raw)), Some(expected), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_timeouts() {
        for raw in ["", "m", "10", "10x", "-1m", "123456789m", "1.5S"] {
            assert_eq!(timeout(&with(GRPC_TIMEOUT_KEY, raw)), None, "{raw:?}");
        }
        assert_eq!(timeout(&MetadataMap::new()), None);
    }
}
