//! Bucket/object name rules and admin query value parsing.

use crate::{QuorioError, Result};
use std::time::Duration;

/// Reserved bucket holding cluster-internal resources such as the
/// configuration document. Never valid as a user bucket name.
pub const RESERVED_BUCKET: &str = ".quorio.sys";

const MAX_OBJECT_NAME_LEN: usize = 1024;

pub fn is_valid_bucket_name(bucket: &str) -> bool {
    let len = bucket.len();
    if !(3..=63).contains(&len) {
        return false;
    }

    let bytes = bucket.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[len - 1]) {
        return false;
    }

    if bucket.contains("..") || bucket.contains(".-") || bucket.contains("-.") {
        return false;
    }

    if bucket.split('.').count() == 4 && bucket.split('.').all(|part| part.parse::<u8>().is_ok())
    {
        return false;
    }

    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
}

/// An empty prefix is valid and matches everything.
pub fn is_valid_object_prefix(prefix: &str) -> bool {
    if prefix.len() > MAX_OBJECT_NAME_LEN {
        return false;
    }
    if prefix.starts_with('/') || prefix.contains("//") || prefix.contains('\0') {
        return false;
    }

    prefix
        .split('/')
        .all(|component| component != "." && component != "..")
}

pub fn is_valid_object_name(object: &str) -> bool {
    !object.is_empty() && !object.ends_with('/') && is_valid_object_prefix(object)
}

pub fn check_bucket_name(bucket: &str) -> Result<()> {
    if !is_valid_bucket_name(bucket) {
        return Err(QuorioError::InvalidBucketName(bucket.to_string()));
    }
    Ok(())
}

pub fn check_bucket_and_object_names(bucket: &str, object: &str) -> Result<()> {
    check_bucket_name(bucket)?;
    if !is_valid_object_name(object) {
        return Err(QuorioError::InvalidObjectName(object.to_string()));
    }
    Ok(())
}

/// Parses a duration string such as `0s`, `90s`, `1h30m`, `1.5h` or `250ms`.
///
/// An empty string is treated as `0s` so that an absent filter matches every
/// lock regardless of how long it has been held.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || QuorioError::InvalidDuration(input.to_string());

    let s = input.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(invalid());
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Default page size for heal listings when `max-key` is omitted.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Parses the `max-key` query value. Absent means [`DEFAULT_MAX_KEYS`];
/// anything that is not a non-negative integer is rejected.
pub fn parse_max_keys(raw: Option<&str>) -> Result<usize> {
    match raw {
        None => Ok(DEFAULT_MAX_KEYS),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|keys| *keys >= 0)
            .map(|keys| keys as usize)
            .ok_or_else(|| QuorioError::InvalidMaxKeys(value.to_string())),
    }
}

/// Listing argument rules shared by every heal listing.
pub fn validate_list_objects_args(prefix: &str, marker: &str, delimiter: &str) -> Result<()> {
    if !delimiter.is_empty() && delimiter != "/" {
        return Err(QuorioError::NotImplemented(format!(
            "delimiter {:?} is not supported",
            delimiter
        )));
    }

    if !marker.is_empty() && !marker.starts_with(prefix) {
        return Err(QuorioError::InvalidArgument(format!(
            "marker {:?} is not under prefix {:?}",
            marker, prefix
        )));
    }

    Ok(())
}
