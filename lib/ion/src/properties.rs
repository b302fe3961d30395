use std::env;
use std::fmt;

pub type PropertyResult<T> = Result<T, PropertyError>;

#[derive(Debug, Eq, PartialEq)]
pub enum PropertyError {
    /// The value could not be parsed as a number with an optional suffix.
    Format(String),
    /// The value exceeds the 64 bit range once the suffix multiplier is applied.
    Overflow(String),
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PropertyError::Format(msg) => write!(f, "malformed property value: {}", msg),
            PropertyError::Overflow(msg) => write!(f, "property value out of range: {}", msg),
        }
    }
}

impl std::error::Error for PropertyError {}

/// Looks up a property in the environment. The dotted name is tried verbatim
/// first, then in its shell-safe form (dots to underscores, uppercased), so
/// `aeron.rcv.buffer.size` is also reachable as `AERON_RCV_BUFFER_SIZE`.
pub fn get_property(name: &str) -> Option<String> {
    env::var(name)
        .or_else(|_| env::var(name.replace('.', "_").to_uppercase()))
        .ok()
}

/// Resolves a size property, falling back to the supplied default when unset.
pub fn sized_property(name: &str, default: u64) -> PropertyResult<u64> {
    match get_property(name) {
        Some(value) => parse_size(name, &value),
        None => Ok(default),
    }
}

/// Resolves a duration property in nanoseconds, falling back to the supplied
/// default when unset.
pub fn duration_property(name: &str, default_ns: u64) -> PropertyResult<u64> {
    match get_property(name) {
        Some(value) => parse_duration(name, &value),
        None => Ok(default_ns),
    }
}

/// Parses a byte size with an optional 1024-based suffix: `k`/`K`, `m`/`M`
/// or `g`/`G`. Multiplied values that overflow the u64 range are an error.
pub fn parse_size(name: &str, value: &str) -> PropertyResult<u64> {
    let value = value.trim();

    if value.is_empty() {
        return Err(PropertyError::Format(format!("{}: empty size", name)));
    }

    let (digits, multiplier) = match value.as_bytes()[value.len() - 1] {
        b'k' | b'K' => (&value[..value.len() - 1], 1024),
        b'm' | b'M' => (&value[..value.len() - 1], 1024 * 1024),
        b'g' | b'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };

    let base: u64 = digits
        .parse()
        .map_err(|_| PropertyError::Format(format!("{}: {}", name, value)))?;

    base.checked_mul(multiplier)
        .ok_or_else(|| PropertyError::Overflow(format!("{}: {}", name, value)))
}

/// Parses a duration into nanoseconds with an optional case-insensitive
/// suffix: `ns`, `us`, `ms` or `s`. A bare number is taken as nanoseconds.
/// Size-style suffixes such as `g` are invalid for durations.
pub fn parse_duration(name: &str, value: &str) -> PropertyResult<u64> {
    let value = value.trim();

    if value.is_empty() {
        return Err(PropertyError::Format(format!("{}: empty duration", name)));
    }

    let lower = value.to_lowercase();

    let (digits, multiplier) = if lower.ends_with("ns") {
        (&value[..value.len() - 2], 1)
    } else if lower.ends_with("us") {
        (&value[..value.len() - 2], 1_000)
    } else if lower.ends_with("ms") {
        (&value[..value.len() - 2], 1_000_000)
    } else if lower.ends_with('s') {
        (&value[..value.len() - 1], 1_000_000_000)
    } else {
        (value, 1)
    };

    let base: u64 = digits
        .parse()
        .map_err(|_| PropertyError::Format(format!("{}: {}", name, value)))?;

    base.checked_mul(multiplier)
        .ok_or_else(|| PropertyError::Overflow(format!("{}: {}", name, value)))
}
