//! Resource quantity arithmetic
//!
//! `k8s-openapi` models quantities as opaque strings. Synthetic nodes need a
//! little arithmetic on them (allocatable memory is capacity minus a fixed
//! reservation), so this module parses the Kubernetes quantity grammar into
//! integer base units and formats results back.
//!
//! Fractions are evaluated exactly and rounded up, which matches how the API
//! server canonicalises quantities such as `1.65Gi`. Negative quantities are
//! rejected; nothing on a node template can be negative.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, u32); 6] = [
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Parse a quantity into integer base units (bytes for memory), rounding up
///
/// Accepts plain numbers (`"1024"`, `"0.5"`), binary suffixes (`Ki`..`Ei`),
/// decimal suffixes (`k`..`E`), milli units (`"100m"`) and decimal exponents
/// (`"1e3"`, `"8E9"`, `"5e-1"`).
pub fn parse_quantity(value: &str) -> Result<i128> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(value, "empty quantity"));
    }

    let (number, mut numerator, mut denominator) = match split_exponent(value) {
        Some((number, exp)) => {
            let factor = 10i128
                .checked_pow(exp.unsigned_abs())
                .ok_or_else(|| invalid(value, "exponent out of range"))?;
            if exp >= 0 {
                (number, factor, 1)
            } else {
                (number, 1, factor)
            }
        }
        None => split_suffix(value),
    };
    let (mantissa, scale) = parse_decimal(number).ok_or_else(|| invalid(value, "not a number"))?;

    numerator = mantissa
        .checked_mul(numerator)
        .ok_or_else(|| invalid(value, "overflow"))?;
    denominator = 10i128
        .checked_pow(scale)
        .and_then(|d| denominator.checked_mul(d))
        .ok_or_else(|| invalid(value, "too many fractional digits"))?;

    Ok(div_ceil(numerator, denominator))
}

/// Format base units as the shortest exact binary-suffixed quantity
///
/// `8589934592` becomes `8Gi`; values that are not a whole number of KiB stay
/// as plain integers.
pub fn format_binary(value: i128) -> Quantity {
    if value != 0 {
        for (suffix, shift) in BINARY_SUFFIXES.iter().rev() {
            let unit = 1i128 << shift;
            if value % unit == 0 {
                return Quantity(format!("{}{}", value / unit, suffix));
            }
        }
    }
    Quantity(value.to_string())
}

/// Subtract `reserved` from `total`, failing if the result would be negative
pub fn subtract(total: &Quantity, reserved: &str) -> Result<Quantity> {
    let total_units = parse_quantity(&total.0)?;
    let reserved_units = parse_quantity(reserved)?;

    if total_units < reserved_units {
        return Err(Error::internal_with_context(
            "quantity",
            format!(
                "quantity {} is smaller than the reservation {}",
                total.0, reserved
            ),
        ));
    }

    Ok(format_binary(total_units - reserved_units))
}

/// Split `"<number>e<int>"` / `"<number>E<int>"` into the number and exponent
///
/// A bare trailing `E` is the exa suffix, not an exponent.
fn split_exponent(value: &str) -> Option<(&str, i32)> {
    let idx = value.rfind(['e', 'E'])?;
    let (number, exp) = (&value[..idx], &value[idx + 1..]);
    let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
    if number.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((number, exp.parse().ok()?))
}

/// Split a quantity into its numeric part and the suffix multiplier as a fraction
fn split_suffix(value: &str) -> (&str, i128, i128) {
    for (suffix, shift) in BINARY_SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return (number, 1i128 << shift, 1);
        }
    }
    if let Some(number) = value.strip_suffix('m') {
        return (number, 1, 1000);
    }
    for (suffix, exp) in DECIMAL_SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            return (number, 10i128.pow(exp), 1);
        }
    }
    (value, 1, 1)
}

/// Parse `"12.345"` into `(12345, 3)`
fn parse_decimal(number: &str) -> Option<(i128, u32)> {
    let number = number.strip_prefix('+').unwrap_or(number);
    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", whole, fraction);
    let mantissa = digits.parse::<i128>().ok()?;
    Some((mantissa, u32::try_from(fraction.len()).ok()?))
}

fn div_ceil(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator == 0 {
        quotient
    } else {
        quotient + 1
    }
}

fn invalid(value: &str, reason: &str) -> Error {
    Error::internal_with_context(
        "quantity",
        format!("invalid quantity {:?}: {}", value, reason),
    )
}
