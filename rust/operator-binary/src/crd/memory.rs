//! Conversion of JVM style memory strings (`512m`, `2g`, `1Gi`) into mebibytes.

use snafu::{ResultExt, Snafu, ensure};

/// Recognised unit suffixes and their size in MiB.
///
/// Matching is done top to bottom against the end of the upper-cased input, so two letter
/// suffixes have to come before the single letter ones they end with.
const UNITS: [(&str, f64); 12] = [
    ("KB", 1.0 / 1024.0),
    ("MB", 1.0),
    ("GB", 1024.0),
    ("TB", 1024.0 * 1024.0),
    ("KI", 1.0 / 1024.0),
    ("MI", 1.0),
    ("GI", 1024.0),
    ("TI", 1024.0 * 1024.0),
    ("K", 1.0 / 1024.0),
    ("M", 1.0),
    ("G", 1024.0),
    ("T", 1024.0 * 1024.0),
];

#[derive(Snafu, Debug, PartialEq)]
pub enum Error {
    #[snafu(display("malformed memory quantity {quantity:?}"))]
    MalformedQuantity {
        source: std::num::ParseFloatError,
        quantity: String,
    },

    #[snafu(display("memory quantity {quantity:?} is negative or too large"))]
    OutOfRange { quantity: String },
}

/// Converts a memory quantity into whole MiB, rounding down.
///
/// A value without unit is already taken to be in MiB.
pub fn to_mib(quantity: &str) -> Result<u64, Error> {
    let normalized = quantity.trim().to_uppercase();
    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(unit, multiplier)| {
            normalized
                .strip_suffix(unit)
                .map(|number| (number, *multiplier))
        })
        .unwrap_or((normalized.as_str(), 1.0));

    let value = number
        .trim()
        .parse::<f64>()
        .with_context(|_| MalformedQuantitySnafu { quantity })?;
    let mib = (value * multiplier).floor();
    ensure!(
        mib.is_finite() && mib >= 0.0 && mib < u64::MAX as f64,
        OutOfRangeSnafu { quantity }
    );

    Ok(mib as u64)
}
