//! Human-readable byte and duration strings used in reports and progress
//! notifications.

use std::time::Duration;

const UNIT_STEP: f64 = 1024.0;
const UNITS: [&str; 9] = ["", "k", "M", "G", "T", "P", "E", "Z", "Y"];

/// Formats a byte count the way package tools print sizes: `512`, `1.2 k`,
/// `34 M`.
///
/// One decimal is shown below ten units, none above.
#[must_use]
#[allow(clippy::cast_precision_loss)] // display only
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 999.5 && unit + 1 < UNITS.len() {
        value /= UNIT_STEP;
        unit += 1;
    }
    let symbol = UNITS[unit];
    if unit == 0 {
        format!("{bytes}")
    } else if value < 9.95 {
        format!("{value:.1} {symbol}")
    } else {
        format!("{value:.0} {symbol}")
    }
}

/// Formats a duration as `MM:SS`, or `H:MM:SS` from one hour on.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
