use std::time::Duration;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

/// Parse a duration string such as "90s", "30m", "1h30m" or "1.5h".
///
/// The accepted syntax is a sequence of decimal numbers, each with an
/// optional fraction and a mandatory unit (ns, us, µs, ms, s, m, h).
/// A bare "0" is also accepted.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(eyre!("Empty duration string"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| eyre!("Missing unit in duration: {s}"))?;
        if num_end == 0 {
            return Err(eyre!("Invalid duration: {s}"));
        }
        let (number, tail) = rest.split_at(num_end);
        let number: f64 = number
            .parse()
            .with_context(|| format!("Invalid number in duration: {s}"))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(eyre!("Unknown unit {unit:?} in duration: {s}")),
        };
        total += number * seconds_per_unit;
        rest = tail;
    }

    Duration::try_from_secs_f64(total).map_err(|e| eyre!("Invalid duration {s}: {e}"))
}

/// Format a duration rounded to whole seconds, e.g. "1h2m3s", "4m0s", "12s".
pub(crate) fn format_duration(d: &Duration) -> String {
    let mut secs = d.as_secs();
    if d.subsec_millis() >= 500 {
        secs += 1;
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
