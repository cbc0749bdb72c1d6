//! Text grammar for the photographic units carried in settings records.
//!
//! Canonical forms:
//!
//! | Unit | Canonical | Also accepted when parsing |
//! |------|-----------|----------------------------|
//! | Aperture | `f/2.8` | `F2.8`, `f2.8`, `2.8` |
//! | Shutter speed | `1/125s`, `2s`, `2.5s` | `1/125`, `0.5`, `2 sec`, `2"` |
//! | ISO | `400` | `ISO 400`, `iso400` |

/// Format an f-number as `f/<n>` with one decimal.
pub fn format_aperture(f_number: f64) -> String {
    format!("f/{f_number:.1}")
}

/// Parse a loosely written aperture (`f/2.8`, `F2.8`, `2.8`) to its f-number.
pub fn parse_aperture(text: &str) -> Option<f64> {
    let lower = text.trim().to_lowercase();
    let number = lower
        .strip_prefix("f/")
        .or_else(|| lower.strip_prefix('f'))
        .unwrap_or(&lower)
        .trim();
    positive(number.parse::<f64>().ok()?)
}

/// Strict check for the canonical `f/<number>` grammar.
pub fn is_aperture(text: &str) -> bool {
    text.strip_prefix("f/")
        .and_then(|n| n.parse::<f64>().ok())
        .and_then(positive)
        .is_some()
}

/// Format an exposure time in seconds.
///
/// Faster than one second becomes a unit fraction (`1/250s`); anything else
/// is decimal seconds with a trailing `.0` dropped (`2s`, `2.5s`).
///
/// Returns `None` for zero, negative or non-finite durations, and for
/// durations too short to write as a whole-number fraction.
pub fn format_shutter(seconds: f64) -> Option<String> {
    let seconds = positive(seconds)?;
    if seconds < 1.0 {
        let denominator = (1.0 / seconds).round().max(1.0);
        if !denominator.is_finite() || denominator > u32::MAX as f64 {
            return None;
        }
        if denominator == 1.0 {
            return Some("1s".to_string());
        }
        return Some(format!("1/{}s", denominator as u64));
    }

    let tenths = (seconds * 10.0).round() / 10.0;
    if tenths.fract() == 0.0 {
        Some(format!("{}s", tenths as u64))
    } else {
        Some(format!("{tenths:.1}s"))
    }
}

/// Parse a loosely written shutter speed to seconds.
pub fn parse_shutter(text: &str) -> Option<f64> {
    let lower = text.trim().to_lowercase();
    let body = lower
        .strip_suffix("seconds")
        .or_else(|| lower.strip_suffix("sec"))
        .or_else(|| lower.strip_suffix('s'))
        .or_else(|| lower.strip_suffix('"'))
        .unwrap_or(&lower)
        .trim();

    match body.split_once('/') {
        Some((num, den)) => {
            let num = positive(num.trim().parse::<f64>().ok()?)?;
            let den = positive(den.trim().parse::<f64>().ok()?)?;
            Some(num / den)
        }
        None => positive(body.parse::<f64>().ok()?),
    }
}

/// Strict check for the canonical `<fraction>s` / `<seconds>s` grammar.
pub fn is_shutter_speed(text: &str) -> bool {
    text.ends_with('s') && parse_shutter(text).is_some()
}

/// Parse an ISO written as `400`, `ISO 400` or `iso400`.
pub fn parse_iso(text: &str) -> Option<u32> {
    let lower = text.trim().to_lowercase();
    let number = lower.strip_prefix("iso").unwrap_or(&lower).trim();
    number.parse::<u32>().ok().filter(|iso| *iso > 0)
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aperture_round_trip_formats() {
        assert_eq!(format_aperture(2.8), "f/2.8");
        assert_eq!(format_aperture(11.0), "f/11.0");
        assert_eq!(parse_aperture("f/2.8"), Some(2.8));
        assert_eq!(parse_aperture("F4"), Some(4.0));
        assert_eq!(parse_aperture(" 5.6 "), Some(5.6));
    }

    #[test]
    fn aperture_rejects_garbage() {
        assert_eq!(parse_aperture("wide open"), None);
        assert_eq!(parse_aperture("f/0"), None);
        assert_eq!(parse_aperture("f/-2"), None);
        assert!(!is_aperture("2.8"));
        assert!(is_aperture("f/11"));
    }

    #[test]
    fn shutter_fractions_below_one_second() {
        assert_eq!(format_shutter(1.0 / 125.0).as_deref(), Some("1/125s"));
        assert_eq!(format_shutter(0.004).as_deref(), Some("1/250s"));
        assert_eq!(format_shutter(1.0 / 8000.0).as_deref(), Some("1/8000s"));
    }

    #[test]
    fn shutter_decimal_seconds() {
        assert_eq!(format_shutter(1.0).as_deref(), Some("1s"));
        assert_eq!(format_shutter(2.5).as_deref(), Some("2.5s"));
        assert_eq!(format_shutter(30.0).as_deref(), Some("30s"));
        assert_eq!(format_shutter(0.97).as_deref(), Some("1s"));
    }

    #[test]
    fn shutter_rejects_degenerate_durations() {
        assert_eq!(format_shutter(0.0), None);
        assert_eq!(format_shutter(-0.5), None);
        assert_eq!(format_shutter(f64::INFINITY), None);
        assert_eq!(format_shutter(f64::NAN), None);
        assert_eq!(format_shutter(f64::MIN_POSITIVE), None);
    }

    #[test]
    fn shutter_parsing() {
        assert_eq!(parse_shutter("1/125s"), Some(1.0 / 125.0));
        assert_eq!(parse_shutter("1/60"), Some(1.0 / 60.0));
        assert_eq!(parse_shutter("2s"), Some(2.0));
        assert_eq!(parse_shutter("0.5"), Some(0.5));
        assert_eq!(parse_shutter("30 sec"), Some(30.0));
        assert_eq!(parse_shutter("1/0s"), None);
        assert_eq!(parse_shutter("fast"), None);
    }

    #[test]
    fn shutter_grammar_is_strict() {
        assert!(is_shutter_speed("1/125s"));
        assert!(is_shutter_speed("2.5s"));
        assert!(!is_shutter_speed("1/125"));
        assert!(!is_shutter_speed("0s"));
    }

    #[test]
    fn iso_parsing() {
        assert_eq!(parse_iso("400"), Some(400));
        assert_eq!(parse_iso("ISO 1600"), Some(1600));
        assert_eq!(parse_iso("iso100"), Some(100));
        assert_eq!(parse_iso("0"), None);
        assert_eq!(parse_iso("high"), None);
    }
}
