/// Parses an ISO-8601 duration (`PT1H2M10S`, `P1DT30S`, `P2W`) into whole
/// seconds.
///
/// YouTube reports video durations in this shape. Calendar units that have no
/// fixed length in seconds (years, months) and anything malformed yield
/// `None` rather than a guess.
pub fn iso8601_to_seconds(input: &str) -> Option<u64> {
    let rest = input.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut seconds: u64 = 0;
    let mut in_time = false;
    let mut digits = String::new();
    for ch in rest.chars() {
        match ch {
            'T' if !in_time && digits.is_empty() => in_time = true,
            '0'..='9' => digits.push(ch),
            unit => {
                if digits.is_empty() {
                    return None;
                }
                let value: u64 = digits.parse().ok()?;
                digits.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 604_800,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                seconds = seconds.checked_add(value.checked_mul(factor)?)?;
            }
        }
    }

    if digits.is_empty() { Some(seconds) } else { None }
}

#[cfg(test)]
mod tests {
    use super::iso8601_to_seconds;

    #[test]
    fn parses_time_components() {
        assert_eq!(iso8601_to_seconds("PT10S"), Some(10));
        assert_eq!(iso8601_to_seconds("PT2M10S"), Some(130));
        assert_eq!(iso8601_to_seconds("PT1H"), Some(3600));
        assert_eq!(iso8601_to_seconds("PT1H2M3S"), Some(3723));
        assert_eq!(iso8601_to_seconds("PT0S"), Some(0));
    }

    #[test]
    fn parses_date_components() {
        assert_eq!(iso8601_to_seconds("P1D"), Some(86_400));
        assert_eq!(iso8601_to_seconds("P1DT1S"), Some(86_401));
        assert_eq!(iso8601_to_seconds("P2W"), Some(1_209_600));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(iso8601_to_seconds(""), None);
        assert_eq!(iso8601_to_seconds("P"), None);
        assert_eq!(iso8601_to_seconds("10S"), None);
        assert_eq!(iso8601_to_seconds("PT10"), None, "trailing digits without a unit");
        assert_eq!(iso8601_to_seconds("PTS"), None, "unit without digits");
        assert_eq!(iso8601_to_seconds("five minutes"), None);
    }

    #[test]
    fn rejects_calendar_units_without_fixed_length() {
        // "P1M" is one month, not one minute; minutes require the time part.
        assert_eq!(iso8601_to_seconds("P1M"), None);
        assert_eq!(iso8601_to_seconds("P1Y"), None);
    }
}
