//! Money formatting

/// Format an amount in minor units (cents) as a dollar string.
///
/// All amounts in the system are stored as integer cents; this is the one
/// place they become human-readable.
pub fn format_usd(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_and_fractional_amounts() {
        assert_eq!(format_usd(0), "$0.00");
        assert_eq!(format_usd(5), "$0.05");
        assert_eq!(format_usd(25000), "$250.00");
        assert_eq!(format_usd(123456), "$1234.56");
    }

    #[test]
    fn formats_negative_amounts() {
        assert_eq!(format_usd(-150), "-$1.50");
    }
}
