//! Small shared helpers: price parsing and URL component encoding.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_PRICE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9.,]").expect("static price regex"));

/// Parse a displayed price into a number.
///
/// Keeps digits, `.` and `,`, then decides which separator is the decimal
/// point: when both appear, the later one wins and the other is a thousands
/// separator; a lone `.` is a thousands separator; a lone `,` is a decimal
/// point. Unparsable input yields 0.0 rather than an error, so a broken
/// price never fails an extraction run.
///
/// `"S/ 1,234.50"` and `"S/1.234,50"` both parse to `1234.50`.
pub fn parse_price(text: Option<&str>) -> f64 {
    let Some(text) = text else {
        return 0.0;
    };
    let clean = NON_PRICE_CHARS.replace_all(text, "").into_owned();

    let numeric = match (clean.rfind('.'), clean.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => clean.replace(',', ""),
        (Some(_), Some(_)) => clean.replace('.', "").replacen(',', ".", 1),
        (None, Some(_)) => clean.replacen(',', ".", 1),
        // a lone '.' is a thousands separator on the sites we scrape
        (Some(_), None) => clean.replace('.', ""),
        (None, None) => clean,
    };

    numeric.parse::<f64>().unwrap_or(0.0)
}

/// Percent-encode a string for use inside a URL path or query value.
pub fn encode_component(value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    // form encoding uses '+' for spaces; paths need %20
    encoded.replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some("S/ 1,234.50"), 1234.50)]
    #[case(Some("S/1.234,50"), 1234.50)]
    #[case(Some("1.299"), 1299.0)]
    #[case(Some("2,5"), 2.5)]
    #[case(Some("1.234.567"), 1_234_567.0)]
    #[case(Some("abc"), 0.0)]
    #[case(Some(""), 0.0)]
    #[case(None, 0.0)]
    fn parse_price_cases(#[case] input: Option<&str>, #[case] expected: f64) {
        assert!((parse_price(input) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn encode_component_escapes_spaces_and_symbols() {
        assert_eq!(encode_component("tv 55\""), "tv%2055%22");
        assert_eq!(encode_component("simple"), "simple");
    }
}
