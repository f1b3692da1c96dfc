//! Coercion of raw string values into typed literal nodes.
//!
//! Filter arguments and parameter values arrive as plain strings; the target
//! type comes from the field they apply to. Date-like strings accept both
//! plain dates and datetimes, and an explicit UTC offset is dropped so the
//! wall-clock reading survives.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{codes, Error, Result, WithErrorInfo};
use crate::ir::ast::{Formula, LiteralValue};
use crate::ir::datatype::DataTypeKind;

/// Parses `raw` as a `kind` value and wraps it into a literal node.
pub fn make_literal(raw: &str, kind: DataTypeKind) -> Result<Formula> {
    Ok(Formula::literal(parse_value(raw, kind)?))
}

pub fn parse_value(raw: &str, kind: DataTypeKind) -> Result<LiteralValue> {
    let value = match kind {
        DataTypeKind::String => LiteralValue::String(raw.to_string()),
        DataTypeKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(LiteralValue::Integer)
            .map_err(|_| invalid_literal(raw, kind))?,
        DataTypeKind::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(LiteralValue::Float)
            .ok_or_else(|| invalid_literal(raw, kind))?,
        DataTypeKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => LiteralValue::Boolean(true),
            "false" | "0" => LiteralValue::Boolean(false),
            _ => return Err(invalid_literal(raw, kind)),
        },
        DataTypeKind::Date => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(LiteralValue::Date)
            .map_err(|_| invalid_literal(raw, kind))?,
        DataTypeKind::Datetime => LiteralValue::Datetime(
            parse_datetime_like(raw).ok_or_else(|| invalid_literal(raw, kind))?,
        ),
        DataTypeKind::Genericdatetime => LiteralValue::Genericdatetime(
            parse_datetime_like(raw).ok_or_else(|| invalid_literal(raw, kind))?,
        ),
        DataTypeKind::Uuid => LiteralValue::Uuid(raw.to_string()),
        DataTypeKind::Geopoint => LiteralValue::Geopoint(raw.to_string()),
        DataTypeKind::Geopolygon => LiteralValue::Geopolygon(raw.to_string()),
        DataTypeKind::Markup => LiteralValue::Markup(raw.to_string()),
        DataTypeKind::Null
        | DataTypeKind::ArrayInt
        | DataTypeKind::ArrayFloat
        | DataTypeKind::ArrayStr
        | DataTypeKind::TreeStr => return Err(invalid_literal(raw, kind)),
    };
    Ok(value)
}

/// Lenient datetime parsing: a plain date reads as midnight, `T` and space
/// separators both work, and an RFC 3339 offset is normalized away keeping
/// the local reading.
pub fn parse_datetime_like(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(value);
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(value);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.naive_local());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    None
}

pub fn is_midnight(value: NaiveDateTime) -> bool {
    value.time() == NaiveTime::MIN
}

fn invalid_literal(raw: &str, kind: DataTypeKind) -> Error {
    Error::new_simple(format!("Invalid filter value {raw:?} for type {kind}"))
        .with_code(codes::INVALID_LITERAL)
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("42", LiteralValue::Integer(42))]
    #[case(" -7 ", LiteralValue::Integer(-7))]
    fn integer_values(#[case] raw: &str, #[case] expected: LiteralValue) {
        assert_eq!(parse_value(raw, DataTypeKind::Integer).unwrap(), expected);
    }

    #[rstest]
    #[case("true", true)]
    #[case("TRUE", true)]
    #[case("1", true)]
    #[case("false", false)]
    #[case("0", false)]
    fn boolean_values(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(
            parse_value(raw, DataTypeKind::Boolean).unwrap(),
            LiteralValue::Boolean(expected)
        );
    }

    #[test]
    fn date_accepts_iso_only() {
        assert_eq!(
            parse_value("2024-02-29", DataTypeKind::Date).unwrap(),
            LiteralValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(parse_value("29.02.2024", DataTypeKind::Date).is_err());
        assert!(parse_value("2024-02-30", DataTypeKind::Date).is_err());
    }

    #[test]
    fn datetime_drops_explicit_offset() {
        let parsed = parse_datetime_like("2024-01-01T12:30:00+03:00").unwrap();
        assert_eq!(parsed.to_string(), "2024-01-01 12:30:00");
        let parsed = parse_datetime_like("2024-01-01 12:30:00").unwrap();
        assert_eq!(parsed.to_string(), "2024-01-01 12:30:00");
    }

    #[test]
    fn plain_date_reads_as_midnight() {
        let parsed = parse_datetime_like("2024-05-10").unwrap();
        assert!(is_midnight(parsed));
        assert!(!is_midnight(parse_datetime_like("2024-05-10T00:00:01").unwrap()));
    }

    #[test]
    fn float_rejects_non_finite() {
        assert!(parse_value("0.25", DataTypeKind::Float).is_ok());
        assert!(parse_value("inf", DataTypeKind::Float).is_err());
        assert!(parse_value("nan", DataTypeKind::Float).is_err());
    }

    #[test]
    fn unparsable_value_reports_code() {
        let error = parse_value("soon", DataTypeKind::Datetime).unwrap_err();
        assert_eq!(error.code, Some("E0301"));
        assert_debug_snapshot!(error.reason, @r###"
        Simple(
            "Invalid filter value \"soon\" for type DATETIME",
        )
        "###);
    }

    #[test]
    fn array_kinds_have_no_literal_form() {
        assert!(parse_value("[1, 2]", DataTypeKind::ArrayInt).is_err());
        assert!(parse_value("x", DataTypeKind::Null).is_err());
    }
}
