//! Tests for logging configuration and format parsing

use pairlink::observability::logging::{parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_pretty() {
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
}

#[test]
fn test_log_format_unknown_defaults_to_compact() {
    // The CLIs are interactive, so a typo should not switch to JSON output
    assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
    assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_whitespace() {
    assert_eq!(LogFormat::parse("  json  "), LogFormat::Json);
    assert_eq!(LogFormat::parse("json\n"), LogFormat::Json);
    assert_eq!(LogFormat::parse("\tpretty"), LogFormat::Pretty);
}

#[test]
fn test_level_parsing_with_whitespace() {
    assert_eq!(parse_level(" debug "), Level::DEBUG);
    assert_eq!(parse_level("warn\n"), Level::WARN);
    assert_eq!(parse_level("verbose"), Level::INFO);
}
