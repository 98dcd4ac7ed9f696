#![allow(non_snake_case)]

use super::*;
use crate::BagError;
use test_case::test_case;

#[test_case("system", LineEnding::System)]
#[test_case("counter-system", LineEnding::CounterSystem)]
#[test_case("unix", LineEnding::Unix)]
#[test_case("windows", LineEnding::Windows)]
fn FillerConfig___from_json___parses_line_ending(name: &str, expected: LineEnding) {
    let json = format!(r#"{{"line_ending": "{name}"}}"#);

    let config = FillerConfig::from_json(json.as_bytes()).unwrap();

    assert_eq!(config.line_ending, expected);
}

#[test_case("bagging-date", AutoMetadata::BaggingDate)]
#[test_case("bag-size", AutoMetadata::BagSize)]
#[test_case("payload-oxum", AutoMetadata::PayloadOxum)]
#[test_case("software-agent", AutoMetadata::SoftwareAgent)]
fn FillerConfig___from_json___parses_auto_metadata(name: &str, expected: AutoMetadata) {
    let json = format!(r#"{{"auto_metadata": ["{name}"]}}"#);

    let config = FillerConfig::from_json(json.as_bytes()).unwrap();

    assert_eq!(config.auto_metadata, vec![expected]);
}

#[test_case("UTF-8", TagEncoding::Utf8)]
#[test_case("utf-16be", TagEncoding::Utf16Be)]
#[test_case("UTF-16LE", TagEncoding::Utf16Le)]
fn FillerConfig___encoding___resolves_name(name: &str, expected: TagEncoding) {
    let config = FillerConfig {
        tag_encoding: name.to_string(),
        ..FillerConfig::default()
    };

    assert_eq!(config.encoding().unwrap(), expected);
}

#[test_case("crc32")]
#[test_case("SHA-3")]
fn FillerConfig___checksum_set___unknown_name___is_config_error(name: &str) {
    let config = FillerConfig {
        algorithms: vec![name.to_string()],
        ..FillerConfig::default()
    };

    assert!(matches!(config.checksum_set(), Err(BagError::Config(_))));
}
