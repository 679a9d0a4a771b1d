// Decodes every capture of the calibration suite against the shipped signal set
use obd_decoder::{load_signalset_file, Decoder, DecoderConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct Suite {
    signalset: PathBuf,
    id_format: obd_decoder::CanIdFormat,
    groups: Vec<Group>,
}

#[derive(Deserialize)]
struct Group {
    model_year: u16,
    cases: Vec<Case>,
}

#[derive(Deserialize)]
struct Case {
    name: String,
    response: String,
    expected: BTreeMap<String, Expected>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Expected {
    Integer(i64),
    Float(f64),
}

impl Expected {
    fn as_f64(&self) -> f64 {
        match self {
            Expected::Integer(v) => *v as f64,
            Expected::Float(v) => *v,
        }
    }
}

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_suite(path: &Path) -> Suite {
    let text = std::fs::read_to_string(path).unwrap();
    toml::from_str(&text).unwrap()
}

#[test]
fn test_honda_civic_calibration() {
    let _ = env_logger::builder().is_test(true).try_init();

    let suite_path = repo_root().join("calibration/honda-civic.toml");
    let suite = load_suite(&suite_path);
    let catalog = load_signalset_file(&suite_path.parent().unwrap().join(&suite.signalset)).unwrap();
    let decoder = Decoder::new(&catalog, DecoderConfig::new().with_id_format(suite.id_format));

    let mut checked = 0;
    for group in &suite.groups {
        for case in &group.cases {
            let frames = decoder.parse_capture(&case.response).unwrap();
            let response = decoder.reassemble(&frames).unwrap();

            for (signal, expected) in &case.expected {
                let decoded = decoder
                    .decode_payload(group.model_year, &response, signal)
                    .unwrap_or_else(|e| {
                        panic!("MY{} {} ({}): {}", group.model_year, signal, case.name, e)
                    });
                // Suites record plain numbers; the integer/float kind is pinned in scenarios.rs
                assert!(
                    decoded.value.matches(expected.as_f64()),
                    "MY{} {} ({}): expected {}, got {}",
                    group.model_year,
                    signal,
                    case.name,
                    expected.as_f64(),
                    decoded.value
                );
                checked += 1;
            }
        }
    }
    assert_eq!(checked, 40);
}

#[test]
fn test_suite_covers_every_model_year() {
    let suite = load_suite(&repo_root().join("calibration/honda-civic.toml"));
    let years: Vec<u16> = suite.groups.iter().map(|g| g.model_year).collect();
    assert_eq!(years, vec![2016, 2017, 2018, 2022, 2023, 2024, 2025]);
}

#[test]
fn test_decode_response_matches_expected_set() {
    let suite_path = repo_root().join("calibration/honda-civic.toml");
    let suite = load_suite(&suite_path);
    let catalog = load_signalset_file(&suite_path.parent().unwrap().join(&suite.signalset)).unwrap();
    let decoder = Decoder::new(&catalog, DecoderConfig::new().with_id_format(suite.id_format));

    for group in &suite.groups {
        for case in &group.cases {
            let frames = decoder.parse_capture(&case.response).unwrap();
            let decoded = decoder.decode_response(group.model_year, &frames).unwrap();
            let names: Vec<&str> = decoded.iter().map(|d| d.name.as_str()).collect();
            let expected: Vec<&str> = case.expected.keys().map(String::as_str).collect();
            assert_eq!(names, expected, "MY{} ({})", group.model_year, case.name);
        }
    }
}
