use std::io::Write;

use rstest::rstest;

use super::*;

#[test]
fn empty_document_uses_defaults() {
	let config = ModelConfig::from_toml_str("").unwrap();
	assert_eq!(config, ModelConfig::default());
	assert_eq!(config.threads, 1);
	assert_eq!(config.initial_capacity, 0);
}

#[test]
fn all_keys_parse() {
	let config = ModelConfig::from_toml_str(
		r#"
threads = 4
check_invariants = true
initial_capacity = 256
"#,
	)
	.unwrap();
	assert_eq!(
		config,
		ModelConfig {
			threads: 4,
			check_invariants: true,
			initial_capacity: 256,
		}
	);
}

#[rstest]
#[case::unknown_key("thread = 2")]
#[case::wrong_type("threads = \"two\"")]
#[case::negative("initial_capacity = -1")]
fn malformed_documents_are_rejected(#[case] input: &str) {
	assert!(matches!(ModelConfig::from_toml_str(input), Err(ConfigError::Toml(_))));
}

#[test]
fn zero_threads_is_invalid() {
	let err = ModelConfig::from_toml_str("threads = 0").unwrap_err();
	assert!(matches!(err, ConfigError::Invalid { key: "threads", .. }));
	assert_eq!(err.to_string(), "invalid value for 'threads': at least one thread is required");
}

#[test]
fn load_reads_file() {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	writeln!(file, "threads = 3").unwrap();
	let config = ModelConfig::load(file.path()).unwrap();
	assert_eq!(config.threads, 3);
}

#[test]
fn load_reports_missing_path() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("model.toml");
	match ModelConfig::load(&path) {
		Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
		other => panic!("expected I/O error, got {other:?}"),
	}
}
