//! Golden fixture tests for the endpoint normalizer.
//!
//! Each fixture in `fixtures/normalize/` holds a list of cases with a base
//! URL, an endpoint path and the exact URL the default normalizer must emit.

use dropwire_core::Normalizer;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn fixture_path(name: &str) -> std::path::PathBuf {
    let mut p = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("../../fixtures/normalize");
    p.push(name);
    p
}

fn load_fixture(name: &str) -> serde_json::Value {
    let content = std::fs::read_to_string(fixture_path(name)).expect("fixture not found");
    serde_json::from_str(&content).expect("invalid fixture JSON")
}

fn run_fixture(name: &str) -> usize {
    let fixture = load_fixture(name);
    let normalizer = Normalizer::default();
    let cases = fixture["cases"].as_array().expect("missing cases");
    assert!(!cases.is_empty(), "{name} has no cases");

    for case in cases {
        let label = case["name"].as_str().unwrap();
        let base = case["base"].as_str().unwrap();
        let path = case["path"].as_str().unwrap();
        let expected = case["expectedUrl"].as_str().unwrap();

        let got = normalizer.normalize(base, path);
        assert_eq!(got, expected, "{name}: {label}");

        let canonical_base = normalizer.normalize_base(base);
        assert_eq!(
            normalizer.normalize_base(&canonical_base),
            canonical_base,
            "{name}: {label}: base not idempotent"
        );
    }
    cases.len()
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

#[test]
fn golden_base_repair() {
    run_fixture("base-repair.json");
}

#[test]
fn golden_endpoint_classes() {
    run_fixture("endpoint-classes.json");
}

#[test]
fn golden_query_and_prefix() {
    run_fixture("query-and-prefix.json");
}

#[test]
fn golden_every_fixture_has_cases() {
    let dir = fixture_path("");
    let mut total = 0;
    for entry in std::fs::read_dir(&dir).expect("fixture dir") {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            total += run_fixture(&name);
        }
    }
    assert!(total >= 15, "only {total} golden cases found");
}
