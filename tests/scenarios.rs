use pinecheck::{Config, DiagnosticKind, Engine, Version};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn engine(dir: &TempDir) -> Engine {
    Engine::from_config(Config {
        history_dir: dir.path().to_path_buf(),
        ..Config::default()
    })
}

#[test]
fn fixes_missing_marker_and_study() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let result = engine.fix("indicator(\"X\")\nstudy(\"Y\")");
    assert!(result.script.as_str().starts_with("//@version="));
    assert!(result.script.as_str().contains("indicator(\"Y\")"));
    assert!(!result.script.as_str().contains("study("));
    assert_eq!(result.changes.len(), 2, "{:?}", result.changes);
}

#[test]
fn repairs_missing_paren() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let src = "indicator(\"X\", overlay=true";

    let before = engine.validate(src, None).unwrap();
    assert_eq!(before.errors_of(DiagnosticKind::Structural).count(), 1);

    let fixed = engine.fix(src);
    let text = fixed.script.as_str();
    assert!(text.ends_with("overlay=true)"), "{text}");
    assert_eq!(text.matches(')').count(), 1);

    let after = engine.validate(text, None).unwrap();
    assert_eq!(after.errors_of(DiagnosticKind::Structural).count(), 0);
}

#[test]
fn splits_export_var() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let src = "//@version=5\nlibrary(\"L\")\nexport var total = 0";
    let export_errors = |text: &str| {
        engine
            .validate(text, None)
            .unwrap()
            .errors
            .iter()
            .filter(|d| d.message.starts_with("`export var`"))
            .count()
    };

    assert_eq!(export_errors(src), 1);
    let fixed = engine.fix(src);
    assert_eq!(
        fixed.script.as_str(),
        "//@version=5\nlibrary(\"L\")\nvar total = 0\nexport total"
    );
    assert_eq!(export_errors(fixed.script.as_str()), 0);
}

#[test]
fn compares_positionally() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    assert_eq!(engine.compare_versions("a\nb\nc", "a\nX\nc"), vec!["- b", "+ X"]);
}

#[test]
fn v5_to_v6_and_back_stays_valid() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let src = "//@version=5\nindicator(\"RT\")\nvar total = 0\ntotal := total + 1\nplot(total)\n";
    assert!(engine.validate(src, None).unwrap().valid);

    let v6 = engine.convert_version(src, "v6").unwrap();
    assert_eq!(engine.detect_version(&v6), Some(Version::V6));

    let back = engine.convert_version(&v6, "v5").unwrap();
    assert_eq!(engine.detect_version(&back), Some(Version::V5));
    assert!(engine.validate(&back, None).unwrap().valid);
}

#[test]
fn fixing_twice_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let test_cases = vec![
        "indicator(\"X\")\nstudy(\"Y\")",
        "indicator(\"X\", overlay=true",
        "//@version=5\nindicator(\"a\")\nx = security(syminfo.tickerid, \"D\", close)\nplot(sma(x, 14))",
    ];
    for src in test_cases {
        let once = engine.fix(src);
        let twice = engine.fix(once.script.as_str());
        assert!(twice.changes.is_empty(), "source {src:?}: {:?}", twice.changes);
    }
}

#[test]
fn process_repairs_then_formats() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);

    let report = engine.process("indicator(\"X\", overlay=true", None).unwrap();
    assert!(!report.initial.valid);
    assert!(report.fix.as_ref().is_some_and(|f| f.fixed));
    assert!(report.revalidated.as_ref().is_some_and(|r| r.valid));
    assert!(report.formatted.formatted.as_str().contains("overlay = true)"));

    let clean = engine.process("//@version=5\nindicator(\"ok\")\n", None).unwrap();
    assert!(clean.initial.valid);
    assert!(clean.fix.is_none());
    assert!(clean.revalidated.is_none());
}
