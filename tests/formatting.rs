use pinecheck::{Config, Engine, FormatOptions};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn engine() -> Engine {
    Engine::from_config(Config::default())
}

fn gap() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["", " ", "  "])
}

fn statement() -> impl Strategy<Value = String> {
    let ident = "v_[a-z0-9]{0,4}";
    prop_oneof![
        (ident, gap(), 0u32..1000).prop_map(|(id, g, n)| format!("{id}{g}={g}{n}")),
        (ident, ident, gap(), 0u32..100).prop_map(|(a, b, g, n)| format!("{a} ={g}{b}{g}+{g}{n}")),
        (ident, gap(), 0u32..100).prop_map(|(id, g, n)| format!("plot({id}{g},{g}{n})")),
        (ident, 0u32..100, 1usize..7, ident, 0u32..100).prop_map(|(c, n, indent, id, m)| {
            format!("if {c} > {n}\n{}{id} := {m}", " ".repeat(indent))
        }),
        (ident, gap(), prop::sample::select(vec![">", "<", "+", "-", "and", "or", "?"]), 0usize..4, ident)
            .prop_map(|(a, g, op, indent, b)| format!("{a} ={g}{a}{g}{op}\n{}{b}", " ".repeat(indent))),
        (ident, gap(), ident).prop_map(|(a, g, t)| format!("var array<float>{g}\n{t} = {a}")),
        ident.prop_map(|id| format!("// note {id}")),
        Just(String::new()),
    ]
}

proptest! {
    #[test]
    fn format_is_a_fixed_point(lines in prop::collection::vec(statement(), 1..12), tabs in any::<bool>()) {
        let engine = engine();
        let options = FormatOptions { use_tabs: tabs, ..FormatOptions::default() };
        let src = format!("//@version=5\nindicator(\"p\")\n{}\n", lines.join("\n"));

        let once = engine.format(&src, Some(&options));
        let twice = engine.format(once.formatted.as_str(), Some(&options));
        prop_assert_eq!(twice.formatted.as_str(), once.formatted.as_str());
    }
}

#[test]
fn formats_a_small_script() {
    let src = "//@version=5\r\nindicator(\"demo\",overlay=true)   \r\nlen=14\r\nif close>open\r\n  x:=len*2\r\n\r\n\r\n\r\nplot(x)";
    let result = engine().format(src, None);
    assert_eq!(
        result.formatted.as_str(),
        "//@version=5\nindicator(\"demo\", overlay = true)\nlen = 14\nif close > open\n    x := len * 2\n\nplot(x)\n"
    );
    assert!(result.warnings.is_empty());
}

#[test]
fn reports_long_lines_without_wrapping() {
    let options = FormatOptions {
        max_line_length: 20,
        ..FormatOptions::default()
    };
    let src = "//@version=5\nplot(close + open + high + low)\n";
    let result = engine().format(src, Some(&options));
    assert_eq!(result.formatted.as_str(), src);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].line, Some(2));
}
