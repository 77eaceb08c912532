use super::*;

#[test]
fn replaces_both_quote_styles() {
    let out = extract_literals(r#"map get(@, "a;b"), 'x>>y'"#).unwrap();
    assert_eq!(out.text, "map get(@, #0), #1");
    assert_eq!(out.literals, vec!["a;b".to_string(), "x>>y".to_string()]);
}

#[test]
fn escapes_are_resolved() {
    let out = extract_literals(r#""say \"hi\"\n" 'it\'s'"#).unwrap();
    assert_eq!(out.literals[0], "say \"hi\"\n");
    assert_eq!(out.literals[1], "it's");
}

#[test]
fn other_quote_kind_is_plain_text_inside_literal() {
    let out = extract_literals(r#""don't""#).unwrap();
    assert_eq!(out.text, "#0");
    assert_eq!(out.literals[0], "don't");
}

#[test]
fn text_without_literals_is_unchanged() {
    let out = extract_literals("filter @.a > 1\nmap @.b").unwrap();
    assert_eq!(out.text, "filter @.a > 1\nmap @.b");
    assert!(out.literals.is_empty());
    assert_eq!(out.map.to_input(7), 7);
}

#[test]
fn unterminated_quote_is_an_error() {
    let err = extract_literals("map @.a\nfilter eq(@.b, 'oops)").unwrap_err();
    assert_eq!(err.start.line, 2);
    assert_eq!(err.start.column, 16);
    assert!(err.expected[0].contains("closing '"));
}

#[test]
fn offsets_map_back_across_placeholders() {
    let source = r#"eq("long literal", @) + x"#;
    let out = extract_literals(source).unwrap();
    assert_eq!(out.text, "eq(#0, @) + x");
    let x_in_text = out.text.find('x').unwrap();
    let x_in_source = source.find('x').unwrap();
    assert_eq!(out.map.to_input(x_in_text), x_in_source);
}

#[test]
fn unicode_content_is_preserved() {
    let out = extract_literals("startsWith(@.name, 'Zoë')").unwrap();
    assert_eq!(out.literals[0], "Zoë");
}
