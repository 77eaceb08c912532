use super::*;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn simple_var_substitution() {
    let v = vars(&[("LIMIT", "5")]);
    let result = preprocess_vars("take $LIMIT", &v).unwrap();
    assert_eq!(result, "take 5");
}

#[test]
fn braced_var_substitution() {
    let v = vars(&[("FIELD", "price")]);
    let result = preprocess_vars("pluck ${FIELD}_usd", &v).unwrap();
    assert_eq!(result, "pluck price_usd");
}

#[test]
fn default_value_used() {
    let result = preprocess_vars("take ${LIMIT:10}", &HashMap::new()).unwrap();
    assert_eq!(result, "take 10");
}

#[test]
fn default_value_ignored_when_defined() {
    let v = vars(&[("LIMIT", "42")]);
    let result = preprocess_vars("take ${LIMIT:10}", &v).unwrap();
    assert_eq!(result, "take 42");
}

#[test]
fn undefined_var_error() {
    let err = preprocess_vars("map @\ntake $UNDEF", &HashMap::new()).unwrap_err();
    assert!(err.message.contains("UNDEF"), "{}", err.message);
    assert_eq!(err.position, 11);
}

#[test]
fn undefined_braced_var_error() {
    let err = preprocess_vars("${UNDEF}", &HashMap::new()).unwrap_err();
    assert!(err.message.contains("UNDEF"), "{}", err.message);
}

#[test]
fn unterminated_brace_error() {
    let v = vars(&[("VAR", "x")]);
    let err = preprocess_vars("${VAR", &v).unwrap_err();
    assert!(err.message.contains("unterminated"), "{}", err.message);
    let err = preprocess_vars("${VAR:default", &v).unwrap_err();
    assert!(err.message.contains("unterminated"), "{}", err.message);
}

#[test]
fn missing_name_after_brace_error() {
    let err = preprocess_vars("${1}", &HashMap::new()).unwrap_err();
    assert_eq!(err.position, 0);
}

#[test]
fn multiple_vars() {
    let v = vars(&[("A", "1"), ("B", "2")]);
    let result = preprocess_vars("map $A + $B", &v).unwrap();
    assert_eq!(result, "map 1 + 2");
}

#[test]
fn context_references_pass_through() {
    let v = vars(&[("X", "1")]);
    let src = "!reduce $.accumulator + $.current, $\nfilter $ && @ > $X";
    let result = preprocess_vars(src, &v).unwrap();
    assert_eq!(
        result,
        "!reduce $.accumulator + $.current, $\nfilter $ && @ > 1"
    );
}

#[test]
fn dollar_in_strings_ignored() {
    let result = preprocess_vars(r#"map "$HOME", '$USER \' $X'"#, &HashMap::new()).unwrap();
    assert_eq!(result, r#"map "$HOME", '$USER \' $X'"#);
}

#[test]
fn dollar_dollar_escape() {
    let v = vars(&[("X", "val")]);
    assert_eq!(preprocess_vars("$$X", &v).unwrap(), "$X");
    assert_eq!(preprocess_vars("cost $$5", &v).unwrap(), "cost $5");
}

#[test]
fn non_ascii_text_is_preserved() {
    let v = vars(&[("N", "3")]);
    let result = preprocess_vars("map 'é' + \"ü\" ; take $N", &v).unwrap();
    assert_eq!(result, "map 'é' + \"ü\" ; take 3");
}

#[test]
fn preprocess_then_parse() {
    let v = vars(&[("LIMIT", "3"), ("KEY", "region")]);
    let source = "groupBy @.$KEY >>\n  take $LIMIT\n<<\nmap {key: '$KEY'}";
    let processed = preprocess_vars(source, &v).unwrap();
    assert!(processed.contains("groupBy @.region"));
    assert!(processed.contains("'$KEY'"));
    let program = crate::parse_pipeline(&processed).unwrap();
    assert_eq!(program.stages().len(), 3);
}

// --- Environment variable fallback ---

#[test]
fn env_fallback_reads_env_var() {
    unsafe { std::env::set_var("RV_TEST_ENV_VAR_42", "99") };
    let result = preprocess_vars_with_env("take $RV_TEST_ENV_VAR_42", &HashMap::new()).unwrap();
    assert_eq!(result, "take 99");
    unsafe { std::env::remove_var("RV_TEST_ENV_VAR_42") };
}

#[test]
fn env_fallback_explicit_var_takes_priority() {
    let v = vars(&[("RV_TEST_ENV_VAR_43", "1")]);
    unsafe { std::env::set_var("RV_TEST_ENV_VAR_43", "2") };
    let result = preprocess_vars_with_env("$RV_TEST_ENV_VAR_43", &v).unwrap();
    assert_eq!(result, "1");
    unsafe { std::env::remove_var("RV_TEST_ENV_VAR_43") };
}

#[test]
fn env_fallback_undefined_still_errors() {
    let err =
        preprocess_vars_with_env("$RV_TEST_CERTAINLY_UNDEFINED_XYZ", &HashMap::new()).unwrap_err();
    assert!(err.message.contains("RV_TEST_CERTAINLY_UNDEFINED_XYZ"));
}
