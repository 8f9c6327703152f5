// Content sanity checks applied when text payloads are ingested.
//
// Two environment variables tune the behavior:
//   SPT_JSON_PARSE_VALIDATION_IGNORE - comma/space separated substrings of
//     field names exempt from the ratio check (default: password, version).
//   SPT_JSON_PARSE_VALIDATION_RATIO - maximum fraction of special characters
//     tolerated in a string value (default: 0.4).

use bson::{Bson, Document};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

struct IgnoreList {
    names: Vec<String>,
    ratio: f64,
}

static IGNORE_LIST: Lazy<IgnoreList> = Lazy::new(|| {
    let mut names = vec!["password".to_string(), "version".to_string()];
    if let Ok(value) = std::env::var("SPT_JSON_PARSE_VALIDATION_IGNORE") {
        names = value
            .split([' ', ','])
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
    }

    let mut ratio = 0.4;
    if let Ok(value) = std::env::var("SPT_JSON_PARSE_VALIDATION_RATIO") {
        match value.parse::<f64>() {
            Ok(parsed) => ratio = parsed,
            Err(_) => warn!("Invalid validation ratio specified {}", value),
        }
    }

    IgnoreList { names, ratio }
});

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?im)<[^<>]+>").expect("tag pattern"));

/// Rudimentary check of a string for content that has no business inside a
/// data payload: markup tags and JavaScript fragments.
pub fn has_dangerous_content(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }

    if TAG_PATTERN.is_match(field) {
        warn!("Potential HTML tag(s) in payload. {}", field);
        return true;
    }

    let declares = field.contains("var ")
        || field.contains("let ")
        || field.contains("const ")
        || field.contains("eval")
        || field.contains("async ")
        || field.contains("alert(");
    let executes = field.contains('=')
        || field.contains("function ")
        || field.contains("await")
        || field.contains("console.");
    if declares && executes {
        warn!("Potential JavaScript in payload. {}", field);
        return true;
    }

    false
}

fn special(c: char) -> bool {
    let code = c as u32;
    code < 32
        || (33..=47).contains(&code)
        || (58..=64).contains(&code)
        || (91..=96).contains(&code)
        || (123..127).contains(&code)
}

/// Ratio check over a string value.  Field names containing one of the
/// ignore-list substrings always pass.
pub fn text(name: &str, field: &str) -> bool {
    if field.len() < 2 {
        return true;
    }

    let lower = name.to_lowercase();
    let list = &*IGNORE_LIST;
    if list.names.iter().any(|ignore| lower.contains(ignore)) {
        return true;
    }

    let count = field.chars().filter(|c| special(*c)).count();
    let valid = count as f64 / field.chars().count() as f64 <= list.ratio;
    if !valid {
        warn!(
            "Field {} has too many special characters. Limit is {}% of value. Size: {}; special characters: {}. {}",
            name,
            list.ratio * 100.0,
            field.len(),
            count,
            field
        );
    }
    valid
}

/// Recursive validation of every string value in a document.
pub fn document(name: &str, doc: &Document) -> bool {
    for (key, value) in doc.iter() {
        let key: &str = key.as_ref();
        if !value_ok(key, value) {
            warn!("Invalid data in field {} of {}", key, name);
            return false;
        }
    }
    true
}

fn value_ok(name: &str, value: &Bson) -> bool {
    match value {
        Bson::String(s) => text(name, s),
        Bson::Document(doc) => document(name, doc),
        Bson::Array(items) => items.iter().all(|item| value_ok(name, item)),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn plain_text_passes() {
        assert!(text("key", "an ordinary value"));
        assert!(text("key", "a"));
    }

    #[test]
    fn symbol_soup_fails() {
        assert!(!text("key", "!!!@@@###$$$%%%"));
    }

    #[test]
    fn ignored_names_always_pass() {
        assert!(text("userPassword", "!!!@@@###$$$%%%"));
    }

    #[test]
    fn markup_is_dangerous() {
        assert!(has_dangerous_content("<script>alert(1)</script>"));
        assert!(has_dangerous_content("hello <b>world</b>"));
        assert!(!has_dangerous_content("2 < 3 and 5 > 4"));
    }

    #[test]
    fn script_fragments_are_dangerous() {
        assert!(has_dangerous_content("var x = 1"));
        assert!(has_dangerous_content("eval(console.log)"));
        assert!(!has_dangerous_content("variable names are fine"));
    }

    #[test]
    fn documents_validate_recursively() {
        assert!(document("doc", &doc! { "key": "value", "nested": { "a": "b" } }));
        assert!(!document("doc", &doc! { "nested": { "bad": ")(*&^%$#@!~" } }));
    }
}
