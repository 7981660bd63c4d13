use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Rules with this prefix are compiled as regular expressions; everything
/// else is compared literally.
const REGEX_RULE_PREFIX: &str = "regex:";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

/// Immutable variable-binding context used for `${name}` substitution in
/// match rules and file name patterns.
///
/// Extending a context produces a new context sharing the previous bindings,
/// so a binding added while processing one rule can never leak back into the
/// caller's context.
#[derive(Debug, Clone, Default)]
pub struct VarContext {
    vars: Arc<BTreeMap<String, String>>,
}

impl VarContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new context with `key` bound to `value`, leaving `self`
    /// untouched.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = (*self.vars).clone();
        vars.insert(key.into(), value.into());
        Self { vars: Arc::new(vars) }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Replaces every `${name}` placeholder in `text` with its bound value.
///
/// Unbound placeholders are left verbatim. When `escape` is set the bound
/// values are regex-escaped, so a binding can never inject pattern syntax
/// into a `regex:` rule.
pub fn substitute(text: &str, vars: &VarContext, escape: bool) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| match vars.get(&caps[1]) {
            Some(value) if escape => regex::escape(value),
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn matches_text(text: &str, case_sensitive: bool, rule: &str, vars: &VarContext) -> bool {
    let rule = substitute(rule, vars, false);
    if text.chars().count() != rule.chars().count() {
        return false;
    }
    if case_sensitive {
        text == rule
    } else {
        text.to_lowercase() == rule.to_lowercase()
    }
}

fn matches_regex(text: &str, case_sensitive: bool, rule: &str, vars: &VarContext) -> bool {
    let pattern = substitute(rule, vars, true);
    match RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .build()
    {
        Ok(re) => re.is_match(text),
        // A malformed pattern matches nothing rather than failing the run.
        Err(_) => false,
    }
}

/// Evaluates one match rule against `text`.
pub fn matches(text: &str, case_sensitive: bool, rule: &str, vars: &VarContext) -> bool {
    match rule.strip_prefix(REGEX_RULE_PREFIX) {
        Some(pattern) => matches_regex(text, case_sensitive, pattern, vars),
        None => matches_text(text, case_sensitive, rule, vars),
    }
}

/// True when any rule in the list matches `text`.
pub fn matches_list(text: &str, case_sensitive: bool, rules: &[String], vars: &VarContext) -> bool {
    rules.iter().any(|rule| matches(text, case_sensitive, rule, vars))
}

/// True when the rule matches any text in the list.
pub fn any_matches<S: AsRef<str>>(
    texts: &[S],
    case_sensitive: bool,
    rule: &str,
    vars: &VarContext,
) -> bool {
    texts
        .iter()
        .any(|text| matches(text.as_ref(), case_sensitive, rule, vars))
}

/// Matches a file's extension (with its leading dot) against a rule list,
/// case-insensitively. A file without an extension matches only rules that
/// accept the empty string.
pub fn file_has_extension(file_name: &Path, extensions: &[String]) -> bool {
    let ext = file_name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    matches_list(&ext, false, extensions, &VarContext::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rules(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn literal_match_requires_exact_length() {
        let vars = VarContext::new();
        assert!(matches("abc", true, "abc", &vars));
        assert!(!matches("abc", true, "ab", &vars));
        assert!(!matches("abc", true, "abcd", &vars));
        assert!(!matches("abc", true, "abd", &vars));
    }

    #[test]
    fn literal_match_honors_case_sensitivity() {
        let vars = VarContext::new();
        assert!(!matches("A", true, "a", &vars));
        assert!(matches("A", false, "a", &vars));
    }

    #[test]
    fn regex_rule_matches_anywhere() {
        let vars = VarContext::new();
        assert!(matches("my-info.json", true, r"regex:info\.json$", &vars));
        assert!(!matches("info.jsonx", true, r"regex:info\.json$", &vars));
    }

    #[test]
    fn malformed_regex_matches_nothing() {
        let vars = VarContext::new();
        assert!(!matches("anything", true, "regex:([", &vars));
    }

    #[test]
    fn substitution_replaces_bound_and_keeps_unbound() {
        let vars = VarContext::new().with("name", "Some Title");
        assert_eq!(substitute("${name}.json", &vars, false), "Some Title.json");
        assert_eq!(substitute("${other}.json", &vars, false), "${other}.json");
    }

    #[test]
    fn substitution_escapes_metacharacters_in_regex_rules() {
        // A bound value of "a.b" must not let the dot act as a wildcard.
        let vars = VarContext::new().with("name", "a.b");
        assert!(matches("a.b.json", true, r"regex:^${name}\.json$", &vars));
        assert!(!matches("aXb.json", true, r"regex:^${name}\.json$", &vars));
    }

    #[test]
    fn var_context_extension_is_copy_on_write() {
        let base = VarContext::new().with("name", "x");
        let extended = base.with("extra", "y");
        assert_eq!(base.get("extra"), None);
        assert_eq!(extended.get("extra"), Some("y"));
        assert_eq!(extended.get("name"), Some("x"));
    }

    #[test]
    fn list_quantifiers() {
        let vars = VarContext::new();
        assert!(matches_list("b", true, &rules(&["a", "b"]), &vars));
        assert!(!matches_list("c", true, &rules(&["a", "b"]), &vars));
        assert!(any_matches(&["x", "y"], true, "y", &vars));
        assert!(!any_matches(&["x", "y"], true, "z", &vars));
    }

    #[test]
    fn extension_matching_is_case_insensitive_and_dotted() {
        let exts = rules(&[".zip", ".cbz"]);
        assert!(file_has_extension(&PathBuf::from("a.ZIP"), &exts));
        assert!(file_has_extension(&PathBuf::from("dir/a.cbz"), &exts));
        assert!(!file_has_extension(&PathBuf::from("a.rar"), &exts));
        assert!(!file_has_extension(&PathBuf::from("archive"), &exts));
    }
}
