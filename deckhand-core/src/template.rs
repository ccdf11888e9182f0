//! `{{ var }}` templating
//!
//! One renderer for every generated file: inline config snippets, compose files,
//! backup scripts. Supported syntax is `{{ name }}` and
//! `{{ name | default('fallback') }}`. Placeholders without a value are left in
//! place and reported so callers can warn about them.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::vars::{Vars, value_to_string};

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(
            r#"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*default\(\s*(?:'([^']*)'|"([^"]*)"|([^)\s]*))\s*\)\s*)?\}\}"#,
        )
        .expect("PLACEHOLDER regex is valid")
    })
}

/// Rendered template text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// Placeholder names that had neither a value nor a default
    pub unresolved: Vec<String>,
}

/// Renders a template against a variable map
pub fn render(template: &str, vars: &Vars) -> Rendered {
    let mut unresolved = Vec::new();

    let text = placeholder()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if let Some(value) = vars.get(name) {
                return value_to_string(value);
            }
            let default = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4));
            match default {
                Some(m) => m.as_str().to_string(),
                None => {
                    if !unresolved.iter().any(|u| u == name) {
                        unresolved.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Rendered { text, unresolved }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_known_vars() {
        let vars = Vars::new()
            .with("customer_domain", "acme.io")
            .with("customer_subdomain_gateway", "gw");
        let out = render("https://{{ customer_subdomain_gateway }}.{{customer_domain}}/", &vars);
        assert_eq!(out.text, "https://gw.acme.io/");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_render_keeps_unknown_placeholders() {
        let out = render("port={{ customer_gateway_ports }}", &Vars::new());
        assert_eq!(out.text, "port={{ customer_gateway_ports }}");
        assert_eq!(out.unresolved, vec!["customer_gateway_ports".to_string()]);
    }

    #[test]
    fn test_render_default_filter() {
        let vars = Vars::new().with("set", "x");
        let out = render(
            "{{ set | default('y') }} {{ unset | default('fallback') }} {{ n | default(3306) }} {{ e | default('') }}",
            &vars,
        );
        assert_eq!(out.text, "x fallback 3306 ");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_render_booleans_and_numbers() {
        let vars = Vars::new().with("flag", true).with("retention", 30);
        let out = render("{{ flag }}/{{ retention }}", &vars);
        assert_eq!(out.text, "true/30");
    }

    #[test]
    fn test_render_leaves_shell_syntax_alone() {
        let out = render("echo ${HOME} $((1+1)) %{HTTP:Upgrade}", &Vars::new());
        assert_eq!(out.text, "echo ${HOME} $((1+1)) %{HTTP:Upgrade}");
    }
}
