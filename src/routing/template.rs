//! `$variable` templates for notification titles and bodies.
//!
//! Templates are user-authored configuration, so rendering never fails:
//! placeholders that don't resolve are left in the output verbatim.

use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const DEFAULT_TITLE_TEMPLATE: &str = "$subject ($from)";
pub const DEFAULT_BODY_TEMPLATE: &str = "$body";

/// `$$`, `$name` or `${name}`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
        .expect("placeholder regex is valid")
});

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub subject: &'a str,
    pub from: &'a str,
    pub body: &'a str,
    /// Canonical `user@domain` of the matched routing key.
    pub to: &'a str,
    /// The routing key as written in the config file.
    pub config: &'a str,
    /// Severity token.
    pub kind: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn get(&self, name: &str) -> Option<&'a str> {
        match name {
            "subject" => Some(self.subject),
            "from" => Some(self.from),
            "body" => Some(self.body),
            "to" => Some(self.to),
            "config" => Some(self.config),
            "type" => Some(self.kind),
            _ => None,
        }
    }
}

/// A parsed-on-demand template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn default_title() -> Self {
        Self::new(DEFAULT_TITLE_TEMPLATE)
    }

    pub fn default_body() -> Self {
        Self::new(DEFAULT_BODY_TEMPLATE)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &TemplateContext<'_>) -> String {
        self.render_with(|name| ctx.get(name))
    }

    /// Render with an arbitrary variable lookup.
    pub fn render_with<'v>(&self, lookup: impl Fn(&str) -> Option<&'v str>) -> String {
        PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures<'_>| {
                if caps.get(1).is_some() {
                    return "$".to_string();
                }
                let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
                match lookup(name) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext<'static> {
        TemplateContext {
            subject: "Test",
            from: "a@b.com",
            body: "world",
            to: "ops@mailrise.xyz",
            config: "ops",
            kind: "warning",
        }
    }

    #[test]
    fn default_title_renders_subject_and_sender() {
        assert_eq!(Template::default_title().render(&ctx()), "Test (a@b.com)");
    }

    #[test]
    fn default_body_is_body() {
        assert_eq!(Template::default_body().render(&ctx()), "world");
    }

    #[test]
    fn all_variables_resolve() {
        let t = Template::new("$to|$config|$type|$body");
        assert_eq!(t.render(&ctx()), "ops@mailrise.xyz|ops|warning|world");
    }

    #[test]
    fn braced_form() {
        let t = Template::new("[${type}]${subject}s");
        assert_eq!(t.render(&ctx()), "[warning]Tests");
    }

    #[test]
    fn unknown_variables_stay_verbatim() {
        assert_eq!(Template::new("$unknown").render(&ctx()), "$unknown");
        assert_eq!(Template::new("${nope} $body").render(&ctx()), "${nope} world");
        assert_eq!(
            Template::new("$unknown").render(&TemplateContext::default()),
            "$unknown"
        );
    }

    #[test]
    fn stray_dollars_are_left_alone() {
        assert_eq!(Template::new("cost: $5").render(&ctx()), "cost: $5");
        assert_eq!(Template::new("trailing $").render(&ctx()), "trailing $");
        assert_eq!(Template::new("${unclosed").render(&ctx()), "${unclosed");
    }

    #[test]
    fn double_dollar_escapes() {
        assert_eq!(Template::new("$$subject").render(&ctx()), "$subject");
    }

    #[test]
    fn values_are_not_escaped_or_reexpanded() {
        let c = TemplateContext {
            body: "<b>$subject</b>",
            ..ctx()
        };
        assert_eq!(Template::new("$body").render(&c), "<b>$subject</b>");
    }

    #[test]
    fn custom_lookup() {
        let t = Template::new("hello $name");
        let out = t.render_with(|n| (n == "name").then_some("there"));
        assert_eq!(out, "hello there");
    }
}
