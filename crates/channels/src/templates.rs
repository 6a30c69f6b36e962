//! Step template rendering with `{{ field }}` placeholders and the
//! compliance opt-out footer.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use drip_core::config::TemplateConfig;
use drip_core::directory::TemplateRenderer;
use drip_core::types::RenderContext;

/// `{{ name }}` or `{{ name | default:"fallback" }}`.
const PLACEHOLDER: &str = r#"\{\{\s*([A-Za-z0-9_ .-]+?)\s*(?:\|\s*default\s*:\s*"([^"]*)"\s*)?\}\}"#;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER).expect("placeholder pattern compiles"))
}

fn blank_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("blank pattern compiles"))
}

/// Collapse runs of spaces and tabs and trim each line. Line breaks and
/// blank lines between paragraphs are kept.
fn tidy(body: &str) -> String {
    blank_run()
        .replace_all(body, " ")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Renders drip step bodies. Unknown placeholders without a default render
/// as empty; the opt-out suffix is appended once when the body lacks it.
#[derive(Debug, Clone)]
pub struct DripTemplateRenderer {
    opt_out_suffix: String,
}

impl DripTemplateRenderer {
    pub fn new(opt_out_suffix: impl Into<String>) -> Self {
        Self {
            opt_out_suffix: opt_out_suffix.into(),
        }
    }

    pub fn from_config(config: &TemplateConfig) -> Self {
        Self::new(config.opt_out_suffix.clone())
    }

    /// Substitute placeholders only.
    pub fn interpolate(&self, template: &str, context: &RenderContext) -> String {
        placeholder()
            .replace_all(template, |caps: &Captures<'_>| {
                let value = context.get(&caps[1]).filter(|v| !v.trim().is_empty());
                match (value, caps.get(2)) {
                    (Some(v), _) => v.to_string(),
                    (None, Some(fallback)) => fallback.as_str().to_string(),
                    (None, None) => String::new(),
                }
            })
            .into_owned()
    }

    fn with_opt_out(&self, body: String) -> String {
        let suffix = self.opt_out_suffix.trim();
        if suffix.is_empty() || body.to_lowercase().contains(&suffix.to_lowercase()) {
            return body;
        }
        if body.is_empty() {
            suffix.to_string()
        } else if body.contains('\n') {
            format!("{body}\n{suffix}")
        } else {
            format!("{body} {suffix}")
        }
    }
}

impl Default for DripTemplateRenderer {
    fn default() -> Self {
        Self::from_config(&TemplateConfig::default())
    }
}

impl TemplateRenderer for DripTemplateRenderer {
    fn render(&self, template: &str, context: &RenderContext) -> String {
        let body = tidy(&self.interpolate(template, context));
        self.with_opt_out(body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use drip_core::types::{LeadContext, TenantContext};

    fn context() -> RenderContext {
        let lead = LeadContext {
            lead_id: "lead-1".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            phone: Some("+15550001111".into()),
            ..LeadContext::default()
        };
        let tenant = TenantContext {
            tenant_id: "t1".into(),
            agent_name: Some("Jordan".into()),
            ..TenantContext::default()
        };
        RenderContext::new(&lead, &tenant)
    }

    #[test]
    fn test_placeholders_accept_casing_variants() {
        let r = DripTemplateRenderer::new("");
        assert_eq!(
            r.render("Hi {{first_name}} / {{ firstName }} / {{FIRST NAME}}", &context()),
            "Hi Ada / Ada / Ada"
        );
        assert_eq!(
            r.render("{{ agent_name }} here, {{ full_name }}", &context()),
            "Jordan here, Ada Lovelace"
        );
    }

    #[test]
    fn test_default_used_for_missing_field() {
        let r = DripTemplateRenderer::new("");
        assert_eq!(
            r.render(r#"Hey {{ nickname | default:"friend" }}!"#, &context()),
            "Hey friend!"
        );
        assert_eq!(
            r.render(r#"Hey {{ first_name | default:"friend" }}!"#, &context()),
            "Hey Ada!"
        );
        assert_eq!(r.render("Hi {{ nickname }}, ok", &context()), "Hi , ok");
    }

    #[test]
    fn test_opt_out_appended_once() {
        let r = DripTemplateRenderer::default();
        let body = r.render("Hi {{first_name}}", &context());
        assert_eq!(body, "Hi Ada Reply STOP to opt out.");

        let already = r.render("Hi {{first_name}}. reply stop to opt out.", &context());
        assert_eq!(already, "Hi Ada. reply stop to opt out.");
        assert_eq!(r.render(&body, &context()), body);
    }

    #[test]
    fn test_multiline_template_keeps_line_breaks() {
        let r = DripTemplateRenderer::default();
        let body = r.render(
            "Hi {{first_name}},\n\nYour quote:\n- item one  \n- item\t\ttwo {{ nickname }}",
            &context(),
        );
        assert_eq!(
            body,
            "Hi Ada,\n\nYour quote:\n- item one\n- item two\nReply STOP to opt out."
        );
    }
}
