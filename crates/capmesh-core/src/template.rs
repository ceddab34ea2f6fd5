// ── Identifier templating ──
//
// `%{var}` placeholders substituted from a fixed variable set. Unknown or
// absent variables render as the empty string; an unterminated `%{` is
// copied through literally.

/// Format of every entity's unique id. Excludes the device label so a
/// rename does not orphan the entity.
pub const UNIQUE_ID_FORMAT: &str =
    "capmesh_%{device_id}_%{component}_%{capability}_%{attribute}_%{command}_%{name}";

/// Entity address format used when neither the descriptor nor the settings
/// document declares one.
pub const DEFAULT_ENTITY_ID_FORMAT: &str =
    "%{label}_%{component}_%{capability}_%{attribute}_%{command}_%{name}";

/// Variables available to identifier templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub label: Option<String>,
    pub component: Option<String>,
    pub capability: Option<String>,
    pub attribute: Option<String>,
    pub command: Option<String>,
    pub name: Option<String>,
}

impl TemplateVars {
    pub fn get(&self, var: &str) -> Option<&str> {
        let value = match var {
            "device_id" => &self.device_id,
            "device_type" => &self.device_type,
            "label" => &self.label,
            "component" => &self.component,
            "capability" => &self.capability,
            "attribute" => &self.attribute,
            "command" => &self.command,
            "name" => &self.name,
            _ => return None,
        };
        value.as_deref()
    }
}

/// Render `format` against `vars`.
pub fn render(format: &str, vars: &TemplateVars) -> String {
    render_with(format, |var| vars.get(var).map(str::to_owned))
}

/// Render `format`, asking `lookup` for each placeholder in order.
pub fn render_with(format: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder as written.
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(value) = lookup(&after[..end]) {
            out.push_str(&value);
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Placeholder names in order of appearance.
pub fn placeholders(format: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = format;
    while let Some(start) = rest.find("%{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        names.push(&after[..end]);
        rest = &after[end + 1..];
    }
    names
}

/// The placeholder name if `format` is exactly one placeholder and nothing
/// else (surrounding whitespace ignored).
pub fn sole_placeholder(format: &str) -> Option<&str> {
    let inner = format.trim().strip_prefix("%{")?.strip_suffix('}')?;
    (!inner.contains('}') && !inner.contains("%{")).then_some(inner)
}

/// Lowercase, runs of anything non-alphanumeric collapsed to one `_`, no
/// leading or trailing `_`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Entity address: `<platform>.<slug>`. Falls back to `fallback` when the
/// rendered format slugs to nothing.
pub fn entity_address(platform: &str, rendered: &str, fallback: &str) -> String {
    let mut slug = slugify(rendered);
    if slug.is_empty() {
        slug = slugify(fallback);
    }
    format!("{platform}.{slug}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars {
            device_id: Some("d1".into()),
            label: Some("Kitchen Plug".into()),
            component: Some("main".into()),
            capability: Some("switch".into()),
            attribute: Some("switch".into()),
            ..TemplateVars::default()
        }
    }

    #[test]
    fn absent_variables_render_empty() {
        let out = render(UNIQUE_ID_FORMAT, &vars());
        assert_eq!(out, "capmesh_d1_main_switch_switch__");
    }

    #[test]
    fn unknown_variables_render_empty() {
        assert_eq!(render("a%{nope}b", &vars()), "ab");
    }

    #[test]
    fn rendering_is_idempotent() {
        let v = vars();
        assert_eq!(render(DEFAULT_ENTITY_ID_FORMAT, &v), render(DEFAULT_ENTITY_ID_FORMAT, &v));
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(render("x_%{label", &vars()), "x_%{label");
        assert_eq!(render("%{label}_%{", &vars()), "Kitchen Plug_%{");
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(placeholders("%{a}-%{b}-%{c"), vec!["a", "b"]);
        assert_eq!(sole_placeholder(" %{main/switch/switch} "), Some("main/switch/switch"));
        assert_eq!(sole_placeholder("%{a}%{b}"), None);
        assert_eq!(sole_placeholder("on: %{a}"), None);
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Kitchen Plug__main  switch"), "kitchen_plug_main_switch");
        assert_eq!(slugify("__Hello, World!__"), "hello_world");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn address_falls_back_when_empty() {
        assert_eq!(entity_address("switch", "Kitchen Plug", "u1"), "switch.kitchen_plug");
        assert_eq!(entity_address("switch", "%%", "capmesh_d1"), "switch.capmesh_d1");
    }
}
