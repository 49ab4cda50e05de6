//! Deterministic PCF rendering of exported values.
//!
//! Used by the test harness (expected-file round-trips), by `toString`
//! on aggregates, and by the default `output.text` of a module. The
//! other output formats (JSON, YAML, plist, properties) are separate
//! renderers outside this crate.

use crate::{
    types::format_number,
    value::Exported,
};

/// Renders a module-level document: top-level properties without an
/// enclosing brace pair.
#[must_use]
pub fn render_document(value: &Exported) -> String {
    match value {
        Exported::Object {
            properties,
            elements,
            entries,
            ..
        } => {
            let mut out = String::new();
            render_members(&mut out, properties, entries, elements, 0);
            out
        }
        other => {
            let mut out = render_value(other, 0);
            out.push('\n');
            out
        }
    }
}

/// Renders a value at the given indentation depth (multi-line form).
#[must_use]
pub fn render_value(value: &Exported, indent: usize) -> String {
    match value {
        Exported::Null => "null".to_owned(),
        Exported::Bool(b) => b.to_string(),
        Exported::Int(i) => i.to_string(),
        Exported::Float(f) => format_number(*f),
        Exported::String(s) => quote(s),
        Exported::Duration(d) => d.to_string(),
        Exported::DataSize(d) => d.to_string(),
        Exported::Pair(p) => format!("Pair({}, {})", render_value(&p.0, indent), render_value(&p.1, indent)),
        Exported::Regex(p) => format!("Regex({})", quote(p)),
        Exported::Bytes(bytes) => {
            let parts: Vec<String> = bytes.iter().map(ToString::to_string).collect();
            format!("Bytes({})", parts.join(", "))
        }
        Exported::List(items) => {
            let parts: Vec<String> = items.iter().map(|v| render_value(v, indent)).collect();
            format!("List({})", parts.join(", "))
        }
        Exported::Set(items) => {
            let parts: Vec<String> = items.iter().map(|v| render_value(v, indent)).collect();
            format!("Set({})", parts.join(", "))
        }
        Exported::Map(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .flat_map(|(k, v)| [render_value(k, indent), render_value(v, indent)])
                .collect();
            format!("Map({})", parts.join(", "))
        }
        Exported::Object {
            class_name,
            properties,
            elements,
            entries,
        } => {
            if properties.is_empty() && elements.is_empty() && entries.is_empty() {
                return object_header(class_name, "{}");
            }
            let mut body = String::from("{\n");
            render_members(&mut body, properties, entries, elements, indent + 1);
            body.push_str(&"  ".repeat(indent));
            body.push('}');
            object_header(class_name, &body)
        }
        Exported::Class(name) => format!("Class({name})"),
        Exported::TypeAlias(name) => format!("TypeAlias({name})"),
    }
}

/// Renders a value on a single line (interpolation / diagnostics).
#[must_use]
pub(crate) fn render_inline(value: &Exported) -> String {
    match value {
        Exported::Object {
            class_name,
            properties,
            elements,
            entries,
        } => {
            let mut parts: Vec<String> = Vec::new();
            for (name, v) in properties {
                parts.push(format!("{name} = {}", render_inline(v)));
            }
            for (k, v) in entries {
                parts.push(format!("[{}] = {}", render_inline(k), render_inline(v)));
            }
            for v in elements {
                parts.push(render_inline(v));
            }
            if parts.is_empty() {
                object_header(class_name, "{}")
            } else {
                object_header(class_name, &format!("{{ {} }}", parts.join("; ")))
            }
        }
        other => render_value(other, 0),
    }
}

fn object_header(class_name: &str, body: &str) -> String {
    match class_name {
        "Dynamic" | "Mapping" | "Listing" | "Module" => body.to_owned(),
        _ => format!("new {class_name} {body}"),
    }
}

fn render_members(
    out: &mut String,
    properties: &[(String, Exported)],
    entries: &[(Exported, Exported)],
    elements: &[Exported],
    indent: usize,
) {
    let pad = "  ".repeat(indent);
    for (name, value) in properties {
        match value {
            Exported::Object { .. } => {
                out.push_str(&format!("{pad}{name} {}\n", render_value(value, indent)));
            }
            other => out.push_str(&format!("{pad}{name} = {}\n", render_value(other, indent))),
        }
    }
    for (key, value) in entries {
        match value {
            Exported::Object { .. } => {
                out.push_str(&format!("{pad}[{}] {}\n", render_value(key, indent), render_value(value, indent)));
            }
            other => out.push_str(&format!(
                "{pad}[{}] = {}\n",
                render_value(key, indent),
                render_value(other, indent)
            )),
        }
    }
    for value in elements {
        out.push_str(&format!("{pad}{}\n", render_value(value, indent)));
    }
}

/// Quotes a string, switching to `#`-delimited raw form when the text
/// contains characters that would otherwise need escaping.
#[must_use]
pub(crate) fn quote(text: &str) -> String {
    let needs_raw = text.contains('"') || text.contains('\\');
    if !needs_raw {
        let escaped = text
            .replace('\n', "\\n")
            .replace('\t', "\\t")
            .replace('\r', "\\r");
        return format!("\"{escaped}\"");
    }
    // Pick enough `#`s that no `"##…#` run in the text closes the literal.
    let mut hashes = 1;
    loop {
        let closer = format!("\"{}", "#".repeat(hashes));
        if !text.contains(&closer) {
            break;
        }
        hashes += 1;
    }
    let delim = "#".repeat(hashes);
    format!("{delim}\"{text}\"{delim}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_render_canonically() {
        assert_eq!(render_value(&Exported::Int(42), 0), "42");
        assert_eq!(render_value(&Exported::Float(1.5), 0), "1.5");
        assert_eq!(render_value(&Exported::Float(2.0), 0), "2");
        assert_eq!(render_value(&Exported::Bool(true), 0), "true");
        assert_eq!(render_value(&Exported::Null, 0), "null");
        assert_eq!(render_value(&Exported::string("hi"), 0), "\"hi\"");
    }

    #[test]
    fn strings_with_quotes_use_raw_delimiters() {
        assert_eq!(render_value(&Exported::string("a\"b"), 0), "#\"a\"b\"#");
        assert_eq!(render_value(&Exported::string("a\\b"), 0), "#\"a\\b\"#");
        assert_eq!(render_value(&Exported::string("line\nbreak"), 0), "\"line\\nbreak\"");
    }

    #[test]
    fn objects_render_as_member_blocks() {
        let object = Exported::Object {
            class_name: "Dynamic".to_owned(),
            properties: vec![("x".to_owned(), Exported::Int(1))],
            elements: vec![Exported::string("elem")],
            entries: vec![(Exported::string("k"), Exported::Int(2))],
        };
        let rendered = render_value(&object, 0);
        assert_eq!(rendered, "{\n  x = 1\n  [\"k\"] = 2\n  \"elem\"\n}");
    }

    #[test]
    fn documents_render_top_level_properties_bare() {
        let module = Exported::Object {
            class_name: "Module".to_owned(),
            properties: vec![
                ("a".to_owned(), Exported::Int(1)),
                ("b".to_owned(), Exported::string("two")),
            ],
            elements: vec![],
            entries: vec![],
        };
        assert_eq!(render_document(&module), "a = 1\nb = \"two\"\n");
    }
}
