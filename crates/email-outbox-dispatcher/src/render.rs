//! `{{ key }}` placeholder substitution.
//!
//! Values come from the top-level keys of the item's payload, with
//! `to_email` and `idempotency_key` always available. Unknown keys render as
//! empty strings. Values are HTML-escaped in the body and inserted verbatim in
//! the subject.

use crate::model::{EmailTemplate, OutboxItem};
use serde_json::Value;

/// Render `template` for `item`.
pub fn render_template(template: &EmailTemplate, item: &OutboxItem) -> EmailTemplate {
    let lookup = |key: &str| -> String {
        if let Some(value) = item.payload.as_ref().and_then(|p| p.get(key)) {
            return match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
        }
        match key {
            "to_email" => item.to_email.clone(),
            "idempotency_key" => item.idempotency_key.clone(),
            _ => String::new(),
        }
    };

    EmailTemplate {
        subject: substitute(&template.subject, |key| lookup(key)),
        html: substitute(&template.html, |key| escape_html(&lookup(key))),
    }
}

fn substitute<F>(source: &str, mut value_for: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&value_for(after_open[..end].trim()));
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
