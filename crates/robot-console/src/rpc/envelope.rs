//! XML-RPC envelope codec.
//!
//! Requests carry the method name and one string parameter whose text is the
//! JSON-serialized parameter object. The controller extracts both with plain
//! substring search and does not decode XML entities, so the JSON text is
//! written verbatim.

use smol_str::SmolStr;

/// Any reply body containing this token is a fault.
pub const FAULT_MARKER: &str = "fault";

/// Content type of RPC requests.
pub const RPC_CONTENT_TYPE: &str = "text/xml";

/// Render a `methodCall` document.
#[must_use]
pub fn encode_method_call(method: &str, params: &serde_json::Value) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<methodCall>\n  <methodName>{method}</methodName>\n  <params>\n    <param><value><string>{params}</string></value></param>\n  </params>\n</methodCall>"
    )
}

/// A decoded `methodCall` (used by scripted controllers).
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: SmolStr,
    pub params: serde_json::Value,
}

/// Decode a `methodCall` the way the controller does: by substring.
#[must_use]
pub fn decode_method_call(body: &str) -> Option<MethodCall> {
    let method = between(body, "<methodName>", "</methodName>")?.trim();
    let params = between(body, "<string>", "</string>")
        .map_or(Ok(serde_json::Value::Null), serde_json::from_str)
        .ok()?;
    Some(MethodCall {
        method: SmolStr::new(method),
        params,
    })
}

#[must_use]
pub fn is_fault(body: &str) -> bool {
    body.contains(FAULT_MARKER)
}

/// Render a `methodResponse` carrying a struct of string members.
#[must_use]
pub fn render_struct_response(members: &[(&str, &str)]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodResponse><params><param><value><struct>");
    push_members(&mut out, members);
    out.push_str("</struct></value></param></params></methodResponse>");
    out
}

/// Render a fault `methodResponse`.
#[must_use]
pub fn render_fault(message: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodResponse><fault><value><struct>");
    push_members(&mut out, &[("status", "error"), ("message", message)]);
    out.push_str("</struct></value></fault></methodResponse>");
    out
}

fn push_members(out: &mut String, members: &[(&str, &str)]) {
    for (name, value) in members {
        out.push_str("<member><name>");
        push_escaped(out, name);
        out.push_str("</name><value><string>");
        push_escaped(out, value);
        out.push_str("</string></value></member>");
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_call_layout() {
        let body = encode_method_call("motors", &json!({ "on": true }));
        assert_eq!(
            body,
            "<?xml version=\"1.0\"?>\n\
             <methodCall>\n  \
             <methodName>motors</methodName>\n  \
             <params>\n    \
             <param><value><string>{\"on\":true}</string></value></param>\n  \
             </params>\n\
             </methodCall>"
        );
    }

    #[test]
    fn decode_recovers_method_and_params() {
        let body = encode_method_call("sendGcode", &json!({ "line": "G1 X10", "user": "ana" }));
        let call = decode_method_call(&body).expect("decode");
        assert_eq!(call.method, "sendGcode");
        assert_eq!(call.params["line"], "G1 X10");
        assert_eq!(call.params["user"], "ana");
    }

    #[test]
    fn fault_documents_are_detected() {
        assert!(is_fault(&render_fault("Metodo desconocido")));
        assert!(!is_fault(&render_struct_response(&[("status", "ok")])));
    }

    #[test]
    fn struct_members_are_escaped() {
        let xml = render_struct_response(&[("message", "a<b & c")]);
        assert!(xml.contains("<string>a&lt;b &amp; c</string>"));
    }
}
