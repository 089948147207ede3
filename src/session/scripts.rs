//! Injected JavaScript expressions.
//!
//! Every user-supplied value reaches a script as a JSON-embedded literal
//! (via `serde_json::to_string`), never by raw string concatenation. The
//! expressions themselves are opaque to the rest of the coordinator; any
//! protocol-native primitive with the same observable result could replace
//! them.

use serde_json::json;

/// JSON-encode a value for safe embedding in a script.
fn literal<T: serde::Serialize>(value: &T) -> String {
    // Serialization of plain strings/maps/numbers cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Expression yielding the page's origin.
pub const ORIGIN: &str = "window.location.origin";

/// Expression that halts further page loading.
pub const STOP_LOADING: &str = "window.stop()";

/// Render the document, or a selected element, as HTML.
///
/// With a selector, the element's `outerHTML` (or `null` when absent). With
/// a depth, the document is cloned down to that many levels of children.
/// Otherwise the full `documentElement.outerHTML`.
pub fn dom_snapshot(selector: Option<&str>, depth: Option<u32>) -> String {
    match (selector, depth) {
        (Some(selector), _) => format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.outerHTML : null; }})()",
            sel = literal(&selector)
        ),
        (None, Some(depth)) => format!(
            r#"(() => {{
  const prune = (node, depth) => {{
    const copy = node.cloneNode(false);
    if (depth > 0) {{
      for (const child of node.children) copy.appendChild(prune(child, depth - 1));
    }}
    return copy;
  }};
  return prune(document.documentElement, {depth}).outerHTML;
}})()"#,
            depth = depth
        ),
        (None, None) => "document.documentElement.outerHTML".to_string(),
    }
}

/// Bounding box of the first element matching `selector`, as a JSON string,
/// or `null` when nothing matches.
pub fn bounding_box(selector: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return null;
  const r = el.getBoundingClientRect();
  return JSON.stringify({{ x: r.x, y: r.y, width: r.width, height: r.height }});
}})()"#,
        sel = literal(&selector)
    )
}

/// Interactive element picker.
///
/// Resolves (as an awaited promise) to a JSON string describing the element
/// the user clicks: tag, id, classes, a best-effort CSS selector, trimmed
/// text, attributes, and bounding box. Rejects on timeout.
pub fn element_picker(timeout_ms: u64) -> String {
    format!(
        r#"new Promise((resolve, reject) => {{
  const timer = setTimeout(() => {{
    cleanup();
    reject(new Error('element selection timed out'));
  }}, {timeout_ms});
  const describe = (el) => {{
    const parts = [];
    for (let node = el; node && node.nodeType === 1 && parts.length < 6; node = node.parentElement) {{
      let part = node.tagName.toLowerCase();
      if (node.id) {{ parts.unshift(part + '#' + node.id); break; }}
      if (node.classList.length) part += '.' + node.classList[0];
      parts.unshift(part);
    }}
    return parts.join(' > ');
  }};
  const onClick = (event) => {{
    event.preventDefault();
    event.stopPropagation();
    cleanup();
    const el = event.target;
    const r = el.getBoundingClientRect();
    const attributes = {{}};
    for (const a of el.attributes) attributes[a.name] = a.value;
    resolve(JSON.stringify({{
      tagName: el.tagName.toLowerCase(),
      id: el.id || null,
      classNames: Array.from(el.classList),
      selector: describe(el),
      text: (el.textContent || '').trim().slice(0, 200) || null,
      attributes,
      boundingBox: {{ x: r.x, y: r.y, width: r.width, height: r.height }}
    }}));
  }};
  const cleanup = () => {{
    clearTimeout(timer);
    document.removeEventListener('click', onClick, true);
    document.documentElement.style.cursor = '';
  }};
  document.documentElement.style.cursor = 'crosshair';
  document.addEventListener('click', onClick, true);
}})"#,
        timeout_ms = timeout_ms
    )
}

/// In-page HTTP fetch, carrying the page's cookies.
///
/// Resolves to a JSON string with status, headers, and body text.
pub fn page_fetch(
    url: &str,
    method: Option<&str>,
    headers: Option<&serde_json::Map<String, serde_json::Value>>,
    body: Option<&str>,
) -> String {
    let init = json!({
        "method": method.unwrap_or("GET"),
        "headers": headers.cloned().unwrap_or_default(),
        "body": body,
        "credentials": "include",
    });
    format!(
        r#"(async () => {{
  const response = await fetch({url}, {init});
  const text = await response.text();
  return JSON.stringify({{
    status: response.status,
    statusText: response.statusText,
    headers: Object.fromEntries(response.headers.entries()),
    body: text
  }});
}})()"#,
        url = literal(&url),
        init = init
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_json_embedded() {
        let script = dom_snapshot(Some(r#"a[href="x"] '); alert(1); ('"#), None);
        // The selector must appear as an escaped JSON string literal, not
        // as raw code.
        assert!(script.contains(r#"\"x\""#));
        assert!(!script.contains(r#"querySelector(a[href"#));
    }

    #[test]
    fn test_dom_snapshot_variants() {
        assert_eq!(
            dom_snapshot(None, None),
            "document.documentElement.outerHTML"
        );
        assert!(dom_snapshot(None, Some(2)).contains("prune(document.documentElement, 2)"));
        assert!(dom_snapshot(Some("#app"), Some(2)).contains(r##""#app""##));
    }

    #[test]
    fn test_fetch_defaults_and_credentials() {
        let script = page_fetch("https://api.example/x", None, None, None);
        assert!(script.contains(r#""method":"GET""#));
        assert!(script.contains(r#""credentials":"include""#));
        assert!(script.contains(r#"fetch("https://api.example/x""#));
    }

    #[test]
    fn test_fetch_embeds_body_and_headers() {
        let mut headers = serde_json::Map::new();
        headers.insert("x-token".to_string(), json!("abc"));
        let script = page_fetch(
            "https://api.example/x",
            Some("POST"),
            Some(&headers),
            Some(r#"{"a":1}"#),
        );
        assert!(script.contains(r#""method":"POST""#));
        assert!(script.contains(r#""x-token":"abc""#));
        assert!(script.contains(r#""body":"{\"a\":1}""#));
    }

    #[test]
    fn test_element_picker_carries_timeout() {
        let script = element_picker(12_500);
        assert!(script.contains("12500"));
        assert!(script.contains("new Promise"));
    }
}
