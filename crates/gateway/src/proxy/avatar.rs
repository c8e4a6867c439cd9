//! Avatar path handling for proxied chat UIs.
//!
//! Upstream consoles reference avatars at `/avatar/...`, which would
//! resolve against the proxy's own origin root. Metadata responses and
//! WebSocket frames get those paths repointed under `/chat/{slug}`;
//! missing avatars get a deterministic placeholder instead of a broken
//! image.

use serde_json::Value;

/// Rewrite `avatarUrl` in an avatar metadata response. Returns `None`
/// when the body is not the expected shape, in which case it is forwarded
/// untouched.
pub fn rewrite_meta(content: &[u8], slug: &str, query: Option<&str>) -> Option<Vec<u8>> {
    let mut payload: Value = serde_json::from_slice(content).ok()?;
    let obj = payload.as_object_mut()?;
    let avatar_url = obj.get("avatarUrl")?.as_str()?;
    if !avatar_url.starts_with("/avatar/") {
        return None;
    }

    let mut rewritten = format!("/chat/{slug}{avatar_url}");
    if let Some(query) = query {
        if !query.is_empty() {
            rewritten = format!("{rewritten}?{query}");
        }
    }
    obj.insert("avatarUrl".to_string(), Value::String(rewritten));
    serde_json::to_vec(&payload).ok()
}

/// Recursively repoint every string value starting with `/avatar/`.
pub fn rewrite_paths(value: &mut Value, slug: &str) {
    match value {
        Value::String(s) => {
            if s.starts_with("/avatar/") {
                *s = format!("/chat/{slug}{s}");
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_paths(item, slug);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_paths(item, slug);
            }
        }
        _ => {}
    }
}

/// 96x96 rounded placeholder bearing the slug's uppercase initial, served
/// when the upstream has no avatar for a non-metadata request.
pub fn fallback_svg(slug: &str) -> String {
    let label: String = slug
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "A".to_string());
    format!(
        concat!(
            "<svg xmlns='http://www.w3.org/2000/svg' width='96' height='96' viewBox='0 0 96 96'>",
            "<rect width='96' height='96' rx='48' fill='#2f3747'/>",
            "<text x='50%' y='54%' dominant-baseline='middle' text-anchor='middle' ",
            "font-family='system-ui, -apple-system, Segoe UI, Roboto, sans-serif' ",
            "font-size='42' fill='#ffffff'>",
            "{label}</text></svg>",
        ),
        label = label,
    )
}
