//! HTML rewriting for the proxied chat UI.
//!
//! The upstream console boots from a handful of well-known globals. The
//! proxy replaces the empty base-path assignment (the sentinel) with a
//! script that repoints the UI at `/chat/{slug}`, clears stale device-auth
//! state, writes the gateway settings so the browser reconnects through
//! the proxy, and keeps assistant avatars loading via the proxied path.
//! HTML without the sentinel ships unmodified.

use once_cell::sync::Lazy;
use regex::Regex;

/// Empty base-path assignment the upstream console ships with.
pub const BASE_PATH_SENTINEL: &str = r#"window.__AGENT_CONSOLE_BASE_PATH__="";"#;

/// Assistant-avatar constant pointing at `/avatar/*`; blanked so the
/// injected observer owns avatar resolution.
static ASSISTANT_AVATAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"window\.__AGENT_CONSOLE_ASSISTANT_AVATAR__=("|')/avatar/[^"']*("|')"#)
        .expect("avatar constant regex")
});

const ASSISTANT_AVATAR_BLANK: &str = r#"window.__AGENT_CONSOLE_ASSISTANT_AVATAR__="""#;

/// Script substituted for the sentinel.
pub fn build_inject_script(slug: &str, token: Option<&str>) -> String {
    let base_path = format!("/chat/{slug}");
    let token_json =
        serde_json::to_string(token.unwrap_or_default()).unwrap_or_else(|_| "\"\"".to_string());

    format!(
        concat!(
            r#"window.__AGENT_CONSOLE_BASE_PATH__="{base_path}";"#,
            "(function(){{",
            r#"try{{localStorage.removeItem("console.device.auth.v1");"#,
            r#"localStorage.removeItem("console-device-identity-v1");}}catch(e){{}}"#,
            "try{{",
            r#"const k="console.settings.v1";"#,
            "const raw=localStorage.getItem(k);",
            "let v={{}};",
            "try{{v=raw?JSON.parse(raw):{{}};}}catch{{}}",
            r#"v.gatewayUrl=(location.protocol==="https:"?"wss":"ws")+"://"+location.host+"{base_path}/";"#,
            "v.token={token_json};",
            "localStorage.setItem(k,JSON.stringify(v));",
            "}}catch(e){{}}",
            "try{{",
            r#"const p="{base_path}";"#,
            "const scan=()=>{{",
            r#"document.querySelectorAll('img.chat-avatar.assistant[src^="/avatar/"]').forEach((img)=>{{"#,
            r#"const s=img.getAttribute("src")||"";"#,
            r#"if(s.startsWith("/avatar/"))img.setAttribute("src",p+s);"#,
            "}});",
            "}};",
            "scan();",
            "const mo=new MutationObserver(()=>scan());",
            r#"mo.observe(document.documentElement,{{subtree:true,childList:true,attributes:true,attributeFilter:["src"]}});"#,
            r#"window.addEventListener("beforeunload",()=>mo.disconnect(),{{once:true}});"#,
            "}}catch(e){{}}",
            "}})();",
        ),
        base_path = base_path,
        token_json = token_json,
    )
}

/// Rewrite one upstream HTML document for serving under `/chat/{slug}`.
pub fn rewrite_html(html: &str, slug: &str, token: Option<&str>) -> String {
    let injected = html.replace(BASE_PATH_SENTINEL, &build_inject_script(slug, token));
    ASSISTANT_AVATAR_RE
        .replace_all(&injected, ASSISTANT_AVATAR_BLANK)
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_replaced_with_injected_script() {
        let html = format!("<html><script>{BASE_PATH_SENTINEL}</script></html>");
        let out = rewrite_html(&html, "metrics", Some("tok-1"));

        assert!(!out.contains(BASE_PATH_SENTINEL));
        assert!(out.contains(r#"window.__AGENT_CONSOLE_BASE_PATH__="/chat/metrics";"#));
        assert!(out.contains(r#"+"/chat/metrics/";"#));
        assert!(out.contains(r#"v.token="tok-1";"#));
        assert!(out.contains("new MutationObserver"));
    }

    #[test]
    fn token_is_json_escaped() {
        let html = format!("<script>{BASE_PATH_SENTINEL}</script>");
        let out = rewrite_html(&html, "metrics", Some(r#"we"ird"#));
        assert!(out.contains(r#"v.token="we\"ird";"#));

        let out = rewrite_html(&html, "metrics", None);
        assert!(out.contains(r#"v.token="";"#));
    }

    #[test]
    fn missing_sentinel_passes_through_unmodified() {
        let html = "<html><body>no globals here</body></html>";
        assert_eq!(rewrite_html(html, "metrics", Some("t")), html);
    }

    #[test]
    fn assistant_avatar_constant_is_blanked() {
        let html = r#"<script>window.__AGENT_CONSOLE_ASSISTANT_AVATAR__="/avatar/bot.png";</script>"#;
        let out = rewrite_html(html, "metrics", None);
        assert!(out.contains(r#"window.__AGENT_CONSOLE_ASSISTANT_AVATAR__="";"#));
        assert!(!out.contains("/avatar/bot.png"));

        let single = r#"<script>window.__AGENT_CONSOLE_ASSISTANT_AVATAR__='/avatar/a b.png';</script>"#;
        let out = rewrite_html(single, "metrics", None);
        assert!(!out.contains("/avatar/a b.png"));
    }
}
