//! HTML consent page for OAuth authorization.
//!
//! The page collects the subscriber's API key and round-trips every
//! authorization request parameter through hidden form fields, so the POST
//! handler sees exactly what the GET handler saw.

/// Render the authorization consent page.
///
/// All parameters are HTML-escaped to prevent XSS.
#[allow(clippy::too_many_arguments)]
pub fn render_consent_page(
    client_name: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
    code_challenge_method: &str,
    scope: &str,
    error_message: Option<&str>,
) -> String {
    let error_html = error_message
        .map(|msg| {
            format!(
                r#"<div style="background:#fee;border:1px solid #c00;color:#c00;padding:10px;border-radius:4px;margin-bottom:16px">{}</div>"#,
                html_escape(msg)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorize - GEO MCP</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 24px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin-bottom: 6px; color: #333; }}
input[type="password"] {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }}
input[type="password"]:focus {{ outline: none; border-color: #4a90d9; box-shadow: 0 0 0 2px rgba(74,144,217,0.2); }}
button {{ width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }}
button:hover {{ background: #357abd; }}
</style>
</head>
<body>
<div class="card">
<h1>GEO MCP</h1>
<p class="subtitle"><strong>{client_name}</strong> is requesting access to your account</p>
{error_html}
<form method="POST" action="/oauth/authorize">
<input type="hidden" name="client_id" value="{client_id_escaped}">
<input type="hidden" name="redirect_uri" value="{redirect_uri_escaped}">
<input type="hidden" name="state" value="{state_escaped}">
<input type="hidden" name="code_challenge" value="{code_challenge_escaped}">
<input type="hidden" name="code_challenge_method" value="{code_challenge_method_escaped}">
<input type="hidden" name="scope" value="{scope_escaped}">
<label for="api_key">API Key</label>
<input type="password" id="api_key" name="api_key" placeholder="sk_live_..." required autofocus>
<button type="submit">Approve</button>
</form>
</div>
</body>
</html>"#,
        client_name = html_escape(client_name),
        error_html = error_html,
        client_id_escaped = html_escape(client_id),
        redirect_uri_escaped = html_escape(redirect_uri),
        state_escaped = html_escape(state),
        code_challenge_escaped = html_escape(code_challenge),
        code_challenge_method_escaped = html_escape(code_challenge_method),
        scope_escaped = html_escape(scope),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("xss")</script>"#),
            "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_render_without_error() {
        let html = render_consent_page(
            "Test App",
            "client123",
            "http://localhost/cb",
            "state1",
            "challenge1",
            "S256",
            "mcp:tools",
            None,
        );
        assert!(html.contains("Test App"));
        assert!(html.contains("client123"));
        assert!(html.contains(r#"name="code_challenge_method" value="S256""#));
        assert!(!html.contains("background:#fee"));
    }

    #[test]
    fn test_render_with_error() {
        let html = render_consent_page(
            "App",
            "id",
            "uri",
            "st",
            "ch",
            "S256",
            "sc",
            Some("Invalid API key"),
        );
        assert!(html.contains("Invalid API key"));
        assert!(html.contains("background:#fee"));
    }

    #[test]
    fn test_render_escapes_injected_redirect() {
        let html = render_consent_page(
            "App",
            "id",
            r#""><script>steal()</script>"#,
            "",
            "",
            "",
            "mcp:tools",
            None,
        );
        assert!(!html.contains("<script>steal()"));
    }
}
