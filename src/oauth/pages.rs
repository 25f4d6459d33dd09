//! HTML pages rendered at the end of a browser login
//!
//! The success page is the one place the internal token is shown to the end
//! user. It is rendered once; the gateway keeps no copy of the token itself.

use chrono::{DateTime, Utc};

/// Escape text for inclusion in HTML element content or attribute values
#[must_use]
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Page showing the freshly minted internal token
#[must_use]
pub fn success_page(login: &str, token: &str, expires_at: u64) -> String {
    let login = escape_html(login);
    let token = escape_html(token);
    let expires = i64::try_from(expires_at)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string());

    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>Authentication Successful</title>
    <meta name="referrer" content="no-referrer">
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 640px;
            margin: 50px auto;
            padding: 20px;
        }}
        .success {{ background: #d4edda; color: #155724; padding: 1rem 1.5rem; border-radius: 8px; }}
        .token {{ background: #f8f9fa; padding: 10px; font-family: monospace; word-break: break-all; }}
    </style>
</head>
<body>
    <div class="success">
        <h1>Authentication Successful</h1>
        <p>Welcome <strong>{login}</strong>.</p>
        <p>Your gateway access token (valid until {expires}):</p>
        <div class="token">{token}</div>
        <p>Send it with every tool call: <code>Authorization: Bearer &lt;token&gt;</code></p>
        <p>This token is shown only once.</p>
    </div>
</body>
</html>"#)
}

/// Page shown when the login flow fails
#[must_use]
pub fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);

    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>Authentication Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 640px;
            margin: 50px auto;
            padding: 20px;
        }}
        .failure {{ background: #f8d7da; color: #721c24; padding: 1rem 1.5rem; border-radius: 8px; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="failure">
        <h1>Authentication Failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
    </div>
</body>
</html>"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_page_contains_token_and_escaped_login() {
        let page = success_page("<script>alert(1)</script>", "eyJ.abc.def", 1_700_000_000);

        assert!(page.contains("eyJ.abc.def"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("2023-11-14"));
    }

    #[test]
    fn error_page_escapes_description() {
        let page = error_page("access_denied", "User said \"no\" & left");
        assert!(page.contains("User said &quot;no&quot; &amp; left"));
        assert!(page.contains("Error: access_denied"));
    }
}
