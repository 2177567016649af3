//! HTML Page Rendering
//!
//! The proxy serves exactly two pages: the sign-in page and a generic error
//! page. Both are assembled with string templates; every interpolated value
//! that can carry user or configuration input is escaped first.

use crate::config::ProxyConfig;

/// Renders the sign-in page.
///
/// `redirect` must already be sanitized by the caller. When `show_form` is
/// set (an htpasswd file is configured) the page carries the manual sign-in
/// form with the issued CSRF token.
pub fn sign_in_page(
    config: &ProxyConfig,
    redirect: &str,
    csrf_token: &str,
    show_form: bool,
) -> String {
    let provider = html_escape::encode_text(&config.provider_name);
    let prefix = &config.proxy_prefix;
    let redirect_attr = html_escape::encode_double_quoted_attribute(redirect);
    let csrf_attr = html_escape::encode_double_quoted_attribute(csrf_token);

    let message = if config.sign_in_message.is_empty() {
        String::new()
    } else {
        format!(
            "<p class=\"message\">{}</p>\n",
            html_escape::encode_text(&config.sign_in_message)
        )
    };

    let form = if show_form {
        format!(
            r#"<form method="post" action="{prefix}/sign_in" class="manual">
  <input type="hidden" name="rd" value="{redirect_attr}">
  <input type="hidden" name="csrf_token" value="{csrf_attr}">
  <label>Username <input type="text" name="username" autocomplete="username"></label>
  <label>Password <input type="password" name="password" autocomplete="current-password"></label>
  <button type="submit">Sign In with Username</button>
</form>
"#
        )
    } else {
        String::new()
    };

    let footer = if config.footer.is_empty() {
        format!(
            "Secured with authgate v{}",
            html_escape::encode_text(env!("CARGO_PKG_VERSION"))
        )
    } else {
        html_escape::encode_text(&config.footer).to_string()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Sign In</title>
</head>
<body>
<h1>Sign In</h1>
{message}<form method="get" action="{prefix}/start">
  <input type="hidden" name="rd" value="{redirect_attr}">
  <button type="submit">Sign in with {provider}</button>
</form>
{form}<footer>{footer}</footer>
</body>
</html>
"#
    )
}

/// Renders the generic error page.
pub fn error_page(status: u16, title: &str, message: &str) -> String {
    let title = html_escape::encode_text(title);
    let message = html_escape::encode_text(message);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{status} {title}</title>
</head>
<body>
<h1>{status} {title}</h1>
<p>{message}</p>
</body>
</html>
"#
    )
}
