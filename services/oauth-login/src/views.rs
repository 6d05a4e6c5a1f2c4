//! Minimal HTML pages: signup form, error page, landing page
//!
//! Every interpolated value passes through `html_escape`; profile fields come
//! from a remote provider and must be treated as hostile.

use axum::http::StatusCode;
use axum::response::Html;
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::handoff::SignupForm;
use crate::session::SessionUser;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
        text(title)
    ))
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{name}\" value=\"{}\">\n",
        attr(value)
    )
}

/// Account creation form for a first-time remote user.
///
/// Carries the signed hand-off as hidden fields and the user's editable
/// choices prefilled from `form`. `message` is shown above the form after a
/// validation failure.
pub fn signup_page(form: &SignupForm, message: Option<&str>) -> Html<String> {
    let mut body = String::from("<h1>Finish creating your account</h1>\n");
    if let Some(message) = message {
        body.push_str(&format!("<p class=\"error\">{}</p>\n", text(message)));
    }
    body.push_str("<form method=\"post\" action=\"/oauth/signup\">\n");
    for (name, value) in [
        ("access_token", &form.access_token),
        ("remote_username", &form.remote_username),
        ("remote_display_name", &form.remote_display_name),
        ("remote_email", &form.remote_email),
        ("remote_user_id", &form.remote_user_id),
        ("provider", &form.provider),
        ("client_id", &form.client_id),
        ("integrity_hash", &form.integrity_hash),
    ] {
        body.push_str(&hidden(name, value));
    }
    body.push_str(&format!(
        "<label>Username <input type=\"text\" name=\"username\" value=\"{}\" required></label>\n\
         <label>Display name <input type=\"text\" name=\"alias\" value=\"{}\"></label>\n\
         <label>Email <input type=\"email\" name=\"email\" value=\"{}\"></label>\n\
         <label>Password (optional) <input type=\"password\" name=\"password\"></label>\n\
         <button type=\"submit\">Create account</button>\n</form>\n",
        attr(&form.username),
        attr(&form.alias),
        attr(&form.email),
    ));
    page("Create account", &body)
}

pub fn error_page(status: StatusCode, message: &str) -> Html<String> {
    let title = status.canonical_reason().unwrap_or("Error");
    page(
        title,
        &format!(
            "<h1>{}</h1>\n<p>{}</p>\n<p><a href=\"/\">Home</a></p>\n",
            text(title),
            text(message)
        ),
    )
}

/// Landing page listing login links, or who is signed in.
pub fn home_page(user: Option<&SessionUser>, providers: &[String]) -> Html<String> {
    let body = match user {
        Some(user) => format!("<p>Signed in as <strong>{}</strong>.</p>\n", text(&user.username)),
        None => {
            let mut links = String::from("<p>Not signed in.</p>\n<ul>\n");
            for name in providers {
                links.push_str(&format!(
                    "<li><a href=\"/oauth/{}\">Log in with {}</a></li>\n",
                    attr(name),
                    text(name)
                ));
            }
            links.push_str("</ul>\n");
            links
        }
    };
    page("Home", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_page_escapes_remote_values() {
        let form = SignupForm {
            remote_display_name: "\"><script>alert(1)</script>".into(),
            alias: "<b>ana</b>".into(),
            integrity_hash: "abc123".into(),
            ..SignupForm::default()
        };
        let Html(html) = signup_page(&form, Some("<i>taken</i>"));
        assert!(!html.contains("<script>"), "got: {html}");
        assert!(!html.contains("<b>ana</b>"));
        assert!(!html.contains("<i>taken</i>"));
        assert!(html.contains("&lt;i&gt;taken&lt;/i&gt;"));
        assert!(html.contains("name=\"integrity_hash\" value=\"abc123\""));
        assert!(html.contains("action=\"/oauth/signup\""));
    }

    #[test]
    fn home_page_shows_user_or_links() {
        let Html(anon) = home_page(None, &["acme".into(), "slack".into()]);
        assert!(anon.contains("href=\"/oauth/acme\""));
        assert!(anon.contains("href=\"/oauth/slack\""));

        let user = SessionUser {
            id: 1,
            username: "ana".into(),
        };
        let Html(signed_in) = home_page(Some(&user), &[]);
        assert!(signed_in.contains("Signed in as <strong>ana</strong>"));
    }

    #[test]
    fn error_page_uses_status_reason() {
        let Html(html) = error_page(StatusCode::NOT_FOUND, "Unknown login provider.");
        assert!(html.contains("<h1>Not Found</h1>"));
        assert!(html.contains("Unknown login provider."));
    }
}
