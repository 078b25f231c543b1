use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const REDACTED: &str = "[REDACTED]";

fn password_param_regex() -> &'static Regex {
    static PASSWORD_PARAM: OnceLock<Regex> = OnceLock::new();
    PASSWORD_PARAM.get_or_init(|| {
        Regex::new(r"(?i)\b(password|pwd)=([^\s&;]+)").expect("password parameter pattern is valid")
    })
}

/// Sanitize a connection URL by removing the password
pub fn sanitize_connection_url(url: &str) -> String {
    // File-based URLs carry no credentials and `sqlite::memory:` is not a valid URL.
    if url.starts_with("sqlite:") {
        return url.to_string();
    }

    let parsed = if url.contains("://") {
        Url::parse(url).ok()
    } else {
        None
    };

    let sanitized = match parsed {
        Some(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some(REDACTED));
            // URL-decode the marker to keep it readable in logs
            parsed.to_string().replace("%5BREDACTED%5D", REDACTED)
        }
        Some(_) => url.to_string(),
        None => match url.split_once('@') {
            // user:password@host style strings without a scheme
            Some((user_pass, rest)) if user_pass.contains(':') => {
                let user = user_pass.split(':').next().unwrap_or_default();
                format!("{user}:{REDACTED}@{rest}")
            }
            _ => url.to_string(),
        },
    };

    password_param_regex()
        .replace_all(&sanitized, format!("$1={REDACTED}").as_str())
        .to_string()
}
