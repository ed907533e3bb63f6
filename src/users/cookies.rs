use axum::http::HeaderMap;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Session cookie attributes: server-only, encrypted transport assumed.
pub fn session_cookie(name: &str, token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0", name)
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .into_iter()
        .flat_map(|header| header.split(';'))
        .find_map(|cookie| {
            let mut split = cookie.trim().splitn(2, '=');
            match (split.next(), split.next()) {
                (Some(n), Some(v)) if n == name => Some(v),
                _ => None,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn finds_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            "theme=dark; accessToken=abc.def.ghi; refreshToken=xyz".parse().unwrap(),
        );
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE), Some("abc.def.ghi"));
        assert_eq!(cookie_value(&headers, REFRESH_COOKIE), Some("xyz"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn no_cookie_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE), None);
    }

    #[test]
    fn set_and_clear_are_http_only_and_secure() {
        let set = session_cookie(ACCESS_COOKIE, "tok", 3600);
        assert!(set.starts_with("accessToken=tok;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("Secure"));
        assert!(set.contains("Max-Age=3600"));

        let clear = clear_cookie(REFRESH_COOKIE);
        assert!(clear.starts_with("refreshToken=;"));
        assert!(clear.contains("Max-Age=0"));
    }
}
