//! Request accessor helpers shared by plugins.

use http::{HeaderMap, Uri};

/// First occurrence of a query parameter's value.
pub fn get_query_value<'a>(url: &'a Uri, name: &str) -> Option<&'a str> {
    url.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            if let Some((k, v)) = pair.split_once('=') {
                if k == name {
                    Some(v.trim())
                } else {
                    None
                }
            } else if pair == name {
                Some("")
            } else {
                None
            }
        })
    })
}

/// Cookie lookup by name from the `Cookie` header.
pub fn get_cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookies = headers.get(http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        if k == name {
            Some(v)
        } else {
            None
        }
    })
}

/// Bearer token from the `Authorization` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// The absolute URL without its query string.
pub fn url_without_query(url: &Uri) -> String {
    match (url.scheme_str(), url.authority()) {
        (Some(scheme), Some(authority)) => {
            format!("{scheme}://{authority}{}", url.path())
        }
        _ => url.path().to_string(),
    }
}

/// Percent-decode a captured path segment. Invalid escapes are kept
/// verbatim, matching how lenient proxies treat client URLs.
pub fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or_default();
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(b' ');
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{AUTHORIZATION, COOKIE};

    #[test]
    fn test_query_value() {
        let uri: Uri = "https://api.example.com/x?a=1&key=abc&b".parse().unwrap();
        assert_eq!(get_query_value(&uri, "key"), Some("abc"));
        assert_eq!(get_query_value(&uri, "b"), Some(""));
        assert_eq!(get_query_value(&uri, "missing"), None);
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "session=1; key=abc".parse().unwrap());
        assert_eq!(get_cookie_value(&headers, "key"), Some("abc"));
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
        headers.insert(AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_url_without_query() {
        let uri: Uri = "https://api.example.com:8443/items/7?expand=all".parse().unwrap();
        assert_eq!(
            url_without_query(&uri),
            "https://api.example.com:8443/items/7"
        );
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }
}
