pub type Headers = Vec<(String, String)>;

/// Headers that describe one hop or carry downstream credentials; never forwarded.
const NON_FORWARDABLE: &[&str] = &[
    "authorization",
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "x-api-key",
];

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn is_forwardable(name: &str) -> bool {
    !NON_FORWARDABLE
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(name))
}

/// Copies the end-to-end headers of an `http::HeaderMap`.
pub fn forwardable_headers(map: &http::HeaderMap) -> Headers {
    map.iter()
        .filter(|(name, _)| is_forwardable(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        header_set(&mut headers, "content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(header_get(&headers, "CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn credentials_and_hop_headers_are_dropped() {
        let mut map = http::HeaderMap::new();
        map.insert("authorization", "Bearer downstream".parse().unwrap());
        map.insert("connection", "keep-alive".parse().unwrap());
        map.insert("content-type", "application/json".parse().unwrap());
        let headers = forwardable_headers(&map);
        assert_eq!(
            headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
    }
}
