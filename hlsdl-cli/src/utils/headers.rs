use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{info, warn};

/// Splits `Name: Value` and adds it to `headers`; malformed input is logged and skipped.
fn parse_and_add_header(headers: &mut HeaderMap, header_str: &str) {
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(
            "Invalid header format: '{}'. Expected 'Name: Value'",
            header_str
        );
        return;
    };
    let (name, value) = (name.trim(), value.trim());

    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!("Invalid header name: '{}'", name);
        return;
    };

    let Ok(header_value) = HeaderValue::from_str(value) else {
        warn!("Invalid header value for '{}'", name);
        return;
    };

    info!("Adding header: {}", name);
    headers.append(header_name, header_value);
}

/// Parses repeated `--header` arguments.
pub fn parse_headers(header_strings: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for header_str in header_strings {
        parse_and_add_header(&mut headers, header_str);
    }

    headers
}
