use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::info;

use crate::error::AppError;

/// Parse a header string in format "Name: Value"
fn parse_header(header_str: &str) -> Result<(HeaderName, HeaderValue), AppError> {
    let Some((name, value)) = header_str.split_once(':') else {
        return Err(AppError::ParseError(format!(
            "Invalid header format: '{header_str}'. Expected 'Name: Value'"
        )));
    };
    let (name, value) = (name.trim(), value.trim());

    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| AppError::ParseError(format!("Invalid header name: '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| AppError::ParseError(format!("Invalid header value: '{value}'")))?;
    Ok((header_name, header_value))
}

/// Parse a collection of header strings into a HeaderMap
pub fn parse_headers(header_strings: &[String]) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    for header_str in header_strings {
        let (name, value) = parse_header(header_str)?;
        info!("Adding push header: {}", name);
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers =
            parse_headers(&["X-Token:  abc ".to_string(), "Origin: a:b".to_string()]).unwrap();
        assert_eq!(headers["x-token"], "abc");
        assert_eq!(headers["origin"], "a:b");
    }

    #[test]
    fn test_invalid_header() {
        assert!(parse_headers(&["no separator".to_string()]).is_err());
        assert!(parse_headers(&["bad name: v".to_string()]).is_err());
    }
}
