//! Wire parsing of SIP messages

use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{digit1, space0, space1},
    combinator::{all_consuming, map_res, rest},
    sequence::tuple,
};

use crate::core::headers::Headers;
use crate::core::message::{Method, SipMessage, SipRequestMessage, SipResponse};
use crate::error::{Error, Result};

fn sip_version(input: &str) -> IResult<&str, &str> {
    tag("SIP/2.0")(input)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

/// `SIP/2.0 <code> <reason>`
fn status_line(input: &str) -> IResult<&str, (u16, &str)> {
    let (input, (_, _, code, _, reason)) = tuple((
        sip_version,
        space1,
        map_res(digit1, |digits: &str| digits.parse::<u16>()),
        space0,
        rest,
    ))(input)?;
    Ok((input, (code, reason.trim())))
}

/// `<method> <uri> SIP/2.0`
fn request_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, (method, _, uri, _, _)) = all_consuming(tuple((
        take_while1(is_token_char),
        space1,
        take_till1(|c: char| c == ' ' || c == '\t'),
        space1,
        sip_version,
    )))(input)?;
    Ok((input, (method, uri)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut current: Option<(String, String)> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current
                .as_mut()
                .ok_or_else(|| Error::parse("continuation line before the first header"))?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.push(name, value);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::parse(format!("malformed header line '{}'", line)))?;
        if name.trim().is_empty() {
            return Err(Error::parse(format!("empty header name in '{}'", line)));
        }
        current = Some((name.trim().to_string(), value.trim().to_string()));
    }
    if let Some((name, value)) = current {
        headers.push(name, value);
    }
    Ok(headers)
}

/// Parse a complete SIP message (one datagram)
pub fn parse_message(data: &[u8]) -> Result<SipMessage> {
    let (head_end, body_start) = match find(data, b"\r\n\r\n") {
        Some(index) => (index, index + 4),
        None => match find(data, b"\n\n") {
            Some(index) => (index, index + 2),
            None => return Err(Error::parse("missing end of headers")),
        },
    };

    let head = std::str::from_utf8(&data[..head_end])
        .map_err(|e| Error::parse(format!("headers are not valid UTF-8: {}", e)))?;
    let mut lines = head
        .trim_start_matches(['\r', '\n'])
        .split('\n')
        .map(|line| line.trim_end_matches('\r'));

    let start_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| Error::parse("empty message"))?;
    let headers = parse_headers(lines)?;

    let mut body = &data[body_start..];
    if let Some(length) = headers.get("Content-Length") {
        let length: usize = length
            .parse()
            .map_err(|_| Error::parse(format!("invalid Content-Length '{}'", length)))?;
        if length > body.len() {
            return Err(Error::parse(format!(
                "truncated body: expected {} bytes, got {}",
                length,
                body.len()
            )));
        }
        body = &body[..length];
    }
    let body = Bytes::copy_from_slice(body);

    if start_line.starts_with("SIP/") {
        let (_, (code, reason)) = status_line(start_line)
            .map_err(|e| Error::parse(format!("invalid status line '{}': {}", start_line, e)))?;
        if !(100..=699).contains(&code) {
            return Err(Error::parse(format!("status code out of range: {}", code)));
        }
        Ok(SipMessage::Response(SipResponse {
            code,
            reason: reason.to_string(),
            headers,
            body,
        }))
    } else {
        let (_, (method, uri)) = request_line(start_line)
            .map_err(|e| Error::parse(format!("invalid request line '{}': {}", start_line, e)))?;
        Ok(SipMessage::Request(SipRequestMessage {
            method: method.parse::<Method>()?,
            uri: uri.to_string(),
            headers,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_with_folded_header_and_body() {
        let data = concat!(
            "SIP/2.0 200 OK\r\n",
            "Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKx\r\n",
            "Contact: <sip:alice@10.0.0.1:5060>;expires=300,\r\n",
            " <sip:alice@10.0.0.2:5060>;expires=100\r\n",
            "l: 4\r\n",
            "\r\n",
            "bodyEXTRA",
        );
        let SipMessage::Response(response) = parse_message(data.as_bytes()).unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.code, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.via_branch(), Some("z9hG4bKx"));
        assert_eq!(response.headers.get_list("Contact").len(), 2);
        assert_eq!(&response.body[..], b"body");
    }

    #[test]
    fn parses_request() {
        let data = b"OPTIONS sip:alice@10.0.0.1 SIP/2.0\r\nCall-ID: x\r\nContent-Length: 0\r\n\r\n";
        let SipMessage::Request(request) = parse_message(data).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.method, Method::Other("OPTIONS".into()));
        assert_eq!(request.uri, "sip:alice@10.0.0.1");
        assert_eq!(request.headers.get("call-id"), Some("x"));
    }

    #[test]
    fn accepts_bare_line_feeds_and_empty_reason() {
        let SipMessage::Response(response) = parse_message(b"SIP/2.0 202\nCall-ID: y\n\n").unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(response.code, 202);
        assert_eq!(response.reason, "");
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(parse_message(b"SIP/2.0 200 OK\r\nCall-ID: x\r\n").is_err());
        assert!(parse_message(b"SIP/2.0 999 Nope\r\n\r\n").is_err());
        assert!(parse_message(b"SIP/2.0 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
        assert!(parse_message(b"garbage\r\n\r\n").is_err());
        assert!(parse_message(b"SIP/2.0 200 OK\r\nno colon here\r\n\r\n").is_err());
    }
}
