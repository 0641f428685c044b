//! SIP URIs and Contact header entries
//!
//! Only the subset of RFC 3261 URI syntax that a SIP SIMPLE client puts on
//! the wire is modelled: `sip:` and `sips:` URIs with optional user info,
//! host (hostname, IPv4 or bracketed IPv6), port, URI parameters and
//! headers.
//!
//! ```rust
//! use sipsimple::core::uri::SipUri;
//!
//! let uri: SipUri = "sip:alice@example.com:5070;transport=tcp".parse().unwrap();
//! assert_eq!(uri.user.as_deref(), Some("alice"));
//! assert_eq!(uri.port, Some(5070));
//! assert_eq!(uri.parameter("transport"), Some(Some("tcp")));
//! assert_eq!(uri.to_string(), "sip:alice@example.com:5070;transport=tcp");
//! ```

use std::fmt;
use std::str::FromStr;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag_no_case, take_till, take_till1, take_while, take_while1},
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A `sip:` or `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    /// `sips:` scheme
    pub secure: bool,
    /// User part, if any
    pub user: Option<String>,
    /// Password part of the user info, if any
    pub password: Option<String>,
    /// Host name, IPv4 address or bracketed IPv6 reference
    pub host: String,
    /// Explicit port
    pub port: Option<u16>,
    /// URI parameters in order of appearance
    pub parameters: Vec<(String, Option<String>)>,
    /// URI headers in order of appearance
    pub headers: Vec<(String, String)>,
}

impl SipUri {
    /// Create a URI for `host` with no user part
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            user: None,
            password: None,
            host: host.into(),
            port: None,
            parameters: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add or replace a URI parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        let name = name.into();
        self.parameters.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.parameters.push((name, value.map(str::to_string)));
        self
    }

    /// Switch to the `sips:` scheme
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Look up a URI parameter. The outer option tells whether the parameter
    /// is present, the inner one whether it carries a value.
    pub fn parameter(&self, name: &str) -> Option<Option<&str>> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// `host[:port]`
    pub fn host_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// The URI reduced to scheme, user, host and port (the address-of-record form)
    pub fn without_parameters(&self) -> Self {
        Self {
            secure: self.secure,
            user: self.user.clone(),
            password: None,
            host: self.host.clone(),
            port: self.port,
            parameters: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Whether `other` designates the same contact: scheme, user, host and
    /// port must agree; parameters are ignored.
    pub fn matches_contact(&self, other: &SipUri) -> bool {
        self.secure == other.secure
            && self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
    }
}

type Parameters = Vec<(String, Option<String>)>;

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'
}

fn is_user_char(c: char) -> bool {
    c.is_ascii_graphic() && !"@:;?<>\"".contains(c)
}

fn is_param_char(c: char) -> bool {
    c.is_ascii_graphic() && !";?&=<>,\"".contains(c)
}

fn scheme(input: &str) -> IResult<&str, bool> {
    alt((value(true, tag_no_case("sips:")), value(false, tag_no_case("sip:"))))(input)
}

/// `user[:password]@`
fn userinfo(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    terminated(
        pair(
            take_while1(is_user_char),
            opt(preceded(char(':'), take_while(|c: char| c != '@' && is_user_char(c)))),
        ),
        char('@'),
    )(input)
}

fn host(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(delimited(
            char('['),
            take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
            char(']'),
        )),
        take_while1(is_host_char),
    ))(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    preceded(char(':'), map_res(digit1, |digits: &str| digits.parse::<u16>()))(input)
}

/// `;name[=value]` as found inside a URI
fn uri_parameter(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    preceded(
        char(';'),
        pair(take_while(is_param_char), opt(preceded(char('='), take_while(is_param_char)))),
    )(input)
}

/// `?name=value&name=value`
fn uri_headers(input: &str) -> IResult<&str, Vec<(&str, Option<&str>)>> {
    preceded(
        char('?'),
        separated_list0(
            char('&'),
            pair(take_while1(is_param_char), opt(preceded(char('='), take_while(is_param_char)))),
        ),
    )(input)
}

fn sip_uri(input: &str) -> IResult<&str, SipUri> {
    let (input, (secure, userinfo, host, port, parameters, headers)) = tuple((
        scheme,
        opt(userinfo),
        host,
        opt(port),
        many0(uri_parameter),
        opt(uri_headers),
    ))(input)?;
    let (user, password) = match userinfo {
        Some((user, password)) => (Some(user.to_string()), password.map(str::to_string)),
        None => (None, None),
    };
    Ok((
        input,
        SipUri {
            secure,
            user,
            password,
            host: host.to_string(),
            port,
            parameters: owned_parameters(parameters),
            headers: headers
                .unwrap_or_default()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.unwrap_or_default().to_string()))
                .collect(),
        },
    ))
}

fn owned_parameters(parameters: Vec<(&str, Option<&str>)>) -> Parameters {
    parameters
        .into_iter()
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
        .collect()
}

fn quoted_string(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c: char| c == '"'), char('"'))(input)
}

/// `;name[=value]` after a Contact address, whitespace tolerant
fn header_parameter(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    preceded(
        tuple((space0, char(';'), space0)),
        pair(
            take_while(is_param_char),
            opt(preceded(
                tuple((space0, char('='), space0)),
                alt((quoted_string, take_while(is_param_char))),
            )),
        ),
    )(input)
}

/// `["display name"] <uri>`
fn name_addr(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    pair(
        opt(alt((quoted_string, take_till1(|c: char| c == '<')))),
        preceded(space0, delimited(char('<'), take_till1(|c: char| c == '>'), char('>'))),
    )(input)
}

/// A bare URI; every `;` after it starts a header parameter
fn addr_spec(input: &str) -> IResult<&str, (Option<&str>, &str)> {
    map(take_till1(|c: char| c == ';' || c.is_whitespace()), |uri| (None, uri))(input)
}

fn contact(input: &str) -> IResult<&str, ((Option<&str>, &str), Vec<(&str, Option<&str>)>)> {
    all_consuming(terminated(
        pair(alt((name_addr, addr_spec)), many0(header_parameter)),
        space0,
    ))(input)
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &[(String, Option<String>)]) -> fmt::Result {
    for (name, value) in parameters {
        match value {
            Some(value) => write!(f, ";{}={}", name, value)?,
            None => write!(f, ";{}", name)?,
        }
    }
    Ok(())
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        all_consuming(sip_uri)(s.trim())
            .map(|(_, uri)| uri)
            .map_err(|e| Error::invalid_uri(s, format!("malformed URI: {}", e)))
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_parameters(f, &self.parameters)?;
        for (index, (name, value)) in self.headers.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", separator, name, value)?;
        }
        Ok(())
    }
}

impl Serialize for SipUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SipUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of a `Contact` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactHeader {
    pub display_name: Option<String>,
    pub uri: SipUri,
    /// Header parameters (`expires`, `q`, ...), not URI parameters
    pub parameters: Vec<(String, Option<String>)>,
}

impl ContactHeader {
    pub fn new(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
            parameters: Vec::new(),
        }
    }

    /// Value of the `expires` header parameter
    pub fn expires(&self) -> Option<u32> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("expires"))
            .and_then(|(_, v)| v.as_deref())
            .and_then(|v| v.parse().ok())
    }

    /// Parse a single contact entry
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (_, ((display_name, uri), parameters)) =
            contact(value).map_err(|e| Error::invalid_uri(value, format!("malformed Contact: {}", e)))?;
        let display_name = display_name.map(str::trim).filter(|name| !name.is_empty());
        Ok(Self {
            display_name: display_name.map(str::to_string),
            uri: uri.parse()?,
            parameters: owned_parameters(parameters),
        })
    }

    /// Parse a comma separated list of contacts. A wildcard (`*`) yields no entries.
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        split_header_list(value)
            .into_iter()
            .filter(|item| *item != "*")
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for ContactHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_parameters(f, &self.parameters)
    }
}

/// Split a header value on top level commas, honouring quoted strings and
/// angle brackets.
pub(crate) fn split_header_list(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for (index, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                items.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(value[start..].trim());
    items.retain(|item| !item.is_empty());
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_uri() {
        let uri: SipUri = "sips:bob:secret@[2001:db8::1]:5071;transport=tls;lr?subject=hi&priority=urgent"
            .parse()
            .unwrap();
        assert!(uri.secure);
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.password.as_deref(), Some("secret"));
        assert_eq!(uri.host, "[2001:db8::1]");
        assert_eq!(uri.port, Some(5071));
        assert_eq!(uri.parameter("lr"), Some(None));
        assert_eq!(uri.parameter("TRANSPORT"), Some(Some("tls")));
        assert_eq!(uri.headers.len(), 2);
        assert_eq!(
            uri.to_string(),
            "sips:bob:secret@[2001:db8::1]:5071;transport=tls;lr?subject=hi&priority=urgent"
        );
    }

    #[test]
    fn parses_host_only_uri() {
        let uri: SipUri = "sip:example.com".parse().unwrap();
        assert_eq!(uri.user, None);
        assert_eq!(uri.port, None);
        assert_eq!(uri, SipUri::new("example.com"));
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!("http://example.com".parse::<SipUri>().is_err());
        assert!("sip:".parse::<SipUri>().is_err());
        assert!("sip:@example.com".parse::<SipUri>().is_err());
        assert!("sip:alice@example.com:99999".parse::<SipUri>().is_err());
        assert!("sip:[::1".parse::<SipUri>().is_err());
        assert!("sip:alice@exa mple.com".parse::<SipUri>().is_err());
    }

    #[test]
    fn non_ascii_input_is_an_error() {
        for input in ["sipé:x@y", "sié", "sipsé:bob@host", "sip:alicé@example.com", "sip:alice@hôst.example", "é"] {
            assert!(
                matches!(input.parse::<SipUri>(), Err(Error::InvalidUri { .. })),
                "{} should be rejected",
                input
            );
        }
        assert!(ContactHeader::parse("<sipé@10.0.0.1>;expires=60").is_err());
        assert!(ContactHeader::parse_list("<sip:a@10.0.0.1>, sipé@10.0.0.2").is_err());
    }

    #[test]
    fn contact_parameters_tolerate_whitespace() {
        let contact = ContactHeader::parse("Bob <sip:bob@10.0.0.3> ; expires = 45 ;+sip.instance=\"<urn:x>\"").unwrap();
        assert_eq!(contact.display_name.as_deref(), Some("Bob"));
        assert_eq!(contact.expires(), Some(45));
        assert_eq!(contact.parameters[1], ("+sip.instance".to_string(), Some("<urn:x>".to_string())));
    }

    #[test]
    fn builder_replaces_parameters() {
        let uri = SipUri::new("10.0.0.1")
            .with_user("alice")
            .with_port(5080)
            .with_parameter("transport", Some("udp"))
            .with_parameter("transport", Some("tcp"));
        assert_eq!(uri.to_string(), "sip:alice@10.0.0.1:5080;transport=tcp");
    }

    #[test]
    fn contact_matching_ignores_parameters() {
        let a: SipUri = "sip:alice@10.0.0.1:5060;transport=udp".parse().unwrap();
        let b: SipUri = "sip:alice@10.0.0.1:5060".parse().unwrap();
        let c: SipUri = "sip:alice@10.0.0.1:5062".parse().unwrap();
        assert!(a.matches_contact(&b));
        assert!(!a.matches_contact(&c));
    }

    #[test]
    fn parses_contact_lists() {
        let contacts = ContactHeader::parse_list(
            "\"Alice, at home\" <sip:alice@10.0.0.1:5060;transport=udp>;expires=300, sip:alice@10.0.0.2;expires=60;q=0.5",
        )
        .unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].display_name.as_deref(), Some("Alice, at home"));
        assert_eq!(contacts[0].expires(), Some(300));
        assert_eq!(contacts[0].uri.parameter("transport"), Some(Some("udp")));
        assert_eq!(contacts[1].expires(), Some(60));
        assert!(contacts[1].uri.parameters.is_empty());
        assert_eq!(ContactHeader::parse_list("*").unwrap(), Vec::new());
    }

    #[test]
    fn contact_display_quotes_name() {
        let contact = ContactHeader {
            display_name: Some("Alice".into()),
            uri: "sip:alice@example.com".parse().unwrap(),
            parameters: vec![("expires".into(), Some("30".into()))],
        };
        assert_eq!(contact.to_string(), "\"Alice\" <sip:alice@example.com>;expires=30");
    }
}
