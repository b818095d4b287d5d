use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RX_BRACKETED: Regex = Regex::new("^.*?<(.*?)@(.*?)>.*$").unwrap();
    static ref RX_CANONICAL: Regex =
        Regex::new(r"(?:<|\s)([a-zA-Z_0-9+\-.]*?@[a-zA-Z_0-9.]*?)(?:\s|>)").unwrap();
}

/// The pieces of an envelope address such as `Real Name <user+cmd@host>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEnvelopeAddress {
    /// Everything before the `@`, including any `+command` suffix.
    pub local_part: String,
    pub user: String,
    pub command: Option<String>,
    /// Everything after the `@`, compared as a whole against served domains.
    pub domain: String,
    /// Bare `user@domain` with brackets and display name removed.
    pub canonical: String,
}

/// Parse a `MAIL FROM`/`RCPT TO` argument.
///
/// The argument is lowercased and trimmed first. Both the bracketed span and
/// a bare address token delimited by whitespace or angle brackets must be
/// present; otherwise there is no address.
pub fn parse_envelope(raw: &str) -> Option<ParsedEnvelopeAddress> {
    let text = raw.trim().to_lowercase();

    let cap = RX_BRACKETED.captures(&text)?;
    let local_part = cap.get(1)?.as_str().to_owned();
    let domain = cap.get(2)?.as_str().to_owned();

    let (user, command) = match local_part.split_once('+') {
        Some((user, command)) => (user.to_owned(), Some(command.to_owned())),
        None => (local_part.clone(), None),
    };

    let canonical = RX_CANONICAL.captures(&text)?.get(1)?.as_str().to_owned();

    Some(ParsedEnvelopeAddress {
        local_part,
        user,
        command,
        domain,
        canonical,
    })
}
