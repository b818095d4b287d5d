//! Splitting a client line into a keyword and its argument.

/// What a command line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Lhlo,
    Quit,
    Rset,
    Data,
    Noop,
    /// VRFY, EXPN and TURN: answered with 502 and counted as NOOPs.
    Unimplemented,
    MailFrom,
    RcptTo,
    Unrecognized,
}

/// One command line from the client.
///
/// Only the first whitespace-delimited token after the keyword is kept as the
/// argument; `MAIL FROM: <a@b>` therefore has the argument `FROM:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub line: String,
    /// Lowercased keyword.
    pub keyword: String,
    pub argument: Option<String>,
}

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next()?.to_lowercase();
        let argument = tokens.next().map(str::to_owned);

        Some(Command {
            line: line.to_owned(),
            keyword,
            argument,
        })
    }

    pub fn verb(&self) -> Verb {
        match self.keyword.as_str() {
            "lhlo" => Verb::Lhlo,
            "quit" => Verb::Quit,
            "rset" => Verb::Rset,
            "data" => Verb::Data,
            "noop" => Verb::Noop,
            "vrfy" | "expn" | "turn" => Verb::Unimplemented,
            _ => {
                let line = self.line.to_lowercase();
                if line.starts_with("mail from:") {
                    Verb::MailFrom
                } else if line.starts_with("rcpt to:") {
                    Verb::RcptTo
                } else {
                    Verb::Unrecognized
                }
            }
        }
    }
}
