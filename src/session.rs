use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};

use crate::address::{lookup_address, Resolver};
use crate::command::{Command, Verb};
use crate::config::ServerConfig;
use crate::deliver::Deliver;
use crate::envelope::parse_envelope;
use crate::error::SessionError;
use crate::logger::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Rset,
    Capabilities,
    Pipelining,
    Data,
    Process,
    Stop,
    Stopped,
}

/// Limits that end a session when exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Inactivity,
    Errors,
    Noops,
    Rsets,
}

impl Threshold {
    pub fn reply(self) -> &'static str {
        match self {
            Threshold::Inactivity => "500 Timeout",
            Threshold::Errors => "500 Too many errors",
            Threshold::Noops => "500 Too many NOOPs and/or unimplemented commands",
            Threshold::Rsets => "500 Too many RSETs",
        }
    }
}

/// Everything a session shares with the listener and its sibling sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub deliverer: Arc<dyn Deliver>,
    pub resolver: Arc<dyn Resolver>,
    pub logger: Logger,
}

/// One LMTP conversation, from greeting to sign-off.
pub struct Session<R, W> {
    ctx: SessionContext,
    peer: SocketAddr,
    reader: R,
    writer: W,
    /// Bytes of a line whose terminator has not arrived yet.
    partial: Vec<u8>,
    state: State,
    mail_from: Option<String>,
    mail_to: Option<String>,
    data: String,
    hello_name: Option<String>,
    last_activity: Instant,
    errors: u32,
    noops: u32,
    /// Never cleared, and includes the implicit RSET on entry.
    rsets: u32,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, peer: SocketAddr, ctx: SessionContext) -> Self {
        Self {
            ctx,
            peer,
            reader,
            writer,
            partial: Vec::new(),
            state: State::Start,
            mail_from: None,
            mail_to: None,
            data: String::new(),
            hello_name: None,
            last_activity: Instant::now(),
            errors: 0,
            noops: 0,
            rsets: 0,
        }
    }

    /// Drive the session until it stops. I/O failures end it immediately
    /// after a best-effort `451` reply; the writer is shut down either way.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let result = self.drive().await;

        if let Err(e) = &result {
            self.ctx
                .logger
                .log(self.peer, &format!("Session aborted: {}", e))
                .await;
            let _ = self.writer.write_all(b"451 Server error\r\n").await;
            let _ = self.writer.flush().await;
        }

        let _ = self.writer.shutdown().await;
        self.ctx.logger.log(self.peer, "Session stopped").await;
        result
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let loop_delay = self.ctx.config.settings.loop_delay;

        while self.state != State::Stopped {
            if !loop_delay.is_zero() {
                time::sleep(loop_delay).await;
            }

            for threshold in self.tripped() {
                self.ctx
                    .logger
                    .log(self.peer, &format!("Disconnecting: {}", threshold.reply()))
                    .await;
                self.reply(threshold.reply()).await?;
                self.state = State::Stop;
            }

            let next = self.step().await?;
            if next != self.state {
                self.ctx
                    .logger
                    .log_verbose(self.peer, "state", &format!("{:?} -> {:?}", self.state, next))
                    .await;
            }
            self.state = next;
        }

        Ok(())
    }

    /// Thresholds currently exceeded, in the order they are reported.
    fn tripped(&self) -> Vec<Threshold> {
        let settings = &self.ctx.config.settings;
        let mut tripped = Vec::new();

        if !settings.inactivity_timeout.is_zero()
            && self.last_activity.elapsed() > settings.inactivity_timeout
        {
            tripped.push(Threshold::Inactivity);
        }
        if settings.max_errors > 0 && self.errors > settings.max_errors {
            tripped.push(Threshold::Errors);
        }
        if settings.max_noops > 0 && self.noops > settings.max_noops {
            tripped.push(Threshold::Noops);
        }
        if settings.max_rsets > 0 && self.rsets > settings.max_rsets {
            tripped.push(Threshold::Rsets);
        }

        tripped
    }

    async fn step(&mut self) -> Result<State, SessionError> {
        match self.state {
            State::Start => {
                let greeting = format!("220 {} LMTP server ready", self.ctx.config.settings.host_name);
                self.reply(&greeting).await?;
                Ok(State::Rset)
            }
            State::Rset => {
                self.reset();
                Ok(State::Pipelining)
            }
            State::Capabilities => {
                let capabilities = self.ctx.config.capabilities().to_owned();
                self.reply(&capabilities).await?;
                Ok(State::Pipelining)
            }
            State::Pipelining => self.pipelining().await,
            State::Data => self.data_line().await,
            State::Process => self.process().await,
            State::Stop => {
                let bye = format!("221 {} closing connection", self.ctx.config.settings.host_name);
                self.reply(&bye).await?;
                Ok(State::Stopped)
            }
            State::Stopped => Ok(State::Stopped),
        }
    }

    fn reset(&mut self) {
        self.mail_from = None;
        self.mail_to = None;
        self.data.clear();
        self.last_activity = Instant::now();
        self.errors = 0;
        self.noops = 0;
        self.rsets += 1;
    }

    async fn pipelining(&mut self) -> Result<State, SessionError> {
        let line = match self.patient_read().await? {
            Some(line) => line,
            None => return Ok(State::Pipelining),
        };
        let command = match Command::parse(&line) {
            Some(command) => command,
            None => return Ok(State::Pipelining),
        };

        self.last_activity = Instant::now();
        self.ctx.logger.log_verbose(self.peer, ">>", &command.line).await;

        let verb = command.verb();
        if verb != Verb::Lhlo && self.hello_name.is_none() {
            self.reply("503 Please say LHLO first").await?;
            return Ok(State::Pipelining);
        }

        match verb {
            Verb::Quit => Ok(State::Stop),
            Verb::Rset => {
                self.reply("250 OK").await?;
                Ok(State::Rset)
            }
            Verb::Lhlo => {
                // A bare LHLO forgets the earlier name.
                self.hello_name = command.argument;
                Ok(State::Capabilities)
            }
            Verb::Data => self.data_command().await,
            Verb::Noop => {
                self.noops += 1;
                self.reply("250 OK").await?;
                Ok(State::Pipelining)
            }
            Verb::Unimplemented => {
                self.noops += 1;
                self.reply("502 Command not implemented").await?;
                Ok(State::Pipelining)
            }
            Verb::MailFrom => {
                self.mail_from_command(command.argument.as_deref()).await?;
                Ok(State::Pipelining)
            }
            Verb::RcptTo => {
                self.rcpt_to_command(command.argument.as_deref()).await?;
                Ok(State::Pipelining)
            }
            Verb::Unrecognized => {
                self.errors += 1;
                self.reply(&format!("500 Command unrecognized: {}", command.keyword))
                    .await?;
                Ok(State::Pipelining)
            }
        }
    }

    async fn data_command(&mut self) -> Result<State, SessionError> {
        if self.mail_to.is_none() {
            self.errors += 1;
            self.reply("503 need RCPT (recipient)").await?;
            Ok(State::Pipelining)
        } else if self.mail_from.is_none() {
            self.errors += 1;
            self.reply("503 need MAIL FROM").await?;
            Ok(State::Pipelining)
        } else {
            self.reply("354 Start mail input; end with <CRLF>.<CRLF>").await?;
            Ok(State::Data)
        }
    }

    async fn mail_from_command(&mut self, argument: Option<&str>) -> Result<(), SessionError> {
        if self.mail_from.is_some() {
            self.errors += 1;
            return self.reply("503 Sender already specified").await;
        }

        let parsed = match argument.and_then(parse_envelope) {
            Some(parsed) => parsed,
            None => {
                self.errors += 1;
                return self.reply("501 Invalid email address").await;
            }
        };

        if self.ctx.config.settings.live_lookups
            && lookup_address(parsed.domain.clone(), self.ctx.resolver.clone())
                .await
                .is_err()
        {
            self.errors += 1;
            return self.reply("501 Invalid host name").await;
        }

        let reply = format!("250 {} Sender ok", parsed.canonical);
        self.mail_from = Some(parsed.canonical);
        self.reply(&reply).await
    }

    async fn rcpt_to_command(&mut self, argument: Option<&str>) -> Result<(), SessionError> {
        if self.mail_to.is_some() {
            self.errors += 1;
            return self.reply("503 Recipient already specified").await;
        }

        let parsed = match argument.and_then(parse_envelope) {
            Some(parsed) => parsed,
            None => {
                self.errors += 1;
                return self.reply("501 Invalid email address").await;
            }
        };

        // The whole text after '@' must be listed, subdomains included.
        if !self.ctx.config.serves_domain(&parsed.domain) {
            self.errors += 1;
            let reply = format!(
                "551 We do not relay and we do not accept mail for {}",
                parsed.domain
            );
            return self.reply(&reply).await;
        }

        let reply = format!("250 {} Recipient ok", parsed.canonical);
        self.mail_to = Some(parsed.canonical);
        self.reply(&reply).await
    }

    async fn data_line(&mut self) -> Result<State, SessionError> {
        let line = match self.patient_read().await? {
            Some(line) => line,
            None => return Ok(State::Data),
        };

        self.last_activity = Instant::now();
        let line = strip_terminator(&line);
        if line == "." {
            return Ok(State::Process);
        }

        self.data.push_str(line);
        self.data.push('\n');
        Ok(State::Data)
    }

    async fn process(&mut self) -> Result<State, SessionError> {
        let mail_from = self.mail_from.clone().unwrap_or_default();
        let mail_to = self.mail_to.clone().unwrap_or_default();
        let message = std::mem::take(&mut self.data);
        let size = message.len();

        let deliverer = self.ctx.deliverer.clone();
        let (from, to) = (mail_from.clone(), mail_to.clone());
        let status =
            tokio::task::spawn_blocking(move || deliverer.deliver(&from, &to, &message)).await?;
        let status = status.trim_end_matches(|c: char| c == '\r' || c == '\n');

        self.ctx
            .logger
            .log(
                self.peer,
                &format!(
                    "Delivered {} bytes from {} to {}: {}",
                    size, mail_from, mail_to, status
                ),
            )
            .await;
        self.reply(status).await?;

        // The connection stays open until the client says QUIT.
        Ok(State::Rset)
    }

    /// Wait up to the read defer for one complete line. `None` means nothing
    /// arrived in time; bytes of an unfinished line are kept for the next call.
    async fn patient_read(&mut self) -> Result<Option<String>, SessionError> {
        let settings = &self.ctx.config.settings;
        let defer = settings.read_defer;
        let max_line_length = settings.max_line_length;

        // One byte past the limit is enough to tell an overlong line.
        let budget = match max_line_length {
            0 => u64::MAX,
            max => (max + 1).saturating_sub(self.partial.len()) as u64,
        };
        let mut limited = (&mut self.reader).take(budget);

        let read = time::timeout(defer, limited.read_until(b'\n', &mut self.partial)).await;
        match read {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) if self.partial.is_empty() => Err(SessionError::Closed),
            Ok(Ok(_))
                if max_line_length > 0
                    && self.partial.len() > max_line_length
                    && !self.partial.ends_with(b"\n") =>
            {
                Err(SessionError::LineTooLong(max_line_length))
            }
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                Ok(Some(line))
            }
        }
    }

    async fn reply(&mut self, text: &str) -> Result<(), SessionError> {
        self.ctx.logger.log_verbose(self.peer, "<<", text).await;
        self.writer.write_all(format!("{}\r\n", text).as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
