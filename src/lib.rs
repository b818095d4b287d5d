//! A small LMTP server.
//!
//! Connections are only accepted from an allow-list of hosts, and mail is
//! only accepted for a fixed set of domains. Each accepted connection runs
//! one session at a time (greeting, `LHLO`, one sender, one recipient, the
//! message body) and hands every completed message to a [`Deliver`]
//! implementation supplied by the embedding program.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lmtpd::{Logger, LmtpServer, ServerConfig, Settings, SystemResolver};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let logger = Logger::stdout(false);
//! let settings = Settings { host_name: "mx.example.org".into(), ..Settings::default() };
//! let config = ServerConfig::build(
//!     settings,
//!     &["127.0.0.1".to_owned()],
//!     &["example.org".to_owned()],
//!     Arc::new(SystemResolver),
//!     &logger,
//! )
//! .await?;
//!
//! let deliver = |from: &str, to: &str, body: &str| {
//!     println!("{} -> {}: {} bytes", from, to, body.len());
//!     "250 OK".to_owned()
//! };
//! let server = LmtpServer::bind(Arc::new(config), Arc::new(deliver), Arc::new(SystemResolver), logger).await?;
//! server.run().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod admission;
pub mod command;
pub mod config;
pub mod deliver;
pub mod envelope;
pub mod error;
pub mod logger;
pub mod server;
pub mod session;
pub mod spool;

pub use address::{parse_address, ParsedAddress, Resolver, SystemResolver};
pub use config::{ServerConfig, Settings};
pub use deliver::Deliver;
pub use envelope::{parse_envelope, ParsedEnvelopeAddress};
pub use error::{AddressError, ConfigError, ServerError, SessionError};
pub use logger::Logger;
pub use server::LmtpServer;
