mod daemon;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use structopt::StructOpt;

use lmtpd::spool::Spool;
use lmtpd::{LmtpServer, Logger, ServerConfig, ServerError, Settings, SystemResolver};

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "lmtpd",
    about = "An LMTP server accepting mail for a fixed set of domains from approved hosts"
)]
pub struct Opt {
    /// Run as daemon
    #[structopt(short = "d", long = "daemon")]
    pub daemon: bool,

    /// PID file written in daemon mode
    #[structopt(long = "pid-file", default_value = "/tmp/lmtpd.pid", parse(from_os_str))]
    pub pid_file: PathBuf,

    /// Listening address
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Listening port
    #[structopt(short = "p", long = "port", default_value = "2424")]
    pub port: u16,

    /// Live sessions above which accepting slows down
    #[structopt(long = "soft-max", default_value = "100")]
    pub soft_max: usize,

    /// Live sessions at which nothing more is accepted
    #[structopt(long = "hard-max", default_value = "150")]
    pub hard_max: usize,

    /// Delay in milliseconds before each accept above the soft maximum
    #[structopt(long = "busy-delay", default_value = "200")]
    pub busy_delay: u64,

    /// Host name announced to clients
    #[structopt(long = "host", default_value = "localhost")]
    pub host: String,

    /// Idle time in milliseconds before a session is dropped
    #[structopt(long = "inactivity-timeout", default_value = "30000")]
    pub inactivity_timeout: u64,

    /// Unrecognized commands allowed per transaction (0 = unlimited)
    #[structopt(long = "max-errors", default_value = "3")]
    pub max_errors: u32,

    /// NOOP and unimplemented commands allowed per transaction (0 = unlimited)
    #[structopt(long = "max-noops", default_value = "5")]
    pub max_noops: u32,

    /// RSETs allowed per session, counting the initial one (0 = unlimited)
    #[structopt(long = "max-rsets", default_value = "3")]
    pub max_rsets: u32,

    /// Longest accepted line in bytes, CRLF included (0 = unlimited)
    #[structopt(long = "max-line-length", default_value = "1000")]
    pub max_line_length: usize,

    /// Do not resolve sender domains or served domains
    #[structopt(long = "no-live-lookups")]
    pub no_live_lookups: bool,

    /// Host allowed to connect, as a literal or a name (can be specified multiple times, default: 127.0.0.1)
    #[structopt(long = "approved-host", number_of_values = 1)]
    pub approved_hosts: Vec<String>,

    /// Domain(s) to accept mail for (can be specified multiple times, required)
    #[structopt(long = "domain", required = true, number_of_values = 1)]
    pub domains: Vec<String>,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Directory to save delivered messages
    #[structopt(long = "data", parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Verbose mode - trace the protocol exchange
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

impl Opt {
    fn settings(&self) -> Settings {
        Settings {
            bind_address: self.address,
            port: self.port,
            soft_limit: self.soft_max,
            hard_limit: self.hard_max,
            backoff: Duration::from_millis(self.busy_delay),
            host_name: self.host.clone(),
            inactivity_timeout: Duration::from_millis(self.inactivity_timeout),
            max_errors: self.max_errors,
            max_noops: self.max_noops,
            max_rsets: self.max_rsets,
            live_lookups: !self.no_live_lookups,
            max_line_length: self.max_line_length,
            ..Settings::default()
        }
    }

    fn approved_hosts(&self) -> Vec<String> {
        if self.approved_hosts.is_empty() {
            vec!["127.0.0.1".to_owned()]
        } else {
            self.approved_hosts.clone()
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    println!("==========================================");
    println!("lmtpd v{}", env!("CARGO_PKG_VERSION"));
    println!("==========================================");

    // Relative paths must be resolved before daemonizing.
    let opt = Opt {
        log_file: opt.log_file.as_deref().map(absolute).transpose()?,
        data_dir: opt.data_dir.as_deref().map(absolute).transpose()?,
        ..opt
    };

    if opt.daemon {
        daemon::daemonize(&opt.pid_file)?;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the tokio runtime")?;
    runtime.block_on(serve(opt))
}

fn absolute(path: &std::path::Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    Ok(cwd.join(path))
}

async fn serve(opt: Opt) -> Result<()> {
    let logger = Logger::new(opt.log_file.clone(), opt.verbose)
        .with_context(|| format!("Failed to open log file: {:?}", opt.log_file))?;
    let spool = Spool::new(opt.data_dir.clone())
        .with_context(|| format!("Failed to create data directory: {:?}", opt.data_dir))?;
    let resolver = Arc::new(SystemResolver);

    let config = ServerConfig::build(
        opt.settings(),
        &opt.approved_hosts(),
        &opt.domains,
        resolver.clone(),
        &logger,
    )
    .await?;

    if config.approved_hosts.is_empty() {
        eprintln!("[WARNING] No approved hosts; every connection will be rejected");
    }
    if config.domains_served.is_empty() {
        eprintln!("[WARNING] No domains served; every recipient will be rejected");
    }

    let config = Arc::new(config);
    let server = match LmtpServer::bind(config.clone(), Arc::new(spool), resolver, logger).await {
        Ok(server) => server,
        Err(e @ ServerError::Bind { .. }) => {
            eprintln!("[ERROR] {}", e);
            eprintln!("[ERROR] Is another server already listening, or is the port privileged?");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("[INFO] PID: {}", std::process::id());
    println!("[INFO] Listening on {}", server.local_addr());
    println!("[INFO] Host name: {}", config.settings.host_name);
    println!("[INFO] Domains: {:?}", config.domains_served);
    println!(
        "[INFO] Sessions: slow down above {}, at most {}",
        config.settings.soft_limit, config.settings.hard_limit
    );
    if let Some(dir) = &opt.data_dir {
        println!("[INFO] Saving messages to {:?}", dir);
    }
    println!("[INFO] Waiting for connections...");
    println!("[INFO] Press Ctrl+C to stop");

    server.run().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opt = Opt::from_iter(&["lmtpd", "--domain", "example.org"]);
        let settings = opt.settings();

        assert_eq!(settings.port, 2424);
        assert_eq!(settings.soft_limit, 100);
        assert_eq!(settings.hard_limit, 150);
        assert_eq!(settings.backoff, Duration::from_millis(200));
        assert_eq!(settings.host_name, "localhost");
        assert_eq!(settings.inactivity_timeout, Duration::from_secs(30));
        assert_eq!((settings.max_errors, settings.max_noops, settings.max_rsets), (3, 5, 3));
        assert!(settings.live_lookups);
        assert_eq!(settings.max_line_length, 1000);
        assert_eq!(opt.approved_hosts(), vec!["127.0.0.1".to_owned()]);
        assert_eq!(opt.pid_file, PathBuf::from("/tmp/lmtpd.pid"));
    }

    #[test]
    fn test_repeated_options() {
        let opt = Opt::from_iter(&[
            "lmtpd",
            "--domain",
            "example.org",
            "--domain",
            "example.net",
            "--approved-host",
            "10.0.0.1",
            "--approved-host",
            "mx.example.org",
            "--no-live-lookups",
            "-p",
            "10024",
        ]);

        assert_eq!(opt.domains, vec!["example.org", "example.net"]);
        assert_eq!(opt.approved_hosts(), vec!["10.0.0.1", "mx.example.org"]);
        assert!(!opt.settings().live_lookups);
        assert_eq!(opt.settings().port, 10024);
    }

    #[test]
    fn test_domain_is_required() {
        assert!(Opt::from_iter_safe(&["lmtpd"]).is_err());
    }
}
