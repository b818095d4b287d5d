use std::path::Path;

/// Detach from the terminal. Must run before the tokio runtime is built.
#[cfg(unix)]
pub fn daemonize(pid_file: &Path) -> anyhow::Result<()> {
    use anyhow::Context;
    use daemonize::Daemonize;

    eprintln!("[INFO] Starting daemon mode...");

    let working_directory = std::env::current_dir().context("Failed to read working directory")?;

    Daemonize::new()
        .pid_file(pid_file)
        .chown_pid_file(true)
        .working_directory(working_directory)
        .umask(0o027)
        .start()
        .with_context(|| format!("Daemon startup failed (pid file {:?})", pid_file))?;

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize(_pid_file: &Path) -> anyhow::Result<()> {
    eprintln!("[INFO] Daemon mode not supported on this platform, staying in the foreground");
    Ok(())
}
