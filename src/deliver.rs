/// Final delivery of a completed transaction.
///
/// Called once per message with the canonical sender and recipient and the
/// full body (lines joined with `\n`). The return value is sent to the client
/// as-is, so it must be a complete SMTP reply such as
/// `250 Message accepted for delivery`, `451 Error saving message` or
/// `550 User not found`. Whether the recipient actually exists is for the
/// implementation to decide.
///
/// Runs on the blocking pool, so implementations may do file or network I/O.
pub trait Deliver: Send + Sync {
    fn deliver(&self, mail_from: &str, mail_to: &str, message: &str) -> String;
}

impl<F> Deliver for F
where
    F: Fn(&str, &str, &str) -> String + Send + Sync,
{
    fn deliver(&self, mail_from: &str, mail_to: &str, message: &str) -> String {
        self(mail_from, mail_to, message)
    }
}
