//! Optional email notifier, treated as an injected output. Not part of
//! the supervision engine's contract — nothing in the core engine calls this; it is
//! ambient plumbing a caller (the daemon binary, in its own config-driven
//! way) may wire up around restart/monitor events, the same way the
//! original shells out to `sendmail` rather than using an SMTP library.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SendmailError {
    #[error("failed to launch {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("failed to write message body: {0}")]
    Write(std::io::Error),
    #[error("{0} did not exit within {1:?}")]
    Timeout(String, Duration),
    #[error("{0} exited with a failure status")]
    NonZeroExit(String),
}

const SENDMAIL_TIMEOUT: Duration = Duration::from_secs(2);

fn current_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

fn current_hostname() -> String {
    let mut buf = [0u8; 256];
    let ok = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) } == 0;
    if !ok {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// Pipe a MIME-ish message to `sendmail_path to`, matching the original's
/// header construction and `\r\n`-joined preamble.
pub fn sendmail(sendmail_path: &str, to: &str, subject: &str, body: &str) -> Result<(), SendmailError> {
    let mut child = Command::new(sendmail_path)
        .arg(to)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|err| SendmailError::Spawn(sendmail_path.to_string(), err))?;

    let from = format!("{}@{}", current_username(), current_hostname());
    let headers = format!("To: {to}\r\nSubject: {subject}\r\nFrom: {from}\r\n\r\n");

    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(headers.as_bytes())
            .and_then(|_| stdin.write_all(body.as_bytes()))
            .map_err(SendmailError::Write)?;
    }
    drop(child.stdin.take());

    let deadline = std::time::Instant::now() + SENDMAIL_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(SendmailError::NonZeroExit(sendmail_path.to_string()))
                };
            }
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    return Err(SendmailError::Timeout(sendmail_path.to_string(), SENDMAIL_TIMEOUT));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => return Err(SendmailError::Write(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sendmail_path_surfaces_a_spawn_error() {
        let err = sendmail("/nonexistent/sendmail", "a@b.com", "subject", "body");
        assert!(matches!(err, Err(SendmailError::Spawn(_, _))));
    }

    #[test]
    fn hostname_is_nonempty() {
        assert!(!current_hostname().is_empty());
    }
}
