use std::path::{Path, PathBuf};

use crate::error::{DunnError, Result};

/// A message handed to the desktop mail client. The client itself is an
/// external collaborator; this is the whole interface to it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub file_stem: String,
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

impl OutgoingMail {
    fn to_eml(&self) -> String {
        format!(
            "To: {}\r\nCc: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=utf-8\r\n\r\n{}",
            self.to,
            self.cc.join("; "),
            self.subject,
            self.html_body
        )
    }
}

pub trait Mailer {
    fn send(&mut self, mail: &OutgoingMail) -> Result<()>;
}

fn write_eml(dir: &Path, mail: &OutgoingMail) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.eml", mail.file_stem));
    std::fs::write(&path, mail.to_eml())?;
    Ok(path)
}

/// Writes messages into an outbox directory without dispatching anything.
/// Used for debug runs and when no mail command is configured.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Mailer for OutboxMailer {
    fn send(&mut self, mail: &OutgoingMail) -> Result<()> {
        write_eml(&self.dir, mail)?;
        Ok(())
    }
}

/// Writes the message file and hands its path to the configured mail-client
/// command, e.g. `thunderbird -compose` or an automation script.
pub struct CommandMailer {
    command: String,
    dir: PathBuf,
}

impl CommandMailer {
    pub fn new(command: String, dir: PathBuf) -> Self {
        Self { command, dir }
    }
}

impl Mailer for CommandMailer {
    fn send(&mut self, mail: &OutgoingMail) -> Result<()> {
        let path = write_eml(&self.dir, mail)?;
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DunnError::Mail("empty mail command".to_string()))?;
        let status = std::process::Command::new(program)
            .args(parts)
            .arg(&path)
            .status()
            .map_err(|e| DunnError::Mail(format!("{}: {e}", self.command)))?;
        if !status.success() {
            return Err(DunnError::Mail(format!(
                "{} exited with {status} for {}",
                self.command,
                path.display()
            )));
        }
        Ok(())
    }
}

/// Test double that records every message it is asked to send.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Vec<OutgoingMail>,
    pub fail: bool,
}

#[cfg(test)]
impl Mailer for RecordingMailer {
    fn send(&mut self, mail: &OutgoingMail) -> Result<()> {
        if self.fail {
            return Err(DunnError::Mail("simulated mail failure".to_string()));
        }
        self.sent.push(mail.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            file_stem: "100123_loan".to_string(),
            to: "ada@example.edu".to_string(),
            cc: vec!["rquinn@museum.example".to_string()],
            subject: "Overdue loan: 100123".to_string(),
            html_body: "<html><body>hi</body></html>".to_string(),
        }
    }

    #[test]
    fn test_outbox_mailer_writes_eml() {
        let dir = tempfile::tempdir().unwrap();
        let mut mailer = OutboxMailer::new(dir.path().join("outbox"));
        mailer.send(&mail()).unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("outbox").join("100123_loan.eml")).unwrap();
        assert!(content.starts_with("To: ada@example.edu\r\n"));
        assert!(content.contains("Cc: rquinn@museum.example\r\n"));
        assert!(content.contains("Subject: Overdue loan: 100123\r\n"));
        assert!(content.ends_with("<html><body>hi</body></html>"));
    }

    #[test]
    fn test_command_mailer_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ok = CommandMailer::new("true".to_string(), dir.path().to_path_buf());
        ok.send(&mail()).unwrap();
        assert!(dir.path().join("100123_loan.eml").exists());

        let mut failing = CommandMailer::new("false".to_string(), dir.path().to_path_buf());
        assert!(matches!(failing.send(&mail()), Err(DunnError::Mail(_))));
    }

    #[test]
    fn test_command_mailer_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut mailer = CommandMailer::new(
            "definitely-not-a-mail-client".to_string(),
            dir.path().to_path_buf(),
        );
        assert!(matches!(mailer.send(&mail()), Err(DunnError::Mail(_))));
    }
}
