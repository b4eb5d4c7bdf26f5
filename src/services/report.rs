use crate::models::CruftReport;
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use std::process::Stdio;
use std::time::SystemTime;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How `report` prints the surviving objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// `<path>, <mtime>` sorted by path
    #[default]
    Path,
    /// `<path>, <mtime>` newest first
    Date,
    /// Chained `rm -rf` commands, sorted by path
    #[value(alias = "rm_chain")]
    RmChain,
}

/// Render `report` one line per object.
pub fn format_report(report: &CruftReport, format: ReportFormat) -> Vec<String> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let mut entries: Vec<_> = report.entries.iter().collect();

    match format {
        ReportFormat::Path => entries
            .into_iter()
            .map(|(path, mtime)| format!("{}, {}", path, asctime(*mtime, offset)))
            .collect(),
        ReportFormat::Date => {
            entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            entries
                .into_iter()
                .map(|(path, mtime)| format!("{}, {}", path, asctime(*mtime, offset)))
                .collect()
        }
        ReportFormat::RmChain => entries
            .into_iter()
            .map(|(path, _)| format!("rm -rf \"{}\" && \\", escape_double_quoted(path.fs_path())))
            .collect(),
    }
}

/// `Sun Oct 18 09:04:05 2026`, like C `asctime`
pub fn asctime(t: SystemTime, offset: UtcOffset) -> String {
    let format = format_description!(
        "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
    );
    OffsetDateTime::from(t)
        .to_offset(offset)
        .format(format)
        .unwrap_or_else(|_| "?".to_string())
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Hands the collected report to the local mail transfer agent.
#[derive(Debug, Clone)]
pub struct Mailer {
    program: String,
    sender: String,
    recipient: String,
}

impl Mailer {
    /// Deliver through `sendmail -t`
    pub fn sendmail(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            program: "sendmail".to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    /// Use another `sendmail` compatible binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn message(&self, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.sender, self.recipient, subject, body
        )
    }

    pub async fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::debug!("Sending mail to {}...", self.recipient);

        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.message(subject, body).as_bytes())
                .await
                .context("Failed to write mail body")?;
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PathObject;
    use std::time::{Duration, UNIX_EPOCH};

    fn report() -> CruftReport {
        let mut report = CruftReport::default();
        report
            .entries
            .insert(PathObject::file("/b/old"), UNIX_EPOCH + Duration::from_secs(100));
        report
            .entries
            .insert(PathObject::dir("/a/new"), UNIX_EPOCH + Duration::from_secs(200));
        report
    }

    #[test]
    fn test_asctime_format() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        assert_eq!(asctime(t, UtcOffset::UTC), "Sun Sep  9 01:46:40 2001");
    }

    #[test]
    fn test_path_format_sorted_by_path() {
        let lines = format_report(&report(), ReportFormat::Path);
        assert!(lines[0].starts_with("/a/new/, "));
        assert!(lines[1].starts_with("/b/old, "));
    }

    #[test]
    fn test_date_format_newest_first() {
        let mut r = report();
        r.entries
            .insert(PathObject::file("/c/newest"), UNIX_EPOCH + Duration::from_secs(300));
        let lines = format_report(&r, ReportFormat::Date);
        let paths: Vec<_> = lines
            .iter()
            .map(|l| l.split(", ").next().unwrap())
            .collect();
        assert_eq!(paths, vec!["/c/newest", "/a/new/", "/b/old"]);
    }

    #[test]
    fn test_rm_chain_format() {
        let lines = format_report(&report(), ReportFormat::RmChain);
        assert_eq!(
            lines,
            vec![r#"rm -rf "/a/new" && \"#, r#"rm -rf "/b/old" && \"#]
        );
    }

    #[test]
    fn test_rm_chain_escapes_shell_specials() {
        assert_eq!(escape_double_quoted(r#"/tmp/a"$b"#), r#"/tmp/a\"\$b"#);
    }

    #[test]
    fn test_message_headers() {
        let mailer = Mailer::sendmail("cruft@host", "root@localhost");
        let message = mailer.message("report", "body\n");
        assert!(message.starts_with("From: cruft@host\nTo: root@localhost\nSubject: report\n"));
        assert!(message.ends_with("\n\nbody\n"));
    }

    #[tokio::test]
    async fn test_send_through_program() {
        let mailer = Mailer::sendmail("cruft@host", "root@localhost").with_program("cat");
        mailer.send("report", "body\n").await.unwrap();

        let failing = Mailer::sendmail("cruft@host", "root@localhost").with_program("false");
        assert!(failing.send("report", "body\n").await.is_err());
    }
}
