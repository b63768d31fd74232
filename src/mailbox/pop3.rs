//! POP3 variant of the mailbox client.
//!
//! POP3 has no folders and no server-side search, so the whole mailbox is a
//! single INBOX and date filtering always happens client-side, using
//! header-only `TOP` fetches. The protocol is small enough that the client
//! speaks it directly over a buffered TCP or TLS stream.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

use crate::daterange::ResolvedDateRange;

use super::{parse_mail_date, CandidateMessage, MailAccount, MailClient, MailboxError, Protocol};

const POP3_FOLDER: &str = "INBOX";

enum Pop3Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Read for Pop3Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Pop3Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// Line-level POP3 transport. Generic over the stream so protocol handling
/// can be exercised without a socket.
struct Pop3Transport<S: Read + Write> {
    reader: BufReader<S>,
}

impl<S: Read + Write> Pop3Transport<S> {
    fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Reads one `+OK`/`-ERR` status line, erroring on the latter.
    fn read_status_line(&mut self) -> Result<String, MailboxError> {
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        let line = line.trim_end_matches(['\r', '\n']).to_string();

        if let Some(rest) = line.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else if let Some(rest) = line.strip_prefix("-ERR") {
            Err(MailboxError::Protocol(rest.trim().to_string()))
        } else {
            Err(MailboxError::Protocol(format!(
                "unexpected POP3 response: {line}"
            )))
        }
    }

    fn command(&mut self, command: &str) -> Result<String, MailboxError> {
        let stream = self.reader.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        self.read_status_line()
    }

    /// Reads a multiline response body up to the terminating `.` line,
    /// undoing dot-stuffing.
    fn read_multiline(&mut self) -> Result<Vec<u8>, MailboxError> {
        let mut body = Vec::new();
        loop {
            let mut line = Vec::new();
            let n = self.reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                return Err(MailboxError::Protocol(
                    "connection closed mid-response".to_string(),
                ));
            }

            while line.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                line.pop();
            }

            if line == b"." {
                return Ok(body);
            }
            let content = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line[..]
            };
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
    }
}

pub struct Pop3Client {
    transport: Pop3Transport<Pop3Stream>,
    total: u32,
}

impl Pop3Client {
    pub fn connect(account: &MailAccount) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((account.server.as_str(), account.port))?;
        let stream = if account.use_ssl {
            let tls = TlsConnector::builder().build()?;
            let tls_stream = tls
                .connect(&account.server, tcp)
                .map_err(|error| MailboxError::Connection(error.to_string()))?;
            Pop3Stream::Tls(Box::new(tls_stream))
        } else {
            Pop3Stream::Plain(tcp)
        };

        let mut transport = Pop3Transport::new(stream);
        transport
            .read_status_line()
            .map_err(|error| MailboxError::Connection(format!("bad greeting: {error}")))?;

        transport
            .command(&format!("USER {}", account.email))
            .map_err(|error| MailboxError::Auth(error.to_string()))?;
        transport
            .command(&format!("PASS {}", account.password))
            .map_err(|error| MailboxError::Auth(error.to_string()))?;

        let stat = transport.command("STAT")?;
        let total = stat
            .split_whitespace()
            .next()
            .and_then(|count| count.parse::<u32>().ok())
            .ok_or_else(|| MailboxError::Protocol(format!("bad STAT response: {stat}")))?;

        debug!(server = %account.server, total, "POP3 session established");
        Ok(Self { transport, total })
    }

    fn header_date(&mut self, id: u32) -> Result<Option<chrono::DateTime<chrono::Utc>>, MailboxError> {
        self.transport.command(&format!("TOP {id} 0"))?;
        let headers = self.transport.read_multiline()?;

        use mailparse::MailHeaderMap;
        Ok(mailparse::parse_headers(&headers)
            .ok()
            .and_then(|(parsed, _)| parsed.get_first_value("Date"))
            .and_then(|value| parse_mail_date(&value)))
    }
}

impl MailClient for Pop3Client {
    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }

    fn list_folders(
        &mut self,
        _base: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Vec<String>, MailboxError> {
        if excluded.contains(POP3_FOLDER) {
            return Ok(Vec::new());
        }
        Ok(vec![POP3_FOLDER.to_string()])
    }

    fn search_messages(
        &mut self,
        _folder: &str,
        range: &ResolvedDateRange,
    ) -> Result<Vec<String>, MailboxError> {
        let all: Vec<u32> = (1..=self.total).collect();
        if range.is_unbounded() {
            return Ok(all.iter().map(u32::to_string).collect());
        }

        // No server-side filtering in POP3; check each message's Date
        // header and keep anything without a parseable one.
        let mut keep = Vec::new();
        for id in all {
            match self.header_date(id) {
                Ok(Some(date)) => {
                    if range.contains(date) {
                        keep.push(id.to_string());
                    }
                }
                Ok(None) => keep.push(id.to_string()),
                Err(error) => {
                    warn!("TOP {id} failed ({error}); including the message");
                    keep.push(id.to_string());
                }
            }
        }
        Ok(keep)
    }

    fn fetch_message(&mut self, folder: &str, id: &str) -> Result<CandidateMessage, MailboxError> {
        self.transport
            .command(&format!("RETR {id}"))
            .map_err(|error| MailboxError::Fetch(format!("RETR {id} failed: {error}")))?;
        let raw = self.transport.read_multiline()?;
        Ok(CandidateMessage::from_raw(id, folder, raw))
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        self.transport.command("QUIT")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};

    use super::Pop3Transport;

    struct FakeStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl FakeStream {
        fn new(input: &str) -> Self {
            Self {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn command_sends_crlf_and_parses_ok() {
        let mut transport = Pop3Transport::new(FakeStream::new("+OK 3 420\r\n"));
        let response = transport.command("STAT").expect("STAT succeeds");
        assert_eq!(response, "3 420");
        assert_eq!(transport.reader.get_ref().output, b"STAT\r\n");
    }

    #[test]
    fn err_response_becomes_protocol_error() {
        let mut transport = Pop3Transport::new(FakeStream::new("-ERR no such message\r\n"));
        let error = transport.command("RETR 99").expect_err("RETR fails");
        assert!(error.to_string().contains("no such message"));
    }

    #[test]
    fn multiline_body_is_unstuffed_and_terminated() {
        let mut transport = Pop3Transport::new(FakeStream::new(
            "Subject: test\r\n..leading dot\r\nbody line\r\n.\r\nleftover",
        ));
        let body = transport.read_multiline().expect("read body");
        assert_eq!(
            body,
            b"Subject: test\r\n.leading dot\r\nbody line\r\n".to_vec()
        );
    }

    #[test]
    fn truncated_multiline_response_errors() {
        let mut transport = Pop3Transport::new(FakeStream::new("partial line\r\n"));
        assert!(transport.read_multiline().is_err());
    }
}
