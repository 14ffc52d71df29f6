//! IMAP mailbox: raw IMAP over rustls.
//!
//! Implements both `MessageSource` (fetch newest messages without touching
//! their flags) and `MailboxControl` (mark read, list folders, copy into a
//! folder). Every operation opens its own session; socket I/O is blocking
//! and runs inside `spawn_blocking`.
//!
//! Messages are addressed by UID, so the `Message::id` handed to the rules
//! engine is the UID string.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::ImapConfig;
use crate::error::MailboxError;
use crate::mailbox::MessageSource;
use crate::rules::dispatch::{Folder, MailboxControl};
use crate::rules::types::Message;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Session ─────────────────────────────────────────────────────────

/// Tagged response to one command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged and tagged lines, CRLF stripped.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks) in the order they arrived.
    literals: Vec<Vec<u8>>,
}

/// One authenticated IMAP connection.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, read the greeting and log in.
    fn open(config: &ImapConfig) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            MailboxError::Connect {
                host: config.host.clone(),
                port: config.port,
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MailboxError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| MailboxError::Tls(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let _greeting = session.read_line()?;

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        match session.command(&login) {
            Ok(_) => {}
            Err(MailboxError::CommandFailed { .. }) => {
                return Err(MailboxError::AuthFailed {
                    username: config.username.clone(),
                });
            }
            Err(e) => return Err(e),
        }

        Ok(session)
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(mailbox)))?;
        Ok(())
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Closed);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_literal(&mut self, len: usize) -> Result<Vec<u8>, MailboxError> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Send a command and collect its response up to the tagged status line.
    ///
    /// A tagged `NO` / `BAD` is returned as `CommandFailed`.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_length(&line) {
                response.literals.push(self.read_literal(len)?);
            }
            let tagged = line.starts_with(&format!("{tag} "));
            response.lines.push(line);
            if tagged {
                break;
            }
        }

        let status = response.lines.last().map(String::as_str).unwrap_or_default();
        if !tagged_ok(status, &tag) {
            return Err(MailboxError::CommandFailed {
                command: command_name(cmd),
                response: status.to_string(),
            });
        }
        Ok(response)
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP-backed message source and mailbox control.
#[derive(Debug, Clone)]
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    /// Run a blocking closure against a fresh session with the mailbox selected.
    async fn with_session<T, F>(&self, select: bool, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::open(&config)?;
            if select {
                session.select(&config.mailbox)?;
            }
            let result = op(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MessageSource for ImapMailbox {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, MailboxError> {
        self.with_session(true, move |session| {
            let search = session.command("UID SEARCH ALL")?;
            let uids = parse_search_response(&search.lines);
            let start = uids.len().saturating_sub(limit);

            let mut messages = Vec::new();
            for uid in &uids[start..] {
                let fetch = session.command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?;
                let Some(raw) = fetch.literals.first() else {
                    warn!(uid = %uid, "FETCH returned no message body");
                    continue;
                };
                match parse_message(uid, raw) {
                    Ok(message) => messages.push(message),
                    Err(e) => warn!(uid = %uid, error = %e, "Skipping unparseable message"),
                }
            }
            debug!(count = messages.len(), "Fetched messages");
            Ok(messages)
        })
        .await
    }
}

#[async_trait]
impl MailboxControl for ImapMailbox {
    async fn mark_read(&self, message_id: &str) -> Result<(), MailboxError> {
        let uid = message_id.to_string();
        self.with_session(true, move |session| {
            session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
            Ok(())
        })
        .await
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, MailboxError> {
        self.with_session(false, |session| {
            let list = session.command("LIST \"\" \"*\"")?;
            Ok(parse_list_response(&list))
        })
        .await
    }

    async fn add_to_folder(&self, message_id: &str, folder_id: &str) -> Result<(), MailboxError> {
        let uid = message_id.to_string();
        let folder = folder_id.to_string();
        self.with_session(true, move |session| {
            session.command(&format!("UID COPY {uid} {}", quote(&folder)))?;
            Ok(())
        })
        .await
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

/// Quote a string as an IMAP quoted string.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Undo `quote`. Unquoted atoms are returned as-is.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        s.to_string()
    }
}

/// Length of a trailing `{n}` literal marker, if the line has one.
fn literal_length(line: &str) -> Option<usize> {
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].trim_end_matches('+').parse().ok()
}

fn tagged_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .map(|rest| rest.trim_start().to_uppercase().starts_with("OK"))
        .unwrap_or(false)
}

/// First word(s) of a command for error messages; never includes arguments
/// like credentials.
fn command_name(cmd: &str) -> String {
    let mut words = cmd.split_whitespace();
    match (words.next(), words.next()) {
        (Some("UID"), Some(sub)) => format!("UID {sub}"),
        (Some(first), _) => first.to_string(),
        _ => String::new(),
    }
}

/// UIDs from `* SEARCH` lines, in server order.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .map(String::from)
        .collect()
}

/// Folders from a `LIST` response, in server order.
///
/// Literals are handed out in the order their `{n}` markers appear.
fn parse_list_response(response: &Response) -> Vec<Folder> {
    let mut literals = response.literals.iter();
    let mut folders = Vec::new();
    for line in &response.lines {
        let literal = literal_length(line).and_then(|_| literals.next());
        if let Some(folder) = parse_list_line(line, literal.map(Vec::as_slice)) {
            folders.push(folder);
        }
    }
    folders
}

/// Parse one `* LIST (flags) "delim" name` line into a folder.
///
/// A name sent as a `{n}` literal is taken from `literal`. Folders flagged
/// `\Noselect` can't hold messages and are skipped.
fn parse_list_line(line: &str, literal: Option<&[u8]>) -> Option<Folder> {
    let rest = line.strip_prefix("* LIST ")?;
    let flags_end = rest.find(')')?;
    let flags = &rest[..=flags_end];
    if flags.to_lowercase().contains("\\noselect") {
        return None;
    }

    let after_flags = rest[flags_end + 1..].trim_start();
    let after_delim = match after_flags.strip_prefix("NIL") {
        Some(r) => r,
        None => skip_quoted(after_flags)?,
    };

    let raw_name = after_delim.trim();
    let name = match literal {
        Some(bytes) if literal_length(raw_name).is_some() => {
            String::from_utf8_lossy(bytes).into_owned()
        }
        _ => unquote(raw_name),
    };
    if name.is_empty() {
        return None;
    }
    Some(Folder::new(name.clone(), name))
}

/// Skip a leading quoted string, honoring backslash escapes.
fn skip_quoted(s: &str) -> Option<&str> {
    let body = s.strip_prefix('"')?;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(&body[i + 1..]),
            _ => {}
        }
    }
    None
}

/// Build a `Message` from a raw RFC 822 payload.
fn parse_message(uid: &str, raw: &[u8]) -> Result<Message, MailboxError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailboxError::Parse {
            uid: uid.to_string(),
        })?;

    let mut message = Message::new(
        uid,
        extract_sender(&parsed),
        parsed.subject().unwrap_or("No Subject"),
        extract_text(&parsed),
    );
    if let Some(received_at) = parsed.date().and_then(to_utc) {
        message = message.with_received_at(received_at);
    }
    Ok(message)
}

/// `Name <address>` when a display name exists, otherwise the bare address.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "Unknown Sender".to_string();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "Unknown Sender".to_string(),
    }
}

/// Plain-text body; falls back to stripped HTML, then to empty.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Strip HTML tags and normalize whitespace.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert a `Date:` header value to UTC, honoring its offset.
fn to_utc(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let local = NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))?
        .and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))?
        .and_utc();
    let offset = i64::from(d.tz_hour) * 3600 + i64::from(d.tz_minute) * 60;
    let offset = if d.tz_before_gmt { -offset } else { offset };
    Some(local - chrono::Duration::seconds(offset))
}
