//! IMAP mail provider: raw IMAP4rev1 over rustls.
//!
//! The protocol work is blocking and runs inside `spawn_blocking`, one call
//! per stream item, each bounded by the network timeout. Only the commands
//! the pipeline needs are spoken: `LOGIN`, `SELECT`, `UID SEARCH UNSEEN`,
//! `UID FETCH <uid> BODY.PEEK[]`, `UID STORE +FLAGS (\Seen)` and `LOGOUT`.
//! `BODY.PEEK[]` leaves `\Seen` alone, so listing and fetching never mark
//! anything read.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::error::FetchError;
use crate::mail::parse::parse_message;
use crate::mail::{MailProvider, MessageStream};
use crate::pipeline::types::Message;

/// Refuse literals larger than this.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

// ── Transport ───────────────────────────────────────────────────────

/// Opens the byte stream an [`ImapSession`] talks over.
pub trait Connector: Send + Sync + 'static {
    type Stream: Read + Write + Send + 'static;

    fn connect(&self) -> Result<Self::Stream, FetchError>;
}

/// TCP + TLS via rustls with the webpki root store.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TlsConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn connect_error(&self, reason: impl std::fmt::Display) -> FetchError {
        FetchError::Connect {
            host: format!("{}:{}", self.host, self.port),
            reason: reason.to_string(),
        }
    }
}

impl Connector for TlsConnector {
    type Stream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

    fn connect(&self) -> Result<Self::Stream, FetchError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(e))?
            .next()
            .ok_or_else(|| self.connect_error("host did not resolve"))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| self.connect_error(e))?;
        tcp.set_read_timeout(Some(self.timeout))
            .map_err(|e| self.connect_error(e))?;
        tcp.set_write_timeout(Some(self.timeout))
            .map_err(|e| self.connect_error(e))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(self.host.clone())
            .map_err(|e| self.connect_error(e))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| self.connect_error(e))?;

        debug!(host = %self.host, port = self.port, "IMAP TLS connection opened");
        Ok(rustls::StreamOwned::new(conn, tcp))
    }
}

// ── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response, with any literals it carried.
#[derive(Debug)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Response {
    untagged: Vec<Untagged>,
    status: Status,
    detail: String,
}

/// A logged-in-or-not IMAP conversation over any byte stream.
pub struct ImapSession<S> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap a fresh stream and consume the server greeting.
    pub fn open(stream: S) -> Result<Self, FetchError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(FetchError::Protocol(format!("unexpected greeting: {greeting}")));
        }
        Ok(session)
    }

    pub fn login(&mut self, username: &str, password: &SecretString) -> Result<(), FetchError> {
        let command = format!(
            "LOGIN {} {}",
            quote(username),
            quote(password.expose_secret())
        );
        let response = self.command(&command, "LOGIN")?;
        if response.status != Status::Ok {
            debug!(detail = %response.detail, "IMAP login refused");
            return Err(FetchError::AuthFailed {
                username: username.to_string(),
            });
        }
        Ok(())
    }

    /// Select a mailbox and return its UIDVALIDITY (0 if not reported).
    pub fn select(&mut self, mailbox: &str) -> Result<u32, FetchError> {
        let response = self.command(&format!("SELECT {}", quote(mailbox)), "SELECT")?;
        let response = expect_ok(response, "SELECT")?;
        let uidvalidity = response
            .untagged
            .iter()
            .find_map(|u| bracketed_number(&u.text, "UIDVALIDITY"))
            .unwrap_or(0);
        Ok(uidvalidity)
    }

    /// UIDs of unread messages in the order the server listed them.
    pub fn search_unseen(&mut self) -> Result<Vec<u32>, FetchError> {
        let response = expect_ok(self.command("UID SEARCH UNSEEN", "SEARCH")?, "SEARCH")?;
        let mut seen = HashSet::new();
        let uids: Vec<u32> = response
            .untagged
            .iter()
            .filter_map(|u| u.text.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter_map(|n| n.parse::<u32>().ok())
            .filter(|uid| seen.insert(*uid))
            .collect();
        Ok(uids)
    }

    /// Raw RFC 5322 bytes for `uid`, or `None` if it no longer exists.
    pub fn fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>, FetchError> {
        let response = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"), "FETCH")?;
        let response = expect_ok(response, "FETCH")?;
        Ok(response
            .untagged
            .into_iter()
            .filter(|u| u.text.contains(" FETCH "))
            .find_map(|u| u.literals.into_iter().next()))
    }

    pub fn mark_seen(&mut self, uid: u32) -> Result<(), FetchError> {
        let response = self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"), "STORE")?;
        expect_ok(response, "STORE")?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), FetchError> {
        self.command("LOGOUT", "LOGOUT")?;
        Ok(())
    }

    /// Send a tagged command and collect everything up to its completion.
    ///
    /// `name` is what gets logged, so credentials never reach the logs.
    fn command(&mut self, command: &str, name: &str) -> Result<Response, FetchError> {
        let tag = format!("A{:04}", self.next_tag);
        self.next_tag += 1;
        debug!(tag = %tag, command = name, "IMAP command");

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let (text, literals) = self.read_item()?;
            if let Some(rest) = text.strip_prefix(tag.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let (status, detail) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match status.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    "BAD" => Status::Bad,
                    other => {
                        return Err(FetchError::Protocol(format!(
                            "{name}: unexpected completion status {other}"
                        )));
                    }
                };
                return Ok(Response {
                    untagged,
                    status,
                    detail: detail.to_string(),
                });
            }
            untagged.push(Untagged { text, literals });
        }
    }

    /// One logical response line, reading through any `{N}` literals.
    fn read_item(&mut self) -> Result<(String, Vec<Vec<u8>>), FetchError> {
        let mut text = self.read_line()?;
        let mut literals = Vec::new();
        while let Some(len) = literal_len(&text) {
            if len > MAX_LITERAL_BYTES {
                return Err(FetchError::Protocol(format!("literal of {len} bytes refused")));
            }
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            literals.push(literal);
            text.push_str(&self.read_line()?);
        }
        Ok((text, literals))
    }

    fn read_line(&mut self) -> Result<String, FetchError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(FetchError::Protocol("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }
}

fn expect_ok(response: Response, name: &str) -> Result<Response, FetchError> {
    match response.status {
        Status::Ok => Ok(response),
        Status::No | Status::Bad => Err(FetchError::Protocol(format!(
            "{name} failed: {}",
            response.detail
        ))),
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Length of a trailing `{N}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let start = body.rfind('{')?;
    body[start + 1..].parse().ok()
}

/// `n` from a response code like `[UIDVALIDITY n]`.
fn bracketed_number(text: &str, code: &str) -> Option<u32> {
    let start = text.find(&format!("[{code} "))? + code.len() + 2;
    let rest = &text[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

// ── Provider ────────────────────────────────────────────────────────

struct Connected<S> {
    session: ImapSession<S>,
    uidvalidity: u32,
    /// Message identifier → UID, for `mark_handled`.
    uids: HashMap<String, u32>,
}

type Shared<S> = Arc<Mutex<Option<Connected<S>>>>;

/// [`MailProvider`] over IMAP. One session per `list_unread` call.
pub struct ImapMailbox<C: Connector = TlsConnector> {
    connector: Arc<C>,
    username: String,
    password: SecretString,
    mailbox: String,
    timeout: Duration,
    inner: Shared<C::Stream>,
}

impl ImapMailbox<TlsConnector> {
    pub fn new(config: &ImapConfig, password: SecretString, timeout: Duration) -> Self {
        Self::with_connector(
            TlsConnector::new(config.host.clone(), config.port, timeout),
            config,
            password,
            timeout,
        )
    }
}

impl<C: Connector> ImapMailbox<C> {
    pub fn with_connector(
        connector: C,
        config: &ImapConfig,
        password: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            connector: Arc::new(connector),
            username: config.username.clone(),
            password,
            mailbox: config.mailbox.clone(),
            timeout,
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl<C: Connector> MailProvider for ImapMailbox<C> {
    async fn list_unread(&self) -> Result<MessageStream, FetchError> {
        let connector = Arc::clone(&self.connector);
        let username = self.username.clone();
        let password = self.password.clone();
        let mailbox = self.mailbox.clone();
        let inner = Arc::clone(&self.inner);

        let (uidvalidity, uids) = blocking(self.timeout, move || {
            let mut session = ImapSession::open(connector.connect()?)?;
            session.login(&username, &password)?;
            let uidvalidity = session.select(&mailbox)?;
            let uids = session.search_unseen()?;

            let mut guard = lock(&inner)?;
            if let Some(mut previous) = guard.take()
                && let Err(e) = previous.session.logout()
            {
                debug!(error = %e, "Previous IMAP session did not log out cleanly");
            }
            *guard = Some(Connected {
                session,
                uidvalidity,
                uids: HashMap::new(),
            });
            Ok((uidvalidity, uids))
        })
        .await?;

        info!(
            mailbox = %self.mailbox,
            uidvalidity,
            unread = uids.len(),
            "Listed unread messages"
        );

        let timeout = self.timeout;
        let inner = Arc::clone(&self.inner);
        let stream = futures::stream::iter(uids)
            .then(move |uid| {
                let inner = Arc::clone(&inner);
                async move { blocking(timeout, move || fetch_one(&inner, uid)).await }
            })
            .filter_map(|item| async move { item.transpose() });
        Ok(Box::pin(stream))
    }

    async fn mark_handled(&self, id: &str) -> Result<(), FetchError> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        blocking(self.timeout, move || {
            let mut guard = lock(&inner)?;
            let connected = guard
                .as_mut()
                .ok_or_else(|| FetchError::Protocol("IMAP session is closed".into()))?;
            let uid = connected
                .uids
                .get(&id)
                .copied()
                .ok_or_else(|| FetchError::Protocol(format!("no UID known for message {id}")))?;
            connected.session.mark_seen(uid)?;
            debug!(id = %id, uid, "Marked message seen");
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), FetchError> {
        let inner = Arc::clone(&self.inner);
        blocking(self.timeout, move || {
            if let Some(mut connected) = lock(&inner)?.take() {
                connected.session.logout()?;
            }
            Ok(())
        })
        .await
    }
}

/// Fetch and parse one UID. `Ok(None)` when the message vanished.
fn fetch_one<S: Read + Write>(inner: &Mutex<Option<Connected<S>>>, uid: u32) -> Result<Option<Message>, FetchError> {
    let mut guard = lock(inner)?;
    let connected = guard
        .as_mut()
        .ok_or_else(|| FetchError::Protocol("IMAP session is closed".into()))?;

    let fallback_id = format!("uid:{}:{uid}", connected.uidvalidity);
    let Some(raw) = connected.session.fetch(uid)? else {
        warn!(uid, "Unread message disappeared before it could be fetched");
        return Ok(None);
    };
    let message = parse_message(&raw, &fallback_id, Utc::now())?;
    connected.uids.insert(message.id.clone(), uid);
    Ok(Some(message))
}

fn lock<S: Read + Write>(
    inner: &Mutex<Option<Connected<S>>>,
) -> Result<MutexGuard<'_, Option<Connected<S>>>, FetchError> {
    inner
        .lock()
        .map_err(|_| FetchError::Protocol("IMAP session lock poisoned".into()))
}

/// Run blocking IMAP work on the blocking pool, bounded by `timeout`.
async fn blocking<T, F>(timeout: Duration, f: F) -> Result<T, FetchError>
where
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Err(_) => Err(FetchError::Timeout(timeout)),
        Ok(Err(e)) => Err(FetchError::Protocol(format!("IMAP task failed: {e}"))),
        Ok(Ok(result)) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays canned server output and records what the client sent.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(server: &[u8]) -> (Scripted, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Scripted {
                input: Cursor::new(server.to_vec()),
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }

    fn sent_text(sent: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(sent.lock().unwrap().clone()).unwrap()
    }

    fn fetch_response(tag: &str, seq: u32, uid: u32, raw: &str) -> String {
        format!(
            "* {seq} FETCH (UID {uid} BODY[] {{{}}}\r\n{raw})\r\n{tag} OK FETCH completed\r\n",
            raw.len()
        )
    }

    const MSG_A: &str = "From: alice@x.com\r\nSubject: Invoice\r\nMessage-ID: <a@x.com>\r\n\r\nPay me\r\n";
    const MSG_B: &str = "From: bob@y.org\r\nSubject: Hello\r\n\r\nNo id here\r\n";

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_marker_detection() {
        assert_eq!(literal_len("* 1 FETCH (BODY[] {42}"), Some(42));
        assert_eq!(literal_len("* 1 FETCH (FLAGS (\\Seen))"), None);
        assert_eq!(literal_len("* OK {nope}"), None);
    }

    #[test]
    fn uidvalidity_extraction() {
        assert_eq!(
            bracketed_number("* OK [UIDVALIDITY 3857529045] UIDs valid", "UIDVALIDITY"),
            Some(3857529045)
        );
        assert_eq!(bracketed_number("* 12 EXISTS", "UIDVALIDITY"), None);
    }

    // ── Session ─────────────────────────────────────────────────────

    #[test]
    fn session_login_select_search() {
        let server = b"* OK IMAP4rev1 ready\r\n\
A0001 OK LOGIN completed\r\n\
* 3 EXISTS\r\n\
* OK [UIDVALIDITY 77] UIDs valid\r\n\
A0002 OK [READ-WRITE] SELECT completed\r\n\
* SEARCH 12 5 9 5\r\n\
A0003 OK SEARCH completed\r\n";
        let (stream, sent) = scripted(server);
        let mut session = ImapSession::open(stream).unwrap();
        session
            .login("me@example.com", &SecretString::from("secret".to_string()))
            .unwrap();
        assert_eq!(session.select("INBOX").unwrap(), 77);
        assert_eq!(session.search_unseen().unwrap(), vec![12, 5, 9]);

        let sent = sent_text(&sent);
        assert!(sent.contains("A0001 LOGIN \"me@example.com\" \"secret\"\r\n"));
        assert!(sent.contains("A0002 SELECT \"INBOX\"\r\n"));
        assert!(sent.contains("A0003 UID SEARCH UNSEEN\r\n"));
    }

    #[test]
    fn login_refused_is_auth_failure() {
        let server = b"* OK ready\r\nA0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let (stream, _) = scripted(server);
        let mut session = ImapSession::open(stream).unwrap();
        let err = session
            .login("me", &SecretString::from("wrong".to_string()))
            .unwrap_err();
        assert!(matches!(err, FetchError::AuthFailed { ref username } if username == "me"));
    }

    #[test]
    fn bad_greeting_is_protocol_error() {
        let (stream, _) = scripted(b"* BYE go away\r\n");
        assert!(matches!(
            ImapSession::open(stream),
            Err(FetchError::Protocol(_))
        ));
    }

    #[test]
    fn fetch_reads_literal_and_peeks() {
        let mut server = b"* OK ready\r\n".to_vec();
        server.extend_from_slice(fetch_response("A0001", 1, 5, MSG_A).as_bytes());
        let (stream, sent) = scripted(&server);

        let mut session = ImapSession::open(stream).unwrap();
        let raw = session.fetch(5).unwrap().unwrap();
        assert_eq!(raw, MSG_A.as_bytes());
        assert!(sent_text(&sent).contains("A0001 UID FETCH 5 BODY.PEEK[]\r\n"));
    }

    #[test]
    fn fetch_of_vanished_uid_is_none() {
        let server = b"* OK ready\r\nA0001 OK FETCH completed\r\n";
        let (stream, _) = scripted(server);
        let mut session = ImapSession::open(stream).unwrap();
        assert!(session.fetch(99).unwrap().is_none());
    }

    #[test]
    fn closed_connection_is_protocol_error() {
        let (stream, _) = scripted(b"* OK ready\r\n");
        let mut session = ImapSession::open(stream).unwrap();
        assert!(matches!(
            session.search_unseen(),
            Err(FetchError::Protocol(_))
        ));
    }

    #[test]
    fn untagged_lines_are_not_completions() {
        // An untagged OK must not end the command.
        let server = b"* OK ready\r\n* OK still working\r\nA0001 OK STORE completed\r\n";
        let (stream, sent) = scripted(server);
        let mut session = ImapSession::open(stream).unwrap();
        session.mark_seen(7).unwrap();
        assert!(sent_text(&sent).contains("A0001 UID STORE 7 +FLAGS (\\Seen)\r\n"));
    }

    // ── Mailbox ─────────────────────────────────────────────────────

    struct ScriptedConnector {
        server: Vec<u8>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Connector for ScriptedConnector {
        type Stream = Scripted;

        fn connect(&self) -> Result<Scripted, FetchError> {
            Ok(Scripted {
                input: Cursor::new(self.server.clone()),
                sent: Arc::clone(&self.sent),
            })
        }
    }

    fn imap_config() -> ImapConfig {
        ImapConfig {
            host: "imap.example.com".into(),
            username: "me@example.com".into(),
            ..ImapConfig::default()
        }
    }

    #[tokio::test]
    async fn mailbox_streams_parsed_messages() {
        let mut server = b"* OK ready\r\n\
A0001 OK LOGIN completed\r\n\
* OK [UIDVALIDITY 42] UIDs valid\r\n\
A0002 OK SELECT completed\r\n\
* SEARCH 5 6\r\n\
A0003 OK SEARCH completed\r\n"
            .to_vec();
        server.extend_from_slice(fetch_response("A0004", 1, 5, MSG_A).as_bytes());
        server.extend_from_slice(fetch_response("A0005", 2, 6, MSG_B).as_bytes());
        server.extend_from_slice(b"A0006 OK STORE completed\r\n");
        server.extend_from_slice(b"* BYE logging out\r\nA0007 OK LOGOUT completed\r\n");

        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector {
            server,
            sent: Arc::clone(&sent),
        };
        let mailbox = ImapMailbox::with_connector(
            connector,
            &imap_config(),
            SecretString::from("pw".to_string()),
            Duration::from_secs(5),
        );

        let messages: Vec<_> = mailbox.list_unread().await.unwrap().collect().await;
        assert_eq!(messages.len(), 2);
        let first = messages[0].as_ref().unwrap();
        let second = messages[1].as_ref().unwrap();
        assert_eq!(first.id, "a@x.com");
        assert_eq!(first.sender, "alice@x.com");
        assert_eq!(second.id, "uid:42:6");

        mailbox.mark_handled("a@x.com").await.unwrap();
        mailbox.close().await.unwrap();

        let sent = sent_text(&sent);
        assert!(sent.contains("A0006 UID STORE 5 +FLAGS (\\Seen)\r\n"));
        assert!(sent.contains("A0007 LOGOUT\r\n"));
    }

    #[tokio::test]
    async fn mark_handled_unknown_id_fails() {
        let server = b"* OK ready\r\n\
A0001 OK LOGIN completed\r\n\
A0002 OK SELECT completed\r\n\
* SEARCH\r\n\
A0003 OK SEARCH completed\r\n"
            .to_vec();
        let mailbox = ImapMailbox::with_connector(
            ScriptedConnector {
                server,
                sent: Arc::new(Mutex::new(Vec::new())),
            },
            &imap_config(),
            SecretString::from("pw".to_string()),
            Duration::from_secs(5),
        );

        let messages: Vec<_> = mailbox.list_unread().await.unwrap().collect().await;
        assert!(messages.is_empty());
        assert!(mailbox.mark_handled("nobody@nowhere").await.is_err());
    }

    /// A server that accepts the connection and then says nothing.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            // Bounded so the blocking pool can drain when the test ends.
            std::thread::sleep(Duration::from_millis(500));
            Ok(0)
        }
    }

    impl Write for Silent {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct SilentConnector;

    impl Connector for SilentConnector {
        type Stream = Silent;

        fn connect(&self) -> Result<Silent, FetchError> {
            Ok(Silent)
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let timeout = Duration::from_millis(100);
        let mailbox = ImapMailbox::with_connector(
            SilentConnector,
            &imap_config(),
            SecretString::from("pw".to_string()),
            timeout,
        );

        let started = std::time::Instant::now();
        let result = mailbox.list_unread().await;
        assert!(matches!(result, Err(FetchError::Timeout(d)) if d == timeout));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn login_failure_surfaces_from_list_unread() {
        let server = b"* OK ready\r\nA0001 NO bad password\r\n".to_vec();
        let mailbox = ImapMailbox::with_connector(
            ScriptedConnector {
                server,
                sent: Arc::new(Mutex::new(Vec::new())),
            },
            &imap_config(),
            SecretString::from("pw".to_string()),
            Duration::from_secs(5),
        );
        assert!(matches!(
            mailbox.list_unread().await,
            Err(FetchError::AuthFailed { .. })
        ));
    }
}
