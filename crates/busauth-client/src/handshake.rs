//! Client handshake state machine.
//!
//! Flow:
//! 1. Send a NUL byte (with credentials where supported)
//! 2. Send `AUTH <mechanism> <initial-response>` for the first queued mechanism
//! 3. React to server replies per [`plan`] until `OK` is answered with `BEGIN`
//!
//! A rejected mechanism is replaced by the next one in the queue. Running out
//! of mechanisms, losing the connection, or an unexpected reply while waiting
//! for a rejection closes the connection and fails the handshake.

use crate::auth::{Authenticator, ChallengeOutcome, ChallengeResponse};
use crate::observer::{HandshakeObserver, TracingObserver};
use busauth_core::{
    read_fields, AuthError, AuthResult, Command, Connection, Reply, ReplyKind,
    DEFAULT_MAX_LINE_LEN,
};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// `AUTH` sent, no reply classified yet.
    Starting,
    WaitingForData,
    WaitingForOk,
    /// `CANCEL` sent, expecting the server to reject the mechanism.
    WaitingForReject,
    /// `BEGIN` sent. Nothing more is written.
    Authenticated,
    /// Terminal failure; the connection has been closed.
    Rejected,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Authenticated | HandshakeState::Rejected)
    }
}

/// Ordered mechanisms still to try. Only ever shrinks from the front.
#[derive(Default)]
pub struct AuthenticatorQueue {
    items: VecDeque<Box<dyn Authenticator>>,
}

impl AuthenticatorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, authenticator: Box<dyn Authenticator>) {
        self.items.push_back(authenticator);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.push(Box::new(authenticator));
        self
    }

    /// Remove and return the next mechanism.
    pub fn pop(&mut self) -> Option<Box<dyn Authenticator>> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Protocol names in queue order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|a| a.name()).collect()
    }
}

impl fmt::Debug for AuthenticatorQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// What a reply calls for in a given state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Change state and handle the same reply again. Only used from `Starting`.
    Reclassify(HandshakeState),
    /// Pass the `DATA` payload to the active mechanism.
    Challenge,
    /// Drop the active mechanism, send `AUTH` for the next, then enter the state.
    NextMechanism(HandshakeState),
    /// Write the command, then enter the state.
    Send(Command, HandshakeState),
    /// Close the connection and fail.
    Fail(String),
    /// Nothing to do.
    Ignore,
}

/// The transition table.
pub fn plan(state: HandshakeState, reply: &Reply) -> Transition {
    use HandshakeState::*;
    use Transition::*;

    match (state, reply.kind) {
        (Starting, ReplyKind::Ok) => Reclassify(WaitingForOk),
        (Starting, _) => Reclassify(WaitingForData),

        (WaitingForData, ReplyKind::Data) => Challenge,
        (WaitingForData, ReplyKind::Rejected) => NextMechanism(WaitingForData),
        (WaitingForData, ReplyKind::Error) => Send(Command::Cancel, WaitingForReject),
        (WaitingForData, ReplyKind::Ok) => Send(Command::Begin, Authenticated),
        (WaitingForData, _) => Send(Command::Error, WaitingForData),

        (WaitingForOk, ReplyKind::Ok) => Send(Command::Begin, Authenticated),
        (WaitingForOk, ReplyKind::Reject) => NextMechanism(WaitingForData),
        (WaitingForOk, ReplyKind::Data | ReplyKind::Error) => {
            Send(Command::Cancel, WaitingForReject)
        }
        (WaitingForOk, _) => Send(Command::Error, WaitingForOk),

        (WaitingForReject, ReplyKind::Reject) => NextMechanism(WaitingForOk),
        (WaitingForReject, _) => Fail(format!(
            "expected REJECT while waiting for rejection, got {:?}",
            reply.keyword
        )),

        (Authenticated | Rejected, _) => Ignore,
    }
}

/// One authentication attempt over an exclusively owned connection.
pub struct Handshake<C: Connection, O: HandshakeObserver = TracingObserver> {
    conn: C,
    queue: AuthenticatorQueue,
    active: Option<Box<dyn Authenticator>>,
    state: HandshakeState,
    observer: O,
    max_line_len: usize,
}

impl<C: Connection> Handshake<C> {
    pub fn new(conn: C, queue: AuthenticatorQueue) -> Self {
        Self {
            conn,
            queue,
            active: None,
            state: HandshakeState::Starting,
            observer: TracingObserver,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl<C: Connection, O: HandshakeObserver> Handshake<C, O> {
    /// Replace the diagnostic sink.
    pub fn with_observer<P: HandshakeObserver>(self, observer: P) -> Handshake<C, P> {
        Handshake {
            conn: self.conn,
            queue: self.queue,
            active: self.active,
            state: self.state,
            observer,
            max_line_len: self.max_line_len,
        }
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(1);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Name of the mechanism currently in use.
    pub fn active_mechanism(&self) -> Option<&'static str> {
        self.active.as_ref().map(|a| a.name())
    }

    /// Run the handshake to completion.
    ///
    /// On success the connection is returned, positioned right after the
    /// server's final `OK` line. On failure it is closed before returning.
    pub fn authenticate(mut self) -> AuthResult<C> {
        match self.drive() {
            Ok(()) => Ok(self.conn),
            Err(e) => {
                self.set_state(HandshakeState::Rejected);
                if let Err(close_err) = self.conn.close() {
                    debug!("error closing connection after failed auth: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> AuthResult<()> {
        self.conn
            .send_credentials_byte()
            .map_err(|e| AuthError::ConnectionClosed(e.to_string()))?;
        self.next_mechanism()?;

        while self.state != HandshakeState::Authenticated {
            let fields = read_fields(&mut self.conn, self.max_line_len)?;
            self.observer.on_receive(&fields);
            self.handle_reply(&Reply::from_fields(fields))?;
        }
        Ok(())
    }

    /// Apply one server reply.
    fn handle_reply(&mut self, reply: &Reply) -> AuthResult<()> {
        loop {
            match plan(self.state, reply) {
                Transition::Reclassify(next) => {
                    self.set_state(next);
                    continue;
                }
                Transition::Challenge => self.answer_challenge(reply.arg(0).unwrap_or(""))?,
                Transition::NextMechanism(next) => {
                    self.next_mechanism()?;
                    self.set_state(next);
                }
                Transition::Send(command, next) => {
                    self.send(&command)?;
                    self.set_state(next);
                }
                Transition::Fail(reason) => return Err(AuthError::MalformedReply(reason)),
                Transition::Ignore => {}
            }
            return Ok(());
        }
    }

    fn answer_challenge(&mut self, payload: &str) -> AuthResult<()> {
        let response = match self.active.as_mut() {
            Some(active) => match active.respond_to_challenge(payload, &self.observer) {
                Ok(response) => response,
                Err(e) => {
                    self.observer.on_mechanism_failed(active.name(), &e);
                    ChallengeResponse::error()
                }
            },
            None => ChallengeResponse::error(),
        };

        match response.outcome {
            ChallengeOutcome::Continue => {
                self.send(&Command::Data(response.data))?;
                self.set_state(HandshakeState::WaitingForData);
            }
            ChallengeOutcome::Ok => {
                self.send(&Command::Data(response.data))?;
                self.set_state(HandshakeState::WaitingForOk);
            }
            ChallengeOutcome::Error => {
                self.send(&Command::Error)?;
                self.set_state(HandshakeState::WaitingForData);
            }
        }
        Ok(())
    }

    /// Activate the next mechanism that can produce an initial response and send `AUTH`.
    fn next_mechanism(&mut self) -> AuthResult<()> {
        self.active = None;

        while let Some(mut mechanism) = self.queue.pop() {
            let name = mechanism.name();
            match mechanism.initial_response() {
                Ok(initial_response) => {
                    self.observer.on_mechanism(name);
                    self.active = Some(mechanism);
                    return self.send(&Command::Auth {
                        mechanism: name.to_string(),
                        initial_response,
                    });
                }
                Err(e) => self.observer.on_mechanism_failed(name, &e),
            }
        }

        Err(AuthError::AuthenticationFailed(
            "no authentication mechanisms left".into(),
        ))
    }

    fn send(&mut self, command: &Command) -> AuthResult<()> {
        self.observer.on_send(&command.to_string());
        self.conn
            .write_all(&command.encode())
            .and_then(|_| self.conn.flush())
            .map_err(|e| AuthError::ConnectionClosed(e.to_string()))
    }

    fn set_state(&mut self, next: HandshakeState) {
        self.observer.on_transition(self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Anonymous, CookieSha1, External};
    use crate::cookie::{self, CookieLookup, Keyring};
    use crate::observer::NoopObserver;
    use busauth_core::{hex_decode, hex_encode};
    use std::cell::RefCell;
    use std::io::{self, Cursor, Read, Write};
    use std::time::Duration;

    /// Scripted server replies in, client bytes out.
    #[derive(Debug)]
    struct MockConn {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        closes: u32,
    }

    impl MockConn {
        fn new(replies: &str) -> Self {
            Self {
                input: Cursor::new(replies.as_bytes().to_vec()),
                output: Vec::new(),
                closes: 0,
            }
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }

        fn unread(&self) -> &[u8] {
            &self.input.get_ref()[self.input.position() as usize..]
        }
    }

    impl Read for MockConn {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for MockConn {
        fn close(&mut self) -> io::Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    /// Records events for assertions.
    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<String>>,
        failed: RefCell<Vec<String>>,
        retries: RefCell<Vec<String>>,
    }

    impl HandshakeObserver for Recorder {
        fn on_send(&self, line: &str) {
            self.sent.borrow_mut().push(line.to_string());
        }

        fn on_mechanism_failed(&self, name: &str, _error: &AuthError) {
            self.failed.borrow_mut().push(name.to_string());
        }

        fn on_cookie_retry(&self, context: &str, id: u32, _delay: Duration) {
            self.retries.borrow_mut().push(format!("{context} {id}"));
        }
    }

    /// Always fails to produce an initial response.
    struct Broken;

    impl Authenticator for Broken {
        fn name(&self) -> &'static str {
            "BROKEN"
        }

        fn initial_response(&mut self) -> AuthResult<String> {
            Err(AuthError::AuthenticationFailed("no credentials".into()))
        }
    }

    /// Answers every challenge with `DATA` and expects another round.
    struct Stepwise {
        rounds: u32,
    }

    impl Authenticator for Stepwise {
        fn name(&self) -> &'static str {
            "STEPWISE"
        }

        fn initial_response(&mut self) -> AuthResult<String> {
            Ok(String::new())
        }

        fn respond_to_challenge(
            &mut self,
            hex_challenge: &str,
            _observer: &dyn HandshakeObserver,
        ) -> AuthResult<ChallengeResponse> {
            self.rounds += 1;
            Ok(ChallengeResponse::continue_with(hex_encode(format!(
                "{} {hex_challenge}",
                self.rounds
            ))))
        }
    }

    fn two_mechanisms() -> AuthenticatorQueue {
        AuthenticatorQueue::new()
            .with(External::for_uid(1000))
            .with(Anonymous::default())
    }

    fn handshake_in(
        conn: &mut MockConn,
        state: HandshakeState,
    ) -> Handshake<&mut MockConn, NoopObserver> {
        let mut hs = Handshake::new(conn, two_mechanisms()).with_observer(NoopObserver);
        hs.active = hs.queue.pop();
        hs.state = state;
        hs
    }

    fn reply(line: &str) -> Reply {
        Reply::parse(line)
    }

    // ── transition table ─────────────────────────────────────────────

    #[test]
    fn table_starting() {
        use HandshakeState::*;
        assert_eq!(plan(Starting, &reply("OK abc")), Transition::Reclassify(WaitingForOk));
        assert_eq!(plan(Starting, &reply("CONTINUE")), Transition::Reclassify(WaitingForData));
        assert_eq!(plan(Starting, &reply("REJECTED")), Transition::Reclassify(WaitingForData));
        assert_eq!(plan(Starting, &reply("DATA 00")), Transition::Reclassify(WaitingForData));
    }

    #[test]
    fn table_waiting_for_data() {
        use HandshakeState::*;
        assert_eq!(plan(WaitingForData, &reply("DATA 00")), Transition::Challenge);
        assert_eq!(
            plan(WaitingForData, &reply("REJECTED EXTERNAL")),
            Transition::NextMechanism(WaitingForData)
        );
        assert_eq!(
            plan(WaitingForData, &reply("ERROR")),
            Transition::Send(Command::Cancel, WaitingForReject)
        );
        assert_eq!(
            plan(WaitingForData, &reply("OK guid")),
            Transition::Send(Command::Begin, Authenticated)
        );
        for other in ["FOO", "REJECT", "CONTINUE", "", "ok"] {
            assert_eq!(
                plan(WaitingForData, &reply(other)),
                Transition::Send(Command::Error, WaitingForData),
                "{other:?}"
            );
        }
    }

    #[test]
    fn table_waiting_for_ok() {
        use HandshakeState::*;
        assert_eq!(
            plan(WaitingForOk, &reply("OK guid")),
            Transition::Send(Command::Begin, Authenticated)
        );
        assert_eq!(
            plan(WaitingForOk, &reply("REJECT")),
            Transition::NextMechanism(WaitingForData)
        );
        assert_eq!(
            plan(WaitingForOk, &reply("REJECTED")),
            Transition::Send(Command::Error, WaitingForOk)
        );
        assert_eq!(
            plan(WaitingForOk, &reply("DATA 00")),
            Transition::Send(Command::Cancel, WaitingForReject)
        );
        assert_eq!(
            plan(WaitingForOk, &reply("ERROR")),
            Transition::Send(Command::Cancel, WaitingForReject)
        );
        for other in ["FOO", "CONTINUE", "REJECTED EXTERNAL", ""] {
            assert_eq!(
                plan(WaitingForOk, &reply(other)),
                Transition::Send(Command::Error, WaitingForOk),
                "{other:?}"
            );
        }
    }

    #[test]
    fn table_waiting_for_reject() {
        use HandshakeState::*;
        assert_eq!(
            plan(WaitingForReject, &reply("REJECT")),
            Transition::NextMechanism(WaitingForOk)
        );
        for other in ["REJECTED", "OK", "DATA 00", "ERROR", "FOO"] {
            assert!(
                matches!(plan(WaitingForReject, &reply(other)), Transition::Fail(_)),
                "{other:?}"
            );
        }
    }

    #[test]
    fn terminal_states_ignore_input() {
        assert_eq!(plan(HandshakeState::Authenticated, &reply("OK")), Transition::Ignore);
        assert_eq!(plan(HandshakeState::Rejected, &reply("DATA 00")), Transition::Ignore);
        assert!(HandshakeState::Authenticated.is_terminal());
        assert!(!HandshakeState::WaitingForOk.is_terminal());
    }

    // ── driver, one reply at a time ──────────────────────────────────

    #[test]
    fn unlisted_keyword_sends_error_and_stays() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForOk);
        hs.handle_reply(&reply("WHATEVER")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForOk);
        drop(hs);
        assert_eq!(conn.written(), "ERROR\r\n");
    }

    #[test]
    fn rejected_while_waiting_for_ok_sends_error_and_keeps_mechanism() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForOk);
        hs.handle_reply(&reply("REJECTED")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForOk);
        assert_eq!(hs.active_mechanism(), Some("EXTERNAL"));
        drop(hs);
        assert_eq!(conn.written(), "ERROR\r\n");
    }

    #[test]
    fn rejected_while_waiting_for_reject_is_fatal() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForReject);
        let err = hs.handle_reply(&reply("REJECTED")).unwrap_err();
        assert!(matches!(err, AuthError::MalformedReply(_)));
        drop(hs);
        assert_eq!(conn.written(), "");
    }

    #[test]
    fn continue_outcome_sends_data_and_waits_for_more() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForData);
        hs.active = Some(Box::new(Stepwise { rounds: 0 }));

        hs.handle_reply(&reply("DATA 00")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForData);
        hs.handle_reply(&reply("DATA ff")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForData);
        assert_eq!(hs.active_mechanism(), Some("STEPWISE"));
        drop(hs);

        assert_eq!(
            conn.written(),
            format!("DATA {}\r\nDATA {}\r\n", hex_encode("1 00"), hex_encode("2 ff"))
        );
    }

    #[test]
    fn error_while_waiting_for_data_cancels() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForData);
        hs.handle_reply(&reply("ERROR")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForReject);
        drop(hs);
        assert_eq!(conn.written(), "CANCEL\r\n");
    }

    #[test]
    fn reject_while_waiting_for_reject_resends_auth() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForReject);
        hs.handle_reply(&reply("REJECT")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForOk);
        assert_eq!(hs.active_mechanism(), Some("ANONYMOUS"));
        drop(hs);
        assert_eq!(conn.written(), "AUTH ANONYMOUS 62757361757468\r\n");
    }

    #[test]
    fn data_to_non_challenge_mechanism_sends_error() {
        let mut conn = MockConn::new("");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForData);
        hs.handle_reply(&reply("DATA 00")).unwrap();
        assert_eq!(hs.state(), HandshakeState::WaitingForData);
        drop(hs);
        assert_eq!(conn.written(), "ERROR\r\n");
    }

    #[test]
    fn unexpected_reply_while_waiting_for_reject_is_fatal() {
        let mut conn = MockConn::new("OK guid\r\n");
        let mut hs = handshake_in(&mut conn, HandshakeState::WaitingForReject);
        let err = hs.handle_reply(&reply("OK guid")).unwrap_err();
        assert!(matches!(err, AuthError::MalformedReply(_)));
    }

    // ── full runs ────────────────────────────────────────────────────

    #[test]
    fn rejected_then_ok_authenticates() {
        let mut conn = MockConn::new("REJECTED EXTERNAL\r\nOK 1234deadbeef\r\nOK\r\n");
        Handshake::new(&mut conn, two_mechanisms())
            .authenticate()
            .unwrap();

        assert_eq!(
            conn.written(),
            "\0AUTH EXTERNAL 31303030\r\nAUTH ANONYMOUS 62757361757468\r\nBEGIN\r\n"
        );
        assert!(conn.output.ends_with(b"BEGIN\r\n"));
        assert_eq!(conn.closes, 0);
        assert_eq!(conn.unread(), b"OK\r\n");
    }

    #[test]
    fn immediate_ok_sends_begin() {
        let mut conn = MockConn::new("OK 1234deadbeef\r\n");
        Handshake::new(&mut conn, two_mechanisms())
            .authenticate()
            .unwrap();
        assert_eq!(conn.written(), "\0AUTH EXTERNAL 31303030\r\nBEGIN\r\n");
    }

    #[test]
    fn exhausted_queue_fails_and_closes_once() {
        let mut conn = MockConn::new("REJECTED\r\nREJECTED\r\nREJECTED\r\n");
        let err = Handshake::new(&mut conn, two_mechanisms())
            .authenticate()
            .unwrap_err();

        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
        assert_eq!(conn.closes, 1);
        assert_eq!(conn.written().matches("AUTH ").count(), 2);
        assert!(!conn.written().contains("BEGIN"));
        assert_eq!(conn.unread(), b"REJECTED\r\n");
    }

    #[test]
    fn empty_queue_fails_before_reading() {
        let mut conn = MockConn::new("OK\r\n");
        let err = Handshake::new(&mut conn, AuthenticatorQueue::new())
            .authenticate()
            .unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
        assert_eq!(conn.written(), "\0");
        assert_eq!(conn.closes, 1);
    }

    #[test]
    fn peer_hangup_is_connection_closed() {
        let mut conn = MockConn::new("");
        let err = Handshake::new(&mut conn, two_mechanisms())
            .authenticate()
            .unwrap_err();
        assert!(matches!(err, AuthError::ConnectionClosed(_)));
        assert_eq!(conn.closes, 1);
    }

    #[test]
    fn broken_mechanism_is_skipped() {
        let recorder = Recorder::default();
        let queue = AuthenticatorQueue::new()
            .with(Broken)
            .with(Anonymous::default());
        let mut conn = MockConn::new("OK guid\r\n");

        Handshake::new(&mut conn, queue)
            .with_observer(&recorder)
            .authenticate()
            .unwrap();

        assert_eq!(*recorder.failed.borrow(), vec!["BROKEN"]);
        assert_eq!(
            *recorder.sent.borrow(),
            vec!["AUTH ANONYMOUS 62757361757468", "BEGIN"]
        );
    }

    #[test]
    fn cancel_then_garbage_fails() {
        let mut conn = MockConn::new("ERROR\r\nOK\r\n");
        let err = Handshake::new(&mut conn, two_mechanisms())
            .authenticate()
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedReply(_)));
        assert_eq!(conn.closes, 1);
        assert!(conn.written().ends_with("CANCEL\r\n"));
    }

    #[test]
    fn cookie_exchange() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("org_freedesktop_general"),
            "7 1700000000 70736b\n",
        )
        .unwrap();

        let lookup = CookieLookup::new(Keyring::new(dir.path())).with_retry(1, Duration::ZERO);
        let queue = AuthenticatorQueue::new().with(
            CookieSha1::new(lookup)
                .with_login("alice")
                .with_client_challenge("0c0c"),
        );

        let challenge = hex_encode("org_freedesktop_general 7 5a5a");
        let script = format!("DATA {challenge}\r\nOK guid\r\n");
        let mut conn = MockConn::new(&script);
        Handshake::new(&mut conn, queue).authenticate().unwrap();

        let written = conn.written();
        let lines: Vec<&str> = written.trim_start_matches('\0').split("\r\n").collect();
        assert_eq!(lines[0], "AUTH DBUS_COOKIE_SHA1 616c696365");

        let data = lines[1].strip_prefix("DATA ").unwrap();
        let decoded = String::from_utf8(hex_decode(data).unwrap()).unwrap();
        let digest = cookie::response_digest("5a5a", "0c0c", "70736b");
        assert_eq!(decoded, format!("0c0c {digest}"));
        assert_eq!(lines[2], "BEGIN");
    }

    #[test]
    fn missing_cookie_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = CookieLookup::new(Keyring::new(dir.path())).with_retry(1, Duration::ZERO);
        let queue = AuthenticatorQueue::new()
            .with(CookieSha1::new(lookup).with_login("alice"))
            .with(Anonymous::default());

        let challenge = hex_encode("ctx 1 abcd");
        let script = format!("DATA {challenge}\r\nREJECTED\r\nOK guid\r\n");
        let mut conn = MockConn::new(&script);
        let recorder = Recorder::default();
        Handshake::new(&mut conn, queue)
            .with_observer(&recorder)
            .authenticate()
            .unwrap();

        assert_eq!(
            conn.written(),
            concat!(
                "\0AUTH DBUS_COOKIE_SHA1 616c696365\r\n",
                "ERROR\r\n",
                "AUTH ANONYMOUS 62757361757468\r\n",
                "BEGIN\r\n",
            )
        );
        assert_eq!(*recorder.retries.borrow(), vec!["ctx 1"]);
        assert_eq!(*recorder.failed.borrow(), vec!["DBUS_COOKIE_SHA1"]);
    }

    #[test]
    fn boxed_connection_authenticates() {
        let mut conn = MockConn::new("OK guid\r\n");
        let boxed: Box<dyn Connection + '_> = Box::new(&mut conn);
        let boxed = Handshake::new(boxed, two_mechanisms())
            .authenticate()
            .unwrap();
        drop(boxed);
        assert_eq!(conn.written(), "\0AUTH EXTERNAL 31303030\r\nBEGIN\r\n");
        assert_eq!(conn.closes, 0);
    }

    #[test]
    fn boxed_connection_is_closed_on_failure() {
        let mut conn = MockConn::new("REJECTED\r\nREJECTED\r\n");
        let boxed: Box<dyn Connection + '_> = Box::new(&mut conn);
        let result = Handshake::new(boxed, two_mechanisms()).authenticate();
        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        drop(result);
        assert_eq!(conn.closes, 1);
    }

    #[test]
    fn queue_order_and_pop() {
        let mut queue = two_mechanisms();
        assert_eq!(queue.names(), vec!["EXTERNAL", "ANONYMOUS"]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().name(), "EXTERNAL");
        assert_eq!(queue.pop().unwrap().name(), "ANONYMOUS");
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
