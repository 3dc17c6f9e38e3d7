//! Connection state machine and per-session server state.
//!
//! ## State Transitions
//!
//! ```text
//! Initialized -> Connecting -> SentPreLogin -> [SentTlsNegotiation] -> SentLogin(..)
//! SentLogin(..) -> LoggedInSendingInitialSql -> LoggedIn
//! SentLogin(..) -> TransientFailureRetry -> Connecting      (login retry)
//! SentLogin(..) -> Rerouting -> Connecting                  (routing env change)
//! LoggedIn -> SentClientRequest -> [SentAttention] -> LoggedIn
//! LoggedIn -> LoggedInSendingInitialSql -> LoggedIn         (reset)
//! any -> Final
//! ```

use std::fmt;

use tds_protocol::{Collation, EnvChange, LoginAck, TdsVersion};

use crate::error::{Error, Result};

/// How LOGIN7 authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginMethod {
    /// SQL Server login and password.
    Standard,
    /// SSPI/NTLM blob exchange.
    Ntlm,
    /// Federated authentication token.
    FedAuth,
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Not yet connected.
    Initialized,
    /// Resolving the instance and opening the socket.
    Connecting,
    /// PRELOGIN sent, waiting for the answer.
    SentPreLogin,
    /// TLS handshake in progress.
    SentTlsNegotiation,
    /// LOGIN7 sent, waiting for LOGINACK.
    SentLogin(LoginMethod),
    /// Logged in, session options being applied.
    LoggedInSendingInitialSql,
    /// Idle and ready for a request.
    LoggedIn,
    /// A request is outstanding.
    SentClientRequest,
    /// A request was cancelled, waiting for the acknowledgement.
    SentAttention,
    /// Login failed transiently; reconnecting after the retry interval.
    TransientFailureRetry,
    /// The server redirected the login to another host.
    Rerouting,
    /// Closed. Nothing further is possible.
    Final,
}

impl ConnectionState {
    /// Short name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::Connecting => "Connecting",
            Self::SentPreLogin => "SentPreLogin",
            Self::SentTlsNegotiation => "SentTlsNegotiation",
            Self::SentLogin(LoginMethod::Standard) => "SentLogin(Standard)",
            Self::SentLogin(LoginMethod::Ntlm) => "SentLogin(Ntlm)",
            Self::SentLogin(LoginMethod::FedAuth) => "SentLogin(FedAuth)",
            Self::LoggedInSendingInitialSql => "LoggedInSendingInitialSql",
            Self::LoggedIn => "LoggedIn",
            Self::SentClientRequest => "SentClientRequest",
            Self::SentAttention => "SentAttention",
            Self::TransientFailureRetry => "TransientFailureRetry",
            Self::Rerouting => "Rerouting",
            Self::Final => "Final",
        }
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState as S;
        matches!(
            (self, next),
            (_, S::Final)
                | (
                    S::Initialized | S::TransientFailureRetry | S::Rerouting,
                    S::Connecting
                )
                | (S::Connecting, S::SentPreLogin)
                | (S::SentPreLogin, S::SentTlsNegotiation | S::SentLogin(_))
                | (S::SentTlsNegotiation, S::SentLogin(_))
                | (
                    S::SentLogin(_),
                    S::LoggedInSendingInitialSql | S::TransientFailureRetry | S::Rerouting
                )
                | (S::LoggedInSendingInitialSql, S::LoggedIn)
                | (S::LoggedIn, S::SentClientRequest | S::LoggedInSendingInitialSql)
                | (S::SentClientRequest, S::LoggedIn | S::SentAttention)
                | (S::SentAttention, S::LoggedIn)
        ) && !matches!(self, S::Final)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owner of the current [`ConnectionState`]. Every change goes through
/// [`transition`](Self::transition).
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: ConnectionState,
}

impl StateMachine {
    pub(crate) const fn new() -> Self {
        Self {
            state: ConnectionState::Initialized,
        }
    }

    pub(crate) const fn current(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub(crate) fn transition(&mut self, next: ConnectionState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::warn!(from = %from, to = %next, "illegal state transition");
            return Err(Error::InvalidState(format!("cannot move from {from} to {next}")));
        }
        tracing::debug!(from = %from, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Final`. Repeated closes are no-ops.
    pub(crate) fn close(&mut self) {
        if self.state != ConnectionState::Final {
            tracing::debug!(from = %self.state, to = %ConnectionState::Final, "state transition");
            self.state = ConnectionState::Final;
        }
    }
}

/// What the connection must do in response to an environment change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EnvAction {
    None,
    PacketSize(usize),
    Routing { host: String, port: u16 },
}

/// Server-side session values tracked from LOGINACK and ENVCHANGE tokens.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    database: Option<String>,
    language: Option<String>,
    charset: Option<String>,
    collation: Option<Collation>,
    packet_size: Option<usize>,
    transaction_descriptor: u64,
    tds_version: Option<TdsVersion>,
    server_name: Option<String>,
    server_version: Option<[u8; 4]>,
}

impl SessionState {
    /// Current database.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Current session language.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Current character set.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Session default collation.
    #[must_use]
    pub fn collation(&self) -> Option<Collation> {
        self.collation
    }

    /// Packet size announced by the server.
    #[must_use]
    pub fn packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    /// Descriptor of the open transaction, 0 when none.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction_descriptor
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_descriptor != 0
    }

    /// TDS version acknowledged at login.
    #[must_use]
    pub fn tds_version(&self) -> Option<TdsVersion> {
        self.tds_version
    }

    /// Server program name from LOGINACK.
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Server program version as `major.minor.build`.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.server_version
            .map(|[major, minor, hi, lo]| format!("{major}.{minor}.{}", u16::from_be_bytes([hi, lo])))
    }

    pub(crate) fn login_ack(&mut self, ack: LoginAck) {
        tracing::info!(
            tds_version = format_args!("{:#010x}", ack.tds_version.raw()),
            prog_name = %ack.prog_name,
            "login acknowledged"
        );
        self.tds_version = Some(ack.tds_version);
        self.server_name = Some(ack.prog_name);
        self.server_version = Some(ack.prog_version);
    }

    /// Record `env` and report anything the connection has to act on.
    pub(crate) fn apply(&mut self, env: EnvChange) -> EnvAction {
        match env {
            EnvChange::Database { new, .. } => {
                tracing::debug!(database = %new, "database changed");
                self.database = Some(new);
            }
            EnvChange::Language { new, .. } => {
                tracing::debug!(language = %new, "language changed");
                self.language = Some(new);
            }
            EnvChange::CharacterSet { new, .. } => {
                tracing::debug!(charset = %new, "character set changed");
                self.charset = Some(new);
            }
            EnvChange::PacketSize { new, old } => {
                tracing::debug!(new, old, "packet size changed");
                let size = new as usize;
                self.packet_size = Some(size);
                return EnvAction::PacketSize(size);
            }
            EnvChange::Collation(collation) => {
                tracing::debug!(?collation, "collation changed");
                self.collation = collation;
            }
            EnvChange::BeginTransaction(descriptor) => {
                tracing::debug!(descriptor, "transaction started");
                self.transaction_descriptor = descriptor;
            }
            EnvChange::CommitTransaction | EnvChange::RollbackTransaction | EnvChange::TransactionEnded => {
                tracing::debug!(?env, "transaction finished");
                self.transaction_descriptor = 0;
            }
            EnvChange::ResetConnectionAck => {
                tracing::debug!("connection reset acknowledged");
                self.transaction_descriptor = 0;
            }
            EnvChange::Routing { host, port } => {
                tracing::info!(host = %host, port, "routing redirect received");
                return EnvAction::Routing { host, port };
            }
            EnvChange::Other { kind, .. } => {
                tracing::trace!(kind, "ignoring environment change");
            }
        }
        EnvAction::None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ConnectionState as S;

    #[test]
    fn happy_path_transitions() {
        let mut machine = StateMachine::new();
        for next in [
            S::Connecting,
            S::SentPreLogin,
            S::SentTlsNegotiation,
            S::SentLogin(LoginMethod::Standard),
            S::LoggedInSendingInitialSql,
            S::LoggedIn,
            S::SentClientRequest,
            S::SentAttention,
            S::LoggedIn,
            S::LoggedInSendingInitialSql,
            S::LoggedIn,
        ] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.current(), S::LoggedIn);
    }

    #[test]
    fn retry_and_reroute_reconnect() {
        let mut machine = StateMachine::new();
        machine.transition(S::Connecting).unwrap();
        machine.transition(S::SentPreLogin).unwrap();
        machine.transition(S::SentLogin(LoginMethod::FedAuth)).unwrap();
        machine.transition(S::TransientFailureRetry).unwrap();
        machine.transition(S::Connecting).unwrap();
        machine.transition(S::SentPreLogin).unwrap();
        machine.transition(S::SentLogin(LoginMethod::Ntlm)).unwrap();
        machine.transition(S::Rerouting).unwrap();
        machine.transition(S::Connecting).unwrap();
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut machine = StateMachine::new();
        assert!(matches!(machine.transition(S::LoggedIn), Err(Error::InvalidState(_))));
        assert_eq!(machine.current(), S::Initialized);

        machine.close();
        assert!(machine.transition(S::Connecting).is_err());
        assert!(!S::Final.can_transition_to(S::Final));
        machine.close();
        assert_eq!(machine.current(), S::Final);
    }

    #[test]
    fn requests_only_from_logged_in() {
        assert!(S::LoggedIn.can_transition_to(S::SentClientRequest));
        assert!(!S::SentClientRequest.can_transition_to(S::SentClientRequest));
        assert!(!S::SentAttention.can_transition_to(S::SentClientRequest));
    }

    #[test]
    fn env_changes_update_session() {
        let mut session = SessionState::default();
        assert_eq!(
            session.apply(EnvChange::Database {
                new: "app".into(),
                old: "master".into()
            }),
            EnvAction::None
        );
        assert_eq!(session.database(), Some("app"));

        assert_eq!(
            session.apply(EnvChange::PacketSize { new: 8000, old: 4096 }),
            EnvAction::PacketSize(8000)
        );

        session.apply(EnvChange::BeginTransaction(0x1122));
        assert!(session.in_transaction());
        session.apply(EnvChange::ResetConnectionAck);
        assert_eq!(session.transaction_descriptor(), 0);

        assert_eq!(
            session.apply(EnvChange::Routing {
                host: "node".into(),
                port: 1500
            }),
            EnvAction::Routing {
                host: "node".into(),
                port: 1500
            }
        );
    }

    #[test]
    fn transaction_descriptor_follows_env_changes() {
        let mut session = SessionState::default();
        for end in [
            EnvChange::CommitTransaction,
            EnvChange::RollbackTransaction,
            EnvChange::TransactionEnded,
        ] {
            session.apply(EnvChange::BeginTransaction(0x0102_0304));
            assert_eq!(session.transaction_descriptor(), 0x0102_0304);
            assert_eq!(session.apply(end), EnvAction::None);
            assert!(!session.in_transaction());
        }
    }

    #[test]
    fn server_version_formatting() {
        let mut session = SessionState::default();
        session.login_ack(LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4,
            prog_name: "Microsoft SQL Server".into(),
            prog_version: [16, 0, 0x10, 0x00],
        });
        assert_eq!(session.server_version().as_deref(), Some("16.0.4096"));
        assert_eq!(session.tds_version(), Some(TdsVersion::V7_4));
    }
}
