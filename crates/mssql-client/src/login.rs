//! Connection establishment: socket, PRELOGIN, TLS and LOGIN7.
//!
//! ## Connection Flow
//!
//! ```text
//! TCP connect (port from config or SQL Browser)
//!   -> PRELOGIN exchange (encryption negotiation)
//!   -> TLS handshake wrapped in PRELOGIN packets (unless encryption is off)
//!   -> LOGIN7
//!   -> SSPI legs or FEDAUTHINFO / FEDAUTH_TOKEN, if the method needs them
//!   -> LOGINACK, ENVCHANGE tokens, DONE
//! ```
//!
//! When only the login is encrypted, TLS is dropped right after LOGIN7 is
//! written and the rest of the session runs over the bare socket.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use mssql_auth::{AuthError, Credentials, FedAuthRequest, SspiContext};
use mssql_codec::{Connection, PacketStream};
use mssql_tls::TlsConnector;
use tds_protocol::{
    FedAuth, FedAuthInfo, Login7, LoginCredentials, Message, NegotiatedEncryption, PacketAssembler, PacketStatus,
    PacketType, Parsed, PreLogin, Token, TokenParser, frame,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::browser;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::{ConnectionState, EnvAction, LoginMethod, SessionState, StateMachine};

/// Byte stream a connection runs over: plain TCP or TLS.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

const BROWSER_TIMEOUT: Duration = Duration::from_secs(1);

/// A logged-in connection before the session options are applied.
pub(crate) struct LoggedIn {
    pub(crate) connection: Connection<Box<dyn Transport>>,
    pub(crate) session: SessionState,
}

/// LOGIN7 plus whatever the authentication method needs afterwards.
struct LoginPlan {
    login: Login7,
    method: LoginMethod,
    sspi: Option<Box<dyn SspiContext>>,
}

/// Make one connection attempt, stopping after LOGINACK.
///
/// A routing redirect is reported as [`Error::Routing`] so the caller can
/// reconnect elsewhere.
pub(crate) async fn connect_once(config: &Config, machine: &mut StateMachine) -> Result<LoggedIn> {
    machine.transition(ConnectionState::Connecting)?;

    let port = match &config.instance {
        Some(instance) => {
            let timeout = BROWSER_TIMEOUT.min(config.timeouts.connect_timeout);
            browser::resolve_instance(&config.host, instance, timeout).await?
        }
        None => config.port_or_default(),
    };
    tracing::debug!(host = %config.host, port, "connecting");
    let tcp = TcpStream::connect((config.host.as_str(), port)).await?;
    tcp.set_nodelay(true)?;

    let packet_size = usize::from(config.packet_size);
    let mut stream = PacketStream::new(tcp);
    let prelogin = prelogin_request(config);
    send(&mut stream, PacketType::PreLogin, prelogin.encode(), packet_size).await?;
    machine.transition(ConnectionState::SentPreLogin)?;

    let reply = receive(&mut stream).await?;
    let server = PreLogin::decode(&reply.payload)?;
    tracing::debug!(
        server_version = %server.product_version(),
        encryption = ?server.encryption,
        fed_auth_required = server.fed_auth_required,
        "pre-login response"
    );
    let negotiated = tds_protocol::EncryptionLevel::negotiate(config.encrypt, server.encryption).ok_or_else(|| {
        Error::Encryption(format!(
            "client requested {:?}, server offers {:?}",
            config.encrypt, server.encryption
        ))
    })?;
    tracing::debug!(?negotiated, "encryption negotiated");

    let plan = login_plan(config, port, server.fed_auth_required).await?;
    let login = plan.login.encode()?;
    let tcp = stream.into_inner();

    let transport: Box<dyn Transport> = match negotiated {
        NegotiatedEncryption::None => {
            machine.transition(ConnectionState::SentLogin(plan.method))?;
            let mut stream = PacketStream::new(tcp);
            send(&mut stream, PacketType::Tds7Login, login, packet_size).await?;
            Box::new(stream.into_inner())
        }
        NegotiatedEncryption::Full => {
            machine.transition(ConnectionState::SentTlsNegotiation)?;
            let tls = tls_connector(config)?.connect_with_prelogin(tcp, &config.host).await?;
            machine.transition(ConnectionState::SentLogin(plan.method))?;
            let mut stream = PacketStream::new(tls);
            send(&mut stream, PacketType::Tds7Login, login, packet_size).await?;
            Box::new(stream.into_inner())
        }
        NegotiatedEncryption::LoginOnly => {
            machine.transition(ConnectionState::SentTlsNegotiation)?;
            let tls = tls_connector(config)?.connect_with_prelogin(tcp, &config.host).await?;
            machine.transition(ConnectionState::SentLogin(plan.method))?;
            let mut stream = PacketStream::new(tls);
            send(&mut stream, PacketType::Tds7Login, login, packet_size).await?;
            tracing::debug!("login sent, dropping TLS");
            let (wrapper, _) = stream.into_inner().into_inner();
            Box::new(wrapper.into_inner())
        }
    };

    let mut connection = Connection::new(transport, packet_size);
    let session = login_response(&mut connection, config, plan.sspi).await?;
    Ok(LoggedIn { connection, session })
}

fn prelogin_request(config: &Config) -> PreLogin {
    let major = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let mut prelogin = PreLogin::new(config.encrypt)
        .with_version([major, minor, 0, 0], 0)
        .with_thread_id(std::process::id())
        .with_fed_auth_required(config.credentials.is_federated());
    if let Some(instance) = &config.instance {
        prelogin = prelogin.with_instance(instance.clone());
    }
    prelogin
}

fn tls_connector(config: &Config) -> Result<TlsConnector> {
    let mut tls = config.tls.clone();
    if config.trust_server_certificate {
        tracing::warn!("trusting the server certificate without validation");
        tls = tls.trust_server_certificate(true);
    }
    Ok(TlsConnector::new(tls)?)
}

async fn login_plan(config: &Config, port: u16, fed_auth_required: bool) -> Result<LoginPlan> {
    let (credentials, method, sspi) = match &config.credentials {
        Credentials::SqlServer { username, password } => (
            LoginCredentials::SqlServer {
                username: username.to_string(),
                password: password.to_string(),
            },
            LoginMethod::Standard,
            None,
        ),
        Credentials::AccessToken { token } => (
            LoginCredentials::FedAuth {
                method: FedAuth::SecurityToken(token.to_string()),
                echo: fed_auth_required,
            },
            LoginMethod::FedAuth,
            None,
        ),
        Credentials::FedAuth(provider) => (
            LoginCredentials::FedAuth {
                method: FedAuth::Provider {
                    workflow: provider.workflow(),
                },
                echo: fed_auth_required,
            },
            LoginMethod::FedAuth,
            None,
        ),
        Credentials::Sspi(provider) => {
            let spn = format!("MSSQLSvc/{}:{port}", config.host);
            let mut context = provider.begin(&spn)?;
            let blob = context.step(None).await?;
            tracing::debug!(spn = %spn, length = blob.len(), "starting SSPI exchange");
            (LoginCredentials::Sspi(blob), LoginMethod::Ntlm, Some(context))
        }
        other => {
            return Err(AuthError::UnsupportedMethod(other.method_name().to_owned()).into());
        }
    };

    let hostname = config
        .workstation_id
        .clone()
        .unwrap_or_else(|| std::env::var("COMPUTERNAME").or_else(|_| std::env::var("HOSTNAME")).unwrap_or_default());
    let mut login = Login7::new()
        .with_tds_version(config.tds_version)
        .with_packet_size(u32::from(config.packet_size))
        .with_credentials(credentials)
        .with_hostname(hostname)
        .with_app_name(config.application_name.clone())
        .with_server_name(config.host.clone())
        .with_language(config.session.language.clone())
        .with_read_only_intent(config.read_only_intent);
    if let Some(database) = &config.database {
        login = login.with_database(database.clone());
    }
    Ok(LoginPlan { login, method, sspi })
}

/// What the login response asks the client to send next.
enum NextLeg {
    Sspi(Bytes),
    FedAuth(FedAuthInfo),
}

async fn login_response(
    connection: &mut Connection<Box<dyn Transport>>,
    config: &Config,
    mut sspi: Option<Box<dyn SspiContext>>,
) -> Result<SessionState> {
    let mut session = SessionState::default();

    let mut routing = None;
    let mut acknowledged = false;
    loop {
        let message = connection.read_message().await?.ok_or(Error::ConnectionClosed)?;
        let mut parser = TokenParser::from_message(message.payload);
        let mut first_error = None;
        let mut next = None;

        while let Parsed::Token(token) = parser.next_token(None)? {
            match token {
                Token::LoginAck(ack) => {
                    session.login_ack(ack);
                    acknowledged = true;
                }
                Token::EnvChange(env) => match session.apply(env) {
                    EnvAction::PacketSize(size) => connection.set_packet_size(size)?,
                    EnvAction::Routing { host, port } => routing = Some((host, port)),
                    EnvAction::None => {}
                },
                Token::Error(message) => {
                    tracing::warn!(number = message.number, message = %message.message, "login failed");
                    first_error.get_or_insert(Error::from(message));
                }
                Token::Info(message) => {
                    tracing::debug!(number = message.number, message = %message.message, "login info");
                }
                Token::Sspi(challenge) => next = Some(NextLeg::Sspi(challenge)),
                Token::FedAuthInfo(info) => next = Some(NextLeg::FedAuth(info)),
                Token::FeatureExtAck(features) => {
                    for feature in features {
                        tracing::debug!(feature_id = feature.feature_id, "feature acknowledged");
                    }
                }
                Token::Done(done) => {
                    if done.is_error() && !acknowledged {
                        first_error.get_or_insert(Error::CommandFailed);
                    }
                }
                other => tracing::trace!(token = ?other, "ignoring login token"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        match next {
            Some(NextLeg::Sspi(challenge)) => {
                let context = sspi
                    .as_mut()
                    .ok_or_else(|| AuthError::UnsupportedMethod("server sent an SSPI challenge".into()))?;
                let blob = context.step(Some(&challenge)).await?;
                tracing::debug!(length = blob.len(), "sending SSPI response");
                connection.send_message(PacketType::Sspi, blob, PacketStatus::NORMAL).await?;
            }
            Some(NextLeg::FedAuth(info)) => {
                let Credentials::FedAuth(provider) = &config.credentials else {
                    return Err(AuthError::UnsupportedMethod("server asked for a federated token".into()).into());
                };
                let request = FedAuthRequest {
                    sts_url: info.sts_url,
                    spn: info.spn,
                };
                tracing::debug!(sts_url = %request.sts_url, spn = %request.spn, "acquiring federated token");
                let token = provider.token(&request).await?;
                connection
                    .send_message(PacketType::FedAuthToken, fed_auth_token(&token), PacketStatus::NORMAL)
                    .await?;
            }
            None if acknowledged => break,
            None => return Err(Error::InvalidState("login response ended without LOGINACK".into())),
        }
    }

    if let Some((host, port)) = routing {
        return Err(Error::Routing { host, port });
    }
    tracing::info!(
        host = %config.host,
        database = session.database().unwrap_or_default(),
        packet_size = connection.packet_size(),
        "logged in"
    );
    Ok(session)
}

/// FEDAUTH_TOKEN message body: data length, token length, UTF-16 token.
fn fed_auth_token(token: &str) -> Bytes {
    let encoded: Vec<u8> = token.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut buf = BytesMut::with_capacity(8 + encoded.len());
    buf.put_u32_le((4 + encoded.len()) as u32);
    buf.put_u32_le(encoded.len() as u32);
    buf.put_slice(&encoded);
    buf.freeze()
}

async fn send<S>(stream: &mut PacketStream<S>, packet_type: PacketType, payload: Bytes, packet_size: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for packet in frame(packet_type, payload, packet_size, PacketStatus::NORMAL) {
        stream.feed(packet).await?;
    }
    stream.flush().await?;
    Ok(())
}

async fn receive<S>(stream: &mut PacketStream<S>) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut assembler = PacketAssembler::new();
    loop {
        let packet = stream.next().await.ok_or(Error::ConnectionClosed)??;
        if let Some(message) = assembler.push(packet)? {
            return Ok(message);
        }
    }
}
