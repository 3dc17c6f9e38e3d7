//! LOGIN7 message.
//!
//! A 94-byte fixed section (lengths, flags and `(offset, length)` pairs for
//! every variable field) followed by the variable data. String lengths are
//! counted in UTF-16 code units; the SSPI blob in bytes. When feature
//! extensions are present the "unused" slot points at a four-byte offset of
//! the feature block, which closes the message.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_utf16};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed section.
pub const LOGIN7_FIXED_SIZE: usize = 94;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB = 0x20;
        /// Failing to switch to the initial database is fatal.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags2: u8 {
        /// Failing to set the initial language is fatal.
        const LANGUAGE_FATAL = 0x01;
        /// Client is an ODBC driver.
        const ODBC = 0x02;
        /// Windows integrated authentication.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// Client is an OLE DB provider.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// Binary XML.
        const BINARY_XML = 0x02;
        /// User instance.
        const USER_INSTANCE = 0x04;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// Feature extension block present.
        const EXTENSION = 0x10;
    }
}

/// Feature extension ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureId {
    /// Federated authentication.
    FedAuth = 0x02,
    /// UTF-8 collation support.
    Utf8Support = 0x0A,
}

const FEATURE_TERMINATOR: u8 = 0xFF;

/// How the client proves its identity in the FEDAUTH feature extension.
#[derive(Clone, PartialEq, Eq)]
pub enum FedAuth {
    /// A token already obtained by the caller, sent inline.
    SecurityToken(String),
    /// The server sends FEDAUTHINFO and the client answers with a
    /// FEDAUTH_TOKEN message.
    Provider {
        /// Workflow byte (0x01 password, 0x02 integrated, 0x03 default).
        workflow: u8,
    },
}

impl std::fmt::Debug for FedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecurityToken(_) => f.write_str("SecurityToken([REDACTED])"),
            Self::Provider { workflow } => f.debug_struct("Provider").field("workflow", workflow).finish(),
        }
    }
}

const FEDAUTH_LIBRARY_SECURITY_TOKEN: u8 = 0x01;
const FEDAUTH_LIBRARY_PROVIDER: u8 = 0x02;

impl FedAuth {
    fn encode(&self, echo: bool) -> Bytes {
        let mut data = BytesMut::new();
        match self {
            Self::SecurityToken(token) => {
                data.put_u8((FEDAUTH_LIBRARY_SECURITY_TOKEN << 1) | u8::from(echo));
                data.put_u32_le((utf16_len(token) * 2) as u32);
                write_utf16(&mut data, token);
            }
            Self::Provider { workflow } => {
                data.put_u8((FEDAUTH_LIBRARY_PROVIDER << 1) | u8::from(echo));
                data.put_u8(*workflow);
            }
        }
        data.freeze()
    }
}

/// Credentials carried by LOGIN7.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum LoginCredentials {
    /// No credentials (set by a later SSPI or federated exchange).
    #[default]
    None,
    /// SQL Server login.
    SqlServer {
        /// Login name.
        username: String,
        /// Password, obfuscated on the wire.
        password: String,
    },
    /// First SSPI blob.
    Sspi(Bytes),
    /// Federated authentication.
    FedAuth {
        /// Authentication method.
        method: FedAuth,
        /// Echo of the server's FEDAUTHREQUIRED pre-login answer.
        echo: bool,
    },
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Sspi(blob) => write!(f, "Sspi({} bytes)", blob.len()),
            Self::FedAuth { method, echo } => f
                .debug_struct("FedAuth")
                .field("method", method)
                .field("echo", echo)
                .finish(),
        }
    }
}

/// LOGIN7 request.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Requested TDS version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// OptionFlags1.
    pub option_flags1: OptionFlags1,
    /// OptionFlags2.
    pub option_flags2: OptionFlags2,
    /// TypeFlags.
    pub type_flags: TypeFlags,
    /// OptionFlags3.
    pub option_flags3: OptionFlags3,
    /// Client UTC offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client MAC address, usually zero.
    pub client_id: [u8; 6],
    /// Authentication data.
    pub credentials: LoginCredentials,
    /// Request UTF-8 collation support.
    pub utf8_support: bool,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            option_flags1: OptionFlags1::USE_DB | OptionFlags1::DATABASE_FATAL | OptionFlags1::SET_LANG,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: String::from("tds-protocol"),
            language: String::new(),
            database: String::new(),
            client_id: [0; 6],
            credentials: LoginCredentials::None,
            utf8_support: false,
        }
    }
}

impl Login7 {
    /// Login with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: LoginCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Declare read-only application intent.
    #[must_use]
    pub fn with_read_only_intent(mut self, read_only: bool) -> Self {
        self.type_flags.set(TypeFlags::READ_ONLY_INTENT, read_only);
        self
    }

    /// Request UTF-8 collation support.
    #[must_use]
    pub fn with_utf8_support(mut self, enabled: bool) -> Self {
        self.utf8_support = enabled;
        self
    }

    fn features(&self) -> Vec<(FeatureId, Bytes)> {
        let mut features = Vec::new();
        if let LoginCredentials::FedAuth { method, echo } = &self.credentials {
            features.push((FeatureId::FedAuth, method.encode(*echo)));
        }
        if self.utf8_support {
            features.push((FeatureId::Utf8Support, Bytes::new()));
        }
        features
    }

    /// Encode the message payload.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let features = self.features();
        let mut option_flags2 = self.option_flags2;
        let mut option_flags3 = self.option_flags3;
        option_flags2.set(
            OptionFlags2::INTEGRATED_SECURITY,
            matches!(self.credentials, LoginCredentials::Sspi(_)),
        );
        option_flags3.set(OptionFlags3::EXTENSION, !features.is_empty());

        let (username, password) = match &self.credentials {
            LoginCredentials::SqlServer { username, password } => (username.as_str(), password.as_str()),
            _ => ("", ""),
        };
        let sspi: &[u8] = match &self.credentials {
            LoginCredentials::Sspi(blob) => blob,
            _ => &[],
        };

        let mut fields = FieldWriter::new();
        let hostname = fields.text(&self.hostname, "HostName")?;
        let user = fields.text(username, "UserName")?;
        let pass = fields.password(password)?;
        let app = fields.text(&self.app_name, "AppName")?;
        let server = fields.text(&self.server_name, "ServerName")?;
        let extension = if features.is_empty() {
            (fields.offset()?, 0)
        } else {
            fields.placeholder(4)?
        };
        let library = fields.text(&self.library_name, "CltIntName")?;
        let language = fields.text(&self.language, "Language")?;
        let database = fields.text(&self.database, "Database")?;
        let sspi_field = fields.bytes(sspi, "SSPI")?;
        let attach = fields.text("", "AtchDBFile")?;
        let change = fields.text("", "ChangePassword")?;

        if !features.is_empty() {
            let feature_offset = (LOGIN7_FIXED_SIZE + fields.data.len()) as u32;
            let slot = extension.0 as usize - LOGIN7_FIXED_SIZE;
            fields.data[slot..slot + 4].copy_from_slice(&feature_offset.to_le_bytes());
            for (id, data) in &features {
                fields.data.put_u8(*id as u8);
                fields.data.put_u32_le(data.len() as u32);
                fields.data.put_slice(data);
            }
            fields.data.put_u8(FEATURE_TERMINATOR);
        }

        let total = LOGIN7_FIXED_SIZE + fields.data.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(0);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);
        for (offset, length) in [hostname, user, pass, app, server, extension, library, language, database] {
            buf.put_u16_le(offset);
            buf.put_u16_le(length);
        }
        buf.put_slice(&self.client_id);
        for (offset, length) in [sspi_field, attach, change] {
            buf.put_u16_le(offset);
            buf.put_u16_le(length);
        }
        buf.put_u32_le(0);
        debug_assert_eq!(buf.len(), LOGIN7_FIXED_SIZE);
        buf.put_slice(&fields.data);
        Ok(buf.freeze())
    }
}

/// Appends variable fields and hands back their `(offset, length)` pair.
struct FieldWriter {
    data: BytesMut,
}

impl FieldWriter {
    fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(256),
        }
    }

    fn offset(&self) -> Result<u16, ProtocolError> {
        let offset = LOGIN7_FIXED_SIZE + self.data.len();
        u16::try_from(offset).map_err(|_| ProtocolError::FieldTooLong {
            field: "LOGIN7",
            length: offset,
            max: u16::MAX as usize,
        })
    }

    fn text(&mut self, value: &str, field: &'static str) -> Result<(u16, u16), ProtocolError> {
        let offset = self.offset()?;
        let len = utf16_len(value);
        let len = u16::try_from(len)
            .ok()
            .filter(|&n| n <= 128 || field == "ChangePassword" || field == "AtchDBFile")
            .ok_or(ProtocolError::FieldTooLong {
                field,
                length: len,
                max: 128,
            })?;
        write_utf16(&mut self.data, value);
        Ok((offset, len))
    }

    fn password(&mut self, value: &str) -> Result<(u16, u16), ProtocolError> {
        let offset = self.offset()?;
        let start = self.data.len();
        let (_, len) = self.text(value, "Password")?;
        obfuscate_password(&mut self.data[start..]);
        Ok((offset, len))
    }

    fn bytes(&mut self, value: &[u8], field: &'static str) -> Result<(u16, u16), ProtocolError> {
        let offset = self.offset()?;
        let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            length: value.len(),
            max: u16::MAX as usize,
        })?;
        self.data.put_slice(value);
        Ok((offset, len))
    }

    fn placeholder(&mut self, len: usize) -> Result<(u16, u16), ProtocolError> {
        let offset = self.offset()?;
        self.data.put_bytes(0, len);
        Ok((offset, len as u16))
    }
}

/// Obfuscate UTF-16LE password bytes in place: swap nibbles, then XOR 0xA5.
pub fn obfuscate_password(bytes: &mut [u8]) {
    for byte in bytes {
        *byte = byte.rotate_right(4) ^ 0xA5;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(payload: &[u8], index: usize) -> (usize, usize) {
        let at = 36 + index * 4;
        (
            u16::from_le_bytes([payload[at], payload[at + 1]]) as usize,
            u16::from_le_bytes([payload[at + 2], payload[at + 3]]) as usize,
        )
    }

    fn utf16(payload: &[u8], (offset, len): (usize, usize)) -> String {
        crate::codec::decode_utf16_bytes(&payload[offset..offset + 2 * len]).unwrap()
    }

    #[test]
    fn password_obfuscation() {
        let mut bytes = [0x61, 0x00];
        obfuscate_password(&mut bytes);
        assert_eq!(bytes, [0xB3, 0xA5]);
    }

    #[test]
    fn sql_login_layout() {
        let login = Login7::new()
            .with_hostname("ws1")
            .with_app_name("app")
            .with_database("sales")
            .with_credentials(LoginCredentials::SqlServer {
                username: "sa".into(),
                password: "a".into(),
            });
        let payload = login.encode().unwrap();

        let total = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        assert_eq!(total, payload.len());
        assert_eq!(&payload[4..8], &[0x04, 0x00, 0x00, 0x74]);
        assert_eq!(field(&payload, 0).0, LOGIN7_FIXED_SIZE);
        assert_eq!(utf16(&payload, field(&payload, 0)), "ws1");
        assert_eq!(utf16(&payload, field(&payload, 1)), "sa");
        let (pass_offset, pass_len) = field(&payload, 2);
        assert_eq!(pass_len, 1);
        assert_eq!(&payload[pass_offset..pass_offset + 2], &[0xB3, 0xA5]);
        assert_eq!(utf16(&payload, field(&payload, 8)), "sales");
        assert_eq!(payload[25] & OptionFlags2::INTEGRATED_SECURITY.bits(), 0);
        assert_eq!(payload[27] & OptionFlags3::EXTENSION.bits(), 0);
    }

    #[test]
    fn sspi_sets_integrated_security() {
        let login = Login7::new().with_credentials(LoginCredentials::Sspi(Bytes::from_static(b"NTLMSSP\0")));
        let payload = login.encode().unwrap();
        assert_ne!(payload[25] & OptionFlags2::INTEGRATED_SECURITY.bits(), 0);
        let at = 36 + 9 * 4 + 6;
        let offset = u16::from_le_bytes([payload[at], payload[at + 1]]) as usize;
        let len = u16::from_le_bytes([payload[at + 2], payload[at + 3]]) as usize;
        assert_eq!(&payload[offset..offset + len], b"NTLMSSP\0");
    }

    #[test]
    fn fed_auth_token_goes_in_feature_block() {
        let login = Login7::new().with_credentials(LoginCredentials::FedAuth {
            method: FedAuth::SecurityToken("tok".into()),
            echo: true,
        });
        let payload = login.encode().unwrap();
        assert_ne!(payload[27] & OptionFlags3::EXTENSION.bits(), 0);

        let (slot, len) = field(&payload, 5);
        assert_eq!(len, 4);
        let features = u32::from_le_bytes([
            payload[slot],
            payload[slot + 1],
            payload[slot + 2],
            payload[slot + 3],
        ]) as usize;
        assert_eq!(payload[features], FeatureId::FedAuth as u8);
        let data_len = u32::from_le_bytes([
            payload[features + 1],
            payload[features + 2],
            payload[features + 3],
            payload[features + 4],
        ]) as usize;
        assert_eq!(data_len, 1 + 4 + 6);
        assert_eq!(payload[features + 5], (FEDAUTH_LIBRARY_SECURITY_TOKEN << 1) | 1);
        assert_eq!(*payload.last().unwrap(), FEATURE_TERMINATOR);
    }

    #[test]
    fn overlong_field_is_rejected() {
        let login = Login7::new().with_hostname("h".repeat(200));
        assert!(matches!(
            login.encode(),
            Err(ProtocolError::FieldTooLong { field: "HostName", .. })
        ));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = LoginCredentials::SqlServer {
            username: "sa".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
        let token = FedAuth::SecurityToken("secret".into());
        assert!(!format!("{token:?}").contains("secret"));
    }
}
