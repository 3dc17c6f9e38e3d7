//! PRELOGIN negotiation message.
//!
//! The payload starts with a table of `(option, offset, length)` entries
//! (offsets and lengths big-endian, relative to the start of the payload)
//! closed by `0xFF`, followed by the option data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::ensure;
use crate::error::ProtocolError;

/// PRELOGIN option ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Client driver or server product version.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name to validate.
    Instance = 0x02,
    /// Client thread id.
    ThreadId = 0x03,
    /// Multiple active result sets.
    Mars = 0x04,
    /// Connection and activity ids for tracing.
    TraceId = 0x05,
    /// Federated authentication requested or required.
    FedAuthRequired = 0x06,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Decode an option id, returning `None` for options this client
    /// does not understand.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Version),
            0x01 => Some(Self::Encryption),
            0x02 => Some(Self::Instance),
            0x03 => Some(Self::ThreadId),
            0x04 => Some(Self::Mars),
            0x05 => Some(Self::TraceId),
            0x06 => Some(Self::FedAuthRequired),
            0xFF => Some(Self::Terminator),
            _ => None,
        }
    }
}

/// ENCRYPTION option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only.
    Off = 0x00,
    /// Encryption available and wanted.
    #[default]
    On = 0x01,
    /// No encryption support.
    NotSupported = 0x02,
    /// Encryption mandatory.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Decode the option byte. Unknown values are treated as `Required`
    /// so an unexpected server answer never silently disables TLS.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Off,
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            _ => Self::Required,
        }
    }

    /// Resolve the client's request against the server's answer.
    ///
    /// Returns `None` when one side requires encryption the other cannot
    /// provide.
    #[must_use]
    pub const fn negotiate(client: Self, server: Self) -> Option<NegotiatedEncryption> {
        match (client, server) {
            (Self::NotSupported, Self::NotSupported | Self::Off) => Some(NegotiatedEncryption::None),
            (Self::NotSupported, _) => None,
            (_, Self::NotSupported) => match client {
                Self::Off => Some(NegotiatedEncryption::None),
                _ => None,
            },
            (Self::Off, Self::Off) => Some(NegotiatedEncryption::LoginOnly),
            _ => Some(NegotiatedEncryption::Full),
        }
    }
}

/// Outcome of encryption negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedEncryption {
    /// Plain TCP throughout.
    None,
    /// TLS protects LOGIN7 only, then the connection drops back to TCP.
    LoginOnly,
    /// TLS for the whole session.
    Full,
}

/// A PRELOGIN request or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreLogin {
    /// Version bytes: client driver version in requests, server product
    /// version (major, minor, build high, build low) in responses.
    pub version: [u8; 4],
    /// Sub-build number.
    pub sub_build: u16,
    /// Encryption option.
    pub encryption: EncryptionLevel,
    /// Instance name; the server answers zero for a match.
    pub instance: Option<String>,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested or granted.
    pub mars: bool,
    /// Connection id, activity id and sequence (36 bytes).
    pub trace_id: Option<[u8; 36]>,
    /// Federated authentication requested.
    pub fed_auth_required: bool,
}

impl PreLogin {
    /// A client request with the given encryption level.
    #[must_use]
    pub fn new(encryption: EncryptionLevel) -> Self {
        Self {
            encryption,
            ..Self::default()
        }
    }

    /// Set the client version bytes.
    #[must_use]
    pub const fn with_version(mut self, version: [u8; 4], sub_build: u16) -> Self {
        self.version = version;
        self.sub_build = sub_build;
        self
    }

    /// Set the thread id.
    #[must_use]
    pub const fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the trace id.
    #[must_use]
    pub const fn with_trace_id(mut self, trace_id: [u8; 36]) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Request federated authentication.
    #[must_use]
    pub const fn with_fed_auth_required(mut self, required: bool) -> Self {
        self.fed_auth_required = required;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Encode the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = Vec::with_capacity(7);

        let mut version = self.version.to_vec();
        version.extend_from_slice(&self.sub_build.to_le_bytes());
        options.push((PreLoginOption::Version, version));
        options.push((PreLoginOption::Encryption, vec![self.encryption as u8]));

        let mut instance = self.instance.as_deref().unwrap_or_default().as_bytes().to_vec();
        instance.push(0);
        options.push((PreLoginOption::Instance, instance));

        if let Some(thread_id) = self.thread_id {
            options.push((PreLoginOption::ThreadId, thread_id.to_be_bytes().to_vec()));
        }
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));
        if let Some(trace_id) = self.trace_id {
            options.push((PreLoginOption::TraceId, trace_id.to_vec()));
        }
        if self.fed_auth_required {
            options.push((PreLoginOption::FedAuthRequired, vec![0x01]));
        }

        let table_len = options.len() * 5 + 1;
        let data_len: usize = options.iter().map(|(_, data)| data.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + data_len);

        let mut offset = table_len;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }
        buf.freeze()
    }

    /// Decode a payload. Unknown options are skipped.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut table = payload;
        let mut entries = Vec::new();
        loop {
            ensure(&table, 1)?;
            let id = table.get_u8();
            if id == PreLoginOption::Terminator as u8 {
                break;
            }
            ensure(&table, 4)?;
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            entries.push((id, offset, length));
        }

        let mut prelogin = Self::default();
        for (id, offset, length) in entries {
            let data = payload
                .get(offset..offset + length)
                .ok_or(ProtocolError::InvalidPreloginOption(id))?;
            let Some(option) = PreLoginOption::from_u8(id) else {
                tracing::trace!(option = id, "skipping unknown pre-login option");
                continue;
            };
            match option {
                PreLoginOption::Version if data.len() >= 4 => {
                    prelogin.version.copy_from_slice(&data[..4]);
                    if data.len() >= 6 {
                        prelogin.sub_build = u16::from_le_bytes([data[4], data[5]]);
                    }
                }
                PreLoginOption::Encryption if !data.is_empty() => {
                    prelogin.encryption = EncryptionLevel::from_u8(data[0]);
                }
                PreLoginOption::Instance => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    prelogin.instance = Some(String::from_utf8_lossy(&data[..end]).into_owned());
                }
                PreLoginOption::ThreadId if data.len() >= 4 => {
                    prelogin.thread_id = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                }
                PreLoginOption::Mars if !data.is_empty() => prelogin.mars = data[0] != 0,
                PreLoginOption::TraceId if data.len() >= 36 => {
                    let mut trace_id = [0u8; 36];
                    trace_id.copy_from_slice(&data[..36]);
                    prelogin.trace_id = Some(trace_id);
                }
                PreLoginOption::FedAuthRequired if !data.is_empty() => {
                    prelogin.fed_auth_required = data[0] != 0;
                }
                _ => {}
            }
        }
        Ok(prelogin)
    }

    /// Server product version as `major.minor.build`.
    #[must_use]
    pub fn product_version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version[0],
            self.version[1],
            u16::from_be_bytes([self.version[2], self.version[3]])
        )
    }
}
