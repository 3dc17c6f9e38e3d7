//! RPC requests (packet type 0x03).
//!
//! ```text
//! ALL_HEADERS
//! ProcName (US_VARCHAR) | 0xFFFF ProcId (u16)
//! OptionFlags (u16)
//! { ParamName (B_VARCHAR) StatusFlags (u8) TYPE_INFO value }*
//! ```
//!
//! Parameter values arrive already encoded (length prefix followed by data
//! chunks) so this crate does not need to know how each SQL type lays out
//! its bytes.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_len, write_b_varchar, write_us_varchar, write_utf16};
use crate::error::ProtocolError;
use crate::sql_batch::write_all_headers;
use crate::types::{MAX_LENGTH_PLP, TypeId, TypeInfo};

/// Well-known procedures the server accepts by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ProcId {
    /// sp_cursor
    Cursor = 0x0001,
    /// sp_cursoropen
    CursorOpen = 0x0002,
    /// sp_cursorprepare
    CursorPrepare = 0x0003,
    /// sp_cursorexecute
    CursorExecute = 0x0004,
    /// sp_cursorprepexec
    CursorPrepExec = 0x0005,
    /// sp_cursorunprepare
    CursorUnprepare = 0x0006,
    /// sp_cursorfetch
    CursorFetch = 0x0007,
    /// sp_cursoroption
    CursorOption = 0x0008,
    /// sp_cursorclose
    CursorClose = 0x0009,
    /// sp_executesql
    ExecuteSql = 0x000A,
    /// sp_prepare
    Prepare = 0x000B,
    /// sp_execute
    Execute = 0x000C,
    /// sp_prepexec
    PrepExec = 0x000D,
    /// sp_prepexecrpc
    PrepExecRpc = 0x000E,
    /// sp_unprepare
    Unprepare = 0x000F,
}

bitflags! {
    /// RPC option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RpcOptionFlags: u16 {
        /// Recompile the procedure.
        const WITH_RECOMPILE = 0x0001;
        /// Server omits COLMETADATA.
        const NO_METADATA = 0x0002;
        /// Reuse cached metadata.
        const REUSE_METADATA = 0x0004;
    }
}

bitflags! {
    /// Parameter status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamStatus: u8 {
        /// Output parameter.
        const BY_REF = 0x01;
        /// Use the parameter's default value.
        const DEFAULT_VALUE = 0x02;
        /// Always Encrypted parameter.
        const ENCRYPTED = 0x08;
    }
}

/// Target procedure of an RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcName {
    /// Procedure sent by name.
    Name(String),
    /// Well-known procedure sent by id.
    Id(ProcId),
}

/// One RPC parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcParam {
    /// Name including the leading `@`, or empty for positional parameters.
    pub name: String,
    /// Status flags.
    pub status: ParamStatus,
    /// Declared type.
    pub type_info: TypeInfo,
    /// Encoded value: length prefix then data chunks.
    pub value: Vec<Bytes>,
}

impl RpcParam {
    /// Parameter with a pre-encoded value.
    #[must_use]
    pub fn new(name: impl Into<String>, type_info: TypeInfo, value: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            status: ParamStatus::empty(),
            type_info,
            value,
        }
    }

    /// `nvarchar` parameter, switching to `nvarchar(max)` past 4000 code units.
    #[must_use]
    pub fn nvarchar(name: impl Into<String>, value: &str) -> Self {
        let byte_len = utf16_len(value) * 2;
        let mut data = BytesMut::with_capacity(byte_len + 16);
        let type_info = if byte_len <= 8000 {
            data.put_u16_le(byte_len as u16);
            write_utf16(&mut data, value);
            TypeInfo::new(TypeId::NVarChar).with_length(8000)
        } else {
            data.put_u64_le(byte_len as u64);
            data.put_u32_le(byte_len as u32);
            write_utf16(&mut data, value);
            data.put_u32_le(0);
            TypeInfo::new(TypeId::NVarChar).with_length(MAX_LENGTH_PLP)
        };
        Self::new(name, type_info, vec![data.freeze()])
    }

    /// `int` parameter; `None` sends NULL.
    #[must_use]
    pub fn int(name: impl Into<String>, value: Option<i32>) -> Self {
        let mut data = BytesMut::with_capacity(5);
        match value {
            Some(v) => {
                data.put_u8(4);
                data.put_i32_le(v);
            }
            None => data.put_u8(0),
        }
        Self::new(name, TypeInfo::new(TypeId::IntN).with_length(4), vec![data.freeze()])
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn as_output(mut self) -> Self {
        self.status |= ParamStatus::BY_REF;
        self
    }

    /// Whether this is an output parameter.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.status.contains(ParamStatus::BY_REF)
    }

    /// Write name, status, `TYPE_INFO` and value.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        write_b_varchar(dst, &self.name)?;
        dst.put_u8(self.status.bits());
        self.type_info.encode(dst)?;
        for chunk in &self.value {
            dst.put_slice(chunk);
        }
        Ok(())
    }
}

/// RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    proc_name: ProcName,
    options: RpcOptionFlags,
    params: Vec<RpcParam>,
    transaction_descriptor: u64,
}

impl RpcRequest {
    /// Call a procedure by name.
    #[must_use]
    pub fn named(proc_name: impl Into<String>) -> Self {
        Self::new(ProcName::Name(proc_name.into()))
    }

    /// Call a well-known procedure.
    #[must_use]
    pub fn by_id(proc_id: ProcId) -> Self {
        Self::new(ProcName::Id(proc_id))
    }

    fn new(proc_name: ProcName) -> Self {
        Self {
            proc_name,
            options: RpcOptionFlags::empty(),
            params: Vec::new(),
            transaction_descriptor: 0,
        }
    }

    /// `sp_executesql` with the statement, its parameter declarations and
    /// the parameters themselves.
    ///
    /// `declarations` is the `@p1 int, @p2 nvarchar(10)` list; it is omitted
    /// when empty.
    #[must_use]
    pub fn execute_sql(sql: &str, declarations: &str, params: Vec<RpcParam>) -> Self {
        let mut request = Self::by_id(ProcId::ExecuteSql);
        request.params.push(RpcParam::nvarchar("", sql));
        if !declarations.is_empty() {
            request.params.push(RpcParam::nvarchar("", declarations));
        }
        request.params.extend(params);
        request
    }

    /// `sp_prepare`. The statement handle comes back through the first
    /// parameter, an `int` output.
    #[must_use]
    pub fn prepare(sql: &str, declarations: &str) -> Self {
        let mut request = Self::by_id(ProcId::Prepare);
        request.params.push(RpcParam::int("", None).as_output());
        request.params.push(RpcParam::nvarchar("", declarations));
        request.params.push(RpcParam::nvarchar("", sql));
        // RETURN_METADATA
        request.params.push(RpcParam::int("", Some(1)));
        request
    }

    /// `sp_execute` of a prepared `handle` with its parameter values.
    #[must_use]
    pub fn execute(handle: i32, params: Vec<RpcParam>) -> Self {
        let mut request = Self::by_id(ProcId::Execute);
        request.params.push(RpcParam::int("", Some(handle)));
        request.params.extend(params);
        request
    }

    /// `sp_unprepare`, releasing a prepared `handle`.
    #[must_use]
    pub fn unprepare(handle: i32) -> Self {
        Self::by_id(ProcId::Unprepare).param(RpcParam::int("", Some(handle)))
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Set option flags.
    #[must_use]
    pub fn with_options(mut self, options: RpcOptionFlags) -> Self {
        self.options = options;
        self
    }

    /// Run inside the transaction identified by `descriptor`.
    #[must_use]
    pub fn with_transaction(mut self, descriptor: u64) -> Self {
        self.transaction_descriptor = descriptor;
        self
    }

    /// Target procedure.
    #[must_use]
    pub fn proc_name(&self) -> &ProcName {
        &self.proc_name
    }

    /// Parameters in call order.
    #[must_use]
    pub fn params(&self) -> &[RpcParam] {
        &self.params
    }

    /// Encode the message payload.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(256);
        write_all_headers(&mut buf, self.transaction_descriptor);
        match &self.proc_name {
            ProcName::Name(name) => write_us_varchar(&mut buf, name)?,
            ProcName::Id(id) => {
                buf.put_u16_le(0xFFFF);
                buf.put_u16_le(*id as u16);
            }
        }
        buf.put_u16_le(self.options.bits());
        for param in &self.params {
            param.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}
