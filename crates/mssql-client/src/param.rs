//! Named parameters for `sp_executesql` batches and procedure calls.
//!
//! ```rust,ignore
//! use mssql_client::Parameter;
//!
//! let params = [
//!     Parameter::new("id", 42i32.into()),
//!     Parameter::new("@total", mssql_types::SqlValue::Null).with_type(money).output(),
//! ];
//! client
//!     .execute_parameterized("SELECT @total = SUM(amount) FROM orders WHERE customer = @id", &params, &mut collector)
//!     .await?;
//! ```

use std::collections::HashSet;

use mssql_types::{DateTimePolicy, SqlValue, ToSql, TypeError, ValueMeta, data_type, encode_param, infer_type_info};
use once_cell::sync::Lazy;
use regex::Regex;
use tds_protocol::{RpcParam, TypeInfo};

use crate::error::{Error, Result};

static PARAM_NAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^@[\p{L}_#][\p{L}\p{Nd}_@#$]{0,126}$").unwrap()
});

/// One request parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: SqlValue,
    type_info: Option<TypeInfo>,
    output: bool,
}

impl Parameter {
    /// Named parameter; a missing `@` prefix is added.
    pub fn new(name: impl Into<String>, value: SqlValue) -> Self {
        let name = name.into();
        let name = if name.starts_with('@') { name } else { format!("@{name}") };
        Self {
            name,
            value,
            type_info: None,
            output: false,
        }
    }

    /// Unnamed parameter, bound by position. Only procedure calls accept these.
    #[must_use]
    pub fn positional(value: SqlValue) -> Self {
        Self {
            name: String::new(),
            value,
            type_info: None,
            output: false,
        }
    }

    /// Named parameter from anything convertible to a SQL value.
    pub fn from_value<T: ToSql + ?Sized>(name: impl Into<String>, value: &T) -> std::result::Result<Self, TypeError> {
        Ok(Self::new(name, value.to_sql()?).with_type(value.type_info()?))
    }

    /// Declare the wire type instead of inferring it from the value.
    #[must_use]
    pub fn with_type(mut self, type_info: TypeInfo) -> Self {
        self.type_info = Some(type_info);
        self
    }

    /// Mark as an output parameter.
    #[must_use]
    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    /// Name with its `@` prefix, empty when positional.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound value.
    #[must_use]
    pub fn value(&self) -> &SqlValue {
        &self.value
    }

    /// Whether the server should return the final value.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.output
    }

    fn type_info(&self) -> TypeInfo {
        self.type_info.clone().unwrap_or_else(|| infer_type_info(&self.value))
    }

    fn to_rpc(&self, type_info: TypeInfo, policy: DateTimePolicy) -> Result<RpcParam> {
        let meta = ValueMeta::new(&type_info).with_policy(policy);
        let chunks = encode_param(self.value.clone(), &meta)?;
        let param = RpcParam::new(self.name.clone(), type_info, chunks);
        Ok(if self.output { param.as_output() } else { param })
    }
}

/// Encoded parameters with their `sp_executesql` declaration list.
#[derive(Debug)]
pub(crate) struct PreparedParams {
    pub(crate) declarations: String,
    pub(crate) params: Vec<RpcParam>,
}

/// Validate names and encode every value.
///
/// Named and positional parameters may not be mixed, and names must be
/// unique regardless of case. With `require_names` every parameter must be
/// named, as `sp_executesql` binds by name only.
pub(crate) fn prepare(params: &[Parameter], policy: DateTimePolicy, require_names: bool) -> Result<PreparedParams> {
    let named = params.iter().filter(|p| !p.name.is_empty()).count();
    if named != 0 && named != params.len() {
        return Err(Error::Contract("named and positional parameters cannot be mixed".into()));
    }
    if require_names && named != params.len() {
        return Err(Error::Contract("parameterized statements need named parameters".into()));
    }

    let mut seen = HashSet::with_capacity(params.len());
    let mut declarations = Vec::with_capacity(params.len());
    let mut encoded = Vec::with_capacity(params.len());
    for param in params {
        let type_info = param.type_info();
        if !param.name.is_empty() {
            if !PARAM_NAME.is_match(&param.name) {
                return Err(Error::Contract(format!("invalid parameter name {:?}", param.name)));
            }
            if !seen.insert(param.name.to_lowercase()) {
                return Err(Error::Contract(format!("duplicate parameter {}", param.name)));
            }
            let declaration = data_type(type_info.type_id).declaration(&type_info);
            declarations.push(if param.output {
                format!("{} {declaration} output", param.name)
            } else {
                format!("{} {declaration}", param.name)
            });
        }
        encoded.push(param.to_rpc(type_info, policy)?);
    }

    Ok(PreparedParams {
        declarations: declarations.join(", "),
        params: encoded,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::TypeId;

    #[test]
    fn names_get_a_prefix() {
        assert_eq!(Parameter::new("id", SqlValue::Int(1)).name(), "@id");
        assert_eq!(Parameter::new("@id", SqlValue::Int(1)).name(), "@id");
        assert_eq!(Parameter::positional(SqlValue::Int(1)).name(), "");
    }

    #[test]
    fn declarations_follow_inferred_and_declared_types() {
        let params = [
            Parameter::new("id", SqlValue::Int(7)),
            Parameter::new("name", SqlValue::String("x".into()))
                .with_type(TypeInfo::new(TypeId::NVarChar).with_length(100)),
            Parameter::new("total", SqlValue::Null)
                .with_type(TypeInfo::new(TypeId::IntN).with_length(4))
                .output(),
        ];
        let prepared = prepare(&params, DateTimePolicy::default(), true).unwrap();
        assert_eq!(prepared.declarations, "@id int, @name nvarchar(50), @total int output");
        assert_eq!(prepared.params.len(), 3);
        assert!(prepared.params[2].is_output());
        assert!(!prepared.params[0].is_output());
    }

    #[test]
    fn from_value_keeps_the_value() {
        let param = Parameter::from_value("n", &5i64).unwrap();
        assert_eq!(param.value(), &SqlValue::BigInt(5));
    }

    #[test]
    fn rejects_bad_parameter_lists() {
        let policy = DateTimePolicy::default();
        let dup = [Parameter::new("a", SqlValue::Int(1)), Parameter::new("@A", SqlValue::Int(2))];
        assert!(matches!(prepare(&dup, policy, true), Err(Error::Contract(_))));

        let mixed = [Parameter::new("a", SqlValue::Int(1)), Parameter::positional(SqlValue::Int(2))];
        assert!(matches!(prepare(&mixed, policy, false), Err(Error::Contract(_))));

        let positional = [Parameter::positional(SqlValue::Int(2))];
        assert!(prepare(&positional, policy, false).is_ok());
        assert!(matches!(prepare(&positional, policy, true), Err(Error::Contract(_))));

        let bad = [Parameter::new("a b", SqlValue::Int(1))];
        assert!(matches!(prepare(&bad, policy, true), Err(Error::Contract(_))));
    }

    #[test]
    fn value_that_does_not_fit_is_a_type_error() {
        let params = [Parameter::new("s", SqlValue::String("too long".into()))
            .with_type(TypeInfo::new(TypeId::NVarChar).with_length(4))];
        assert!(matches!(
            prepare(&params, DateTimePolicy::default(), true),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn text_parameters_carry_a_plain_length() {
        let text = TypeInfo::new(TypeId::Text);
        let params = [
            Parameter::new("t", SqlValue::String("abc".into())).with_type(text.clone()),
            Parameter::new("n", SqlValue::Null).with_type(text),
        ];
        let prepared = prepare(&params, DateTimePolicy::default(), true).unwrap();
        assert_eq!(prepared.declarations, "@t text, @n text");

        let value: Vec<u8> = prepared.params[0].value.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(value, [3, 0, 0, 0, b'a', b'b', b'c']);
        let null: Vec<u8> = prepared.params[1].value.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(null, [0xFF; 4]);
    }

    proptest::proptest! {
        #[test]
        fn identifier_names_are_declared(name in "[a-zA-Z_][a-zA-Z0-9_]{0,40}") {
            let params = [Parameter::new(name.clone(), SqlValue::Int(1))];
            let prepared = prepare(&params, DateTimePolicy::default(), true).unwrap();
            proptest::prop_assert_eq!(prepared.declarations, format!("@{name} int"));
        }
    }
}
