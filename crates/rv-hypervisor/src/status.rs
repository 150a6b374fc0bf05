//! Wire-level status codes and the message envelope every reply is built
//! from, plus `From` conversions so command handlers can `?`-propagate a
//! collaborator crate's error straight into a wire reply.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypervisorStatus {
    InfoOk,
    InfoMsg,
    ErrUnkModule,
    ErrUnkCmd,
    ErrBadParam,
    ErrParsing,
    ErrUnkObj,
    ErrBadObj,
    ErrFile,
    ErrStart,
    ErrInvParam,
}

impl HypervisorStatus {
    pub fn code(self) -> u16 {
        match self {
            HypervisorStatus::InfoOk => 100,
            HypervisorStatus::InfoMsg => 101,
            HypervisorStatus::ErrUnkModule => 200,
            HypervisorStatus::ErrUnkCmd => 201,
            HypervisorStatus::ErrBadParam => 202,
            HypervisorStatus::ErrParsing => 203,
            HypervisorStatus::ErrUnkObj => 204,
            HypervisorStatus::ErrBadObj => 205,
            HypervisorStatus::ErrFile => 206,
            HypervisorStatus::ErrStart => 207,
            HypervisorStatus::ErrInvParam => 208,
        }
    }

    pub fn is_error(self) -> bool {
        self.code() >= 200
    }
}

/// A fully-formed error carrying both the wire status and a human-readable
/// message, the type every command handler's `Result` is errored with.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status:?}: {message}")]
pub struct HypervisorError {
    pub status: HypervisorStatus,
    pub message: String,
}

impl HypervisorError {
    pub fn new(status: HypervisorStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unk_module(name: &str) -> Self {
        Self::new(HypervisorStatus::ErrUnkModule, format!("unknown module {name:?}"))
    }

    pub fn unk_cmd(module: &str, cmd: &str) -> Self {
        Self::new(
            HypervisorStatus::ErrUnkCmd,
            format!("unknown command {cmd:?} in module {module:?}"),
        )
    }

    pub fn bad_param(msg: impl Into<String>) -> Self {
        Self::new(HypervisorStatus::ErrBadParam, msg.into())
    }

    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::new(HypervisorStatus::ErrParsing, msg.into())
    }

    pub fn unk_obj(name: &str) -> Self {
        Self::new(HypervisorStatus::ErrUnkObj, format!("unknown object {name:?}"))
    }
}

impl fmt::Display for HypervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<rv_registry::RegistryError> for HypervisorError {
    fn from(e: rv_registry::RegistryError) -> Self {
        use rv_registry::RegistryError::*;
        let status = match e {
            NotFound { .. } => HypervisorStatus::ErrUnkObj,
            DuplicateName { .. } => HypervisorStatus::ErrBadObj,
            StillReferenced { .. } => HypervisorStatus::ErrBadObj,
            UnrefAtZero { .. } => HypervisorStatus::ErrBadObj,
            WrongConcreteType { .. } => HypervisorStatus::ErrBadObj,
        };
        HypervisorError::new(status, e.to_string())
    }
}

impl From<rv_nio::NioError> for HypervisorError {
    fn from(e: rv_nio::NioError) -> Self {
        HypervisorError::new(HypervisorStatus::ErrBadParam, e.to_string())
    }
}

impl From<rv_vm::VmError> for HypervisorError {
    fn from(e: rv_vm::VmError) -> Self {
        let status = match &e {
            rv_vm::VmError::WrongState(_, _) => HypervisorStatus::ErrInvParam,
            rv_vm::VmError::Memory(_) => HypervisorStatus::ErrBadParam,
            rv_vm::VmError::Slot(_) => HypervisorStatus::ErrBadObj,
        };
        HypervisorError::new(status, e.to_string())
    }
}

impl From<rv_switch::FrSwitchError> for HypervisorError {
    fn from(e: rv_switch::FrSwitchError) -> Self {
        HypervisorError::new(HypervisorStatus::ErrBadObj, e.to_string())
    }
}

impl From<rv_switch::EthSwitchError> for HypervisorError {
    fn from(e: rv_switch::EthSwitchError) -> Self {
        HypervisorError::new(HypervisorStatus::ErrBadObj, e.to_string())
    }
}

impl From<std::io::Error> for HypervisorError {
    fn from(e: std::io::Error) -> Self {
        HypervisorError::new(HypervisorStatus::ErrFile, e.to_string())
    }
}
