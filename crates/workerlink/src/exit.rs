use std::fmt;
use std::io;

use workerlink_comm::{CallError, CommError};
use workerlink_port::PortError;
use workerlink_wire::WireError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::InvalidMagic => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn port_error(context: &str, err: PortError) -> CliError {
    match err {
        PortError::Wire(err) => wire_error(context, err),
        PortError::Io(source) => io_error(context, source),
        PortError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn comm_error(context: &str, err: CommError) -> CliError {
    match err {
        CommError::Port(err) => port_error(context, err),
        CommError::Wire(err) => wire_error(context, err),
        CommError::InvalidEventName => CliError::new(USAGE, format!("{context}: {err}")),
        CommError::UnknownCall(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn call_error(context: &str, err: CallError) -> CliError {
    match err {
        CallError::Port(err) => port_error(context, err),
        CallError::Disconnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        CallError::Remote(_) | CallError::Terminated => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_layered_errors_to_exit_codes() {
        let closed = call_error("call failed", CallError::Port(PortError::Closed));
        assert_eq!(closed.code, TRANSPORT_ERROR);
        assert_eq!(closed.message, "call failed: port closed");

        let oversized = port_error(
            "send failed",
            PortError::Wire(WireError::PayloadTooLarge { size: 10, max: 1 }),
        );
        assert_eq!(oversized.code, DATA_INVALID);

        let missing = io_error(
            "spawn failed",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(missing.code, USAGE);

        assert_eq!(
            comm_error("emit failed", CommError::InvalidEventName).code,
            USAGE
        );
        assert_eq!(
            call_error("call failed", CallError::Disconnected).code,
            TRANSPORT_ERROR
        );
    }
}
