//! # RPC envelope and method definitions
//!
//! The console and the exec exchange single-frame JSON strings over a
//! REQ/REP socket pair. A request names a method and carries a parameter
//! object; the reply is either a result value or a fault with a numeric
//! code identifying the class of failure.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::arm::UserRole;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Fault codes, one per class of failure.
pub const FAULT_PARSE: i32 = 1;
pub const FAULT_UNKNOWN_METHOD: i32 = 2;
pub const FAULT_AUTH: i32 = 3;
pub const FAULT_FORBIDDEN: i32 = 4;
pub const FAULT_BAD_PARAMS: i32 = 5;
pub const FAULT_STATE: i32 = 6;
pub const FAULT_VALIDATION: i32 = 7;
pub const FAULT_LINK: i32 = 8;
pub const FAULT_DEVICE: i32 = 9;
pub const FAULT_TASK: i32 = 10;
pub const FAULT_INTERNAL: i32 = 11;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single request from a console to the exec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Sequence number chosen by the client, echoed in the response
    pub id: u64,

    /// Name of the method to invoke, e.g. `robot.move`
    pub method: String,

    /// Session token, required by every method except `user.login` and
    /// `help`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Method parameters, an object specific to each method
    #[serde(default)]
    pub params: Value,
}

// Method parameter and result shapes. Kept here so both ends of the wire
// agree on the field names.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginParams {
    pub username: String,
    pub password: String,

    /// Name the client reports for itself, shown in the session list
    #[serde(default)]
    pub client: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub token: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Serial device override, the exec's parameter file supplies the
    /// default
    #[serde(default)]
    pub device: Option<String>,

    /// Baud rate override
    #[serde(default)]
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveParams {
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Feed rate in mm/min, the default feed rate when absent
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchParams {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeParams {
    pub absolute: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserParams {
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFilterParams {
    /// `user` or `outcome` for order reports, `user` or `level` for the
    /// log report
    #[serde(default)]
    pub filter_key: Option<String>,

    #[serde(default)]
    pub filter_value: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A response from the exec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    /// The method ran, `result` is its return value
    Result { id: u64, result: Value },

    /// The method did not run or failed
    Fault { id: u64, code: i32, string: String },
}

/// Errors raised when encoding or decoding RPC messages.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Could not serialise the message: {0}")]
    SerialiseError(serde_json::Error),

    #[error("Could not parse the message: {0}")]
    ParseError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RpcRequest {
    pub fn new(id: u64, method: &str, token: Option<String>, params: Value) -> Self {
        Self {
            id,
            method: method.to_string(),
            token,
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, RpcError> {
        serde_json::to_string(self).map_err(RpcError::SerialiseError)
    }

    pub fn from_json(json: &str) -> Result<Self, RpcError> {
        serde_json::from_str(json).map_err(RpcError::ParseError)
    }
}

impl RpcResponse {
    /// Build a successful response.
    pub fn result(id: u64, result: Value) -> Self {
        RpcResponse::Result { id, result }
    }

    /// Build a fault response.
    pub fn fault(id: u64, code: i32, string: &str) -> Self {
        RpcResponse::Fault {
            id,
            code,
            string: string.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, RpcError> {
        serde_json::to_string(self).map_err(RpcError::SerialiseError)
    }

    pub fn from_json(json: &str) -> Result<Self, RpcError> {
        serde_json::from_str(json).map_err(RpcError::ParseError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_from_wire() {
        let json = r#"{
            "id": 7,
            "method": "robot.move",
            "token": "00112233445566778899aabbccddeeff",
            "params": {"x": 10.0, "y": 20.0, "z": 30.0}
        }"#;

        let request = RpcRequest::from_json(json).unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.method, "robot.move");
        assert!(request.token.is_some());

        let params: MoveParams = serde_json::from_value(request.params).unwrap();
        assert_eq!(params.x, 10.0);
        assert_eq!(params.speed, None);
    }

    #[test]
    fn test_request_without_token() {
        let json = r#"{"id": 1, "method": "help"}"#;

        let request = RpcRequest::from_json(json).unwrap();
        assert_eq!(request.token, None);
        assert!(request.params.is_null());
    }

    #[test]
    fn test_fault_shape() {
        let response = RpcResponse::fault(3, FAULT_UNKNOWN_METHOD, "no such method");
        let json = response.to_json().unwrap();
        assert!(json.contains("\"fault\""));

        match RpcResponse::from_json(&json).unwrap() {
            RpcResponse::Fault { id, code, string } => {
                assert_eq!(id, 3);
                assert_eq!(code, FAULT_UNKNOWN_METHOD);
                assert_eq!(string, "no such method");
            }
            other => panic!("expected a fault, got {:?}", other),
        }
    }
}
