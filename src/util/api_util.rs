use derive_more::derive::Display;
use log::error;
use serde::ser::SerializeStruct;
use serde::Serialize;

use crate::Ext;

/// Cheap structural sanity for incoming request payloads, checked before
/// any store access or mutation.
pub trait APIRequest: Sized {
    fn ok(&self) -> bool;
    fn sanity(&self) -> Result<(), APIError> {
        if self.ok() {
            Ok(())
        } else {
            Err(APIError::InvalidFormData)
        }
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum APIError {
    #[display("Invalid form data")]
    InvalidFormData,

    #[display("Task does not exist")]
    TaskNotFound,

    #[display("Group does not exist")]
    GroupNotFound,

    #[display("Hint does not exist")]
    HintNotFound,

    #[display("Generation preset does not exist")]
    PresetNotFound,

    #[display("Validation failed: {_0}")]
    Validation(String),

    #[display("Reparenting would create a cycle")]
    CycleDetected,

    #[display("Seed inheritance does not terminate at a literal")]
    InvalidInherit,

    #[display("Submitting too frequently, retry after {retry_after} seconds")]
    TooFrequentSubmissions { retry_after: i64 },

    #[display("Not enough points")]
    NotEnoughPoints,

    #[display("Task already solved")]
    TaskAlreadySolved,

    #[display("Not implemented: {_0}")]
    NotImplemented(&'static str),

    #[display("Server error at {location}, ref[{refnum}]: {msg}")]
    ServerError {
        location: &'static str,
        msg: &'static str,
        refnum: uuid::Uuid,
    },
}

impl APIError {
    /// Stable, translatable key for user-facing error rendering.
    pub fn key(&self) -> &'static str {
        match self {
            APIError::InvalidFormData => "invalid_form_data",
            APIError::TaskNotFound => "task_not_found",
            APIError::GroupNotFound => "group_not_found",
            APIError::HintNotFound => "hint_not_found",
            APIError::PresetNotFound => "preset_not_found",
            APIError::Validation(_) => "validation_failed",
            APIError::CycleDetected => "cycle_detected",
            APIError::InvalidInherit => "invalid_inherit",
            APIError::TooFrequentSubmissions { .. } => "too_frequent_submissions",
            APIError::NotEnoughPoints => "not_enough_points",
            APIError::TaskAlreadySolved => "task_already_solved",
            APIError::NotImplemented(_) => "not_implemented",
            APIError::ServerError { .. } => "server_error",
        }
    }

    pub fn set_location(self, location: &'static str) -> Self {
        match self {
            APIError::ServerError {
                location: _,
                msg,
                refnum,
            } => APIError::ServerError {
                location,
                msg,
                refnum,
            },
            _ => self,
        }
    }

    pub fn log(&self) {
        if let APIError::ServerError {
            location,
            msg,
            refnum,
        } = self
        {
            error!("Server error at {location}, ref[{refnum}]: {msg}");
        }
    }
}

impl Serialize for APIError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("APIError", 2)?;
        state.serialize_field("key", self.key())?;
        match self {
            // Internals are logged with the refnum; the caller gets a
            // generic failure carrying only the reference.
            APIError::ServerError { refnum, .. } => {
                state.serialize_field("desp", &format!("Internal error, ref[{refnum}]"))?
            }
            other => state.serialize_field("desp", &other.to_string())?,
        }
        state.end()
    }
}

impl From<std::io::Error> for APIError {
    fn from(e: std::io::Error) -> Self {
        new_unlocated_server_error(e, ERROR_STORE_IO)
    }
}

impl From<serde_json::Error> for APIError {
    fn from(e: serde_json::Error) -> Self {
        new_unlocated_server_error(e, ERROR_STORE_DECODE)
    }
}

pub fn log_server_error<E>(error: E, location: &'static str, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    new_unlocated_server_error(error, msg)
        .set_location(location)
        .tap(APIError::log)
}

pub fn new_unlocated_server_error<E>(error: E, msg: &'static str) -> APIError
where
    E: derive_more::Display,
{
    let refnum = uuid::Uuid::new_v4();
    error!("Error [{refnum}]: {error}");
    APIError::ServerError {
        location: LOCATION_UNKNOWN,
        msg,
        refnum,
    }
}

pub static ERROR_STORE_IO: &str = "store_io_failed";
pub static ERROR_STORE_DECODE: &str = "store_record_malformed";
pub static ERROR_GENERATION: &str = "generation_failed";
pub static ERROR_GENERATION_TIMEOUT: &str = "generation_timeout";
pub static ERROR_GENERATION_PANIC: &str = "generation_panicked";

pub static LOCATION_UNKNOWN: &str = "[unknown]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_serialize_with_stable_keys() {
        let err = APIError::TooFrequentSubmissions { retry_after: 7 };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["key"], "too_frequent_submissions");
        assert!(json["desp"].as_str().unwrap().contains('7'));

        assert_eq!(APIError::TaskAlreadySolved.key(), "task_already_solved");
        assert_eq!(APIError::NotEnoughPoints.key(), "not_enough_points");
    }

    #[test]
    fn server_errors_hide_internal_detail() {
        let err = new_unlocated_server_error("disk on fire", ERROR_STORE_IO);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["key"], "server_error");
        assert!(!json["desp"].as_str().unwrap().contains("disk"));
    }
}
