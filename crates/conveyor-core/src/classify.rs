//! Error classification used by the run summary's `failureBreakdown`
//! (spec.md §4.4.2, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    Timeout,
    ReadError,
    ClientError,
    ServerError,
    Other,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ReadError => "readError",
            ErrorClass::ClientError => "clientError",
            ErrorClass::ServerError => "serverError",
            ErrorClass::Other => "other",
        }
    }
}

/// Classify one attempt's final `(statusCode, errorMessage)` pair.
pub fn classify_error(status_code: i32, message: Option<&str>) -> ErrorClass {
    let msg = message.unwrap_or("");
    let lower = msg.to_ascii_lowercase();

    if status_code == 0 {
        if lower.starts_with("read file:") {
            return ErrorClass::ReadError;
        }
        if ["timeout", "abort", "etimedout", "econnaborted"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            return ErrorClass::Timeout;
        }
        return ErrorClass::Other;
    }

    if (400..500).contains(&status_code) {
        return ErrorClass::ClientError;
    }
    if (500..600).contains(&status_code) {
        return ErrorClass::ServerError;
    }

    ErrorClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classified_from_message() {
        assert_eq!(
            classify_error(0, Some("connect ETIMEDOUT 1.2.3.4:443")),
            ErrorClass::Timeout
        );
        assert_eq!(classify_error(0, Some("request aborted")), ErrorClass::Timeout);
    }

    #[test]
    fn read_error_classified_from_prefix() {
        assert_eq!(
            classify_error(0, Some("Read file: permission denied")),
            ErrorClass::ReadError
        );
    }

    #[test]
    fn http_ranges_classified() {
        assert_eq!(classify_error(404, None), ErrorClass::ClientError);
        assert_eq!(classify_error(503, None), ErrorClass::ServerError);
        assert_eq!(classify_error(301, None), ErrorClass::Other);
    }
}
