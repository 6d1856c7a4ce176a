use crate::status::Status;
use crate::status_code::status_code_t;

/// The result type used throughout bfs, with `Status` as the error.
pub type Result<T> = std::result::Result<T, Status>;

/// Unit alias for operations that return nothing on success.
pub type Void = ();

/// Build an error result from a bare status code.
pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

/// Build an error result from a status code and message.
pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::{NamespaceCode, StatusCode};

    #[test]
    fn test_make_error() {
        let r: Result<i32> = make_error(NamespaceCode::NOT_FOUND);
        assert_eq!(r.unwrap_err().code(), NamespaceCode::NOT_FOUND);
    }

    #[test]
    fn test_make_error_msg() {
        let r: Result<()> = make_error_msg(StatusCode::INVALID_ARG, "bad block size");
        let err = r.unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
        assert_eq!(err.message(), Some("bad block size"));
    }
}
