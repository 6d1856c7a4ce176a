/// Numeric status code carried by every `Status`.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Generic status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const IO_ERROR: status_code_t = 5;
    pub const TIMEOUT: status_code_t = 6;
    pub const CANCELED: status_code_t = 7;
    pub const UNKNOWN: status_code_t = 999;
}

/// Namespace (path tree) status codes (3xxx).
pub mod NamespaceCode {
    use super::status_code_t;

    pub const INVALID_PATH: status_code_t = 3000;
    pub const NOT_FOUND: status_code_t = 3001;
    pub const ALREADY_EXISTS: status_code_t = 3002;
    pub const NOT_EMPTY: status_code_t = 3003;
    pub const NOT_DIRECTORY: status_code_t = 3004;
    pub const IS_DIRECTORY: status_code_t = 3005;
    pub const SNAPSHOT_CORRUPT: status_code_t = 3006;
}

/// Storage node status codes (4xxx).
pub mod StorageCode {
    use super::status_code_t;

    pub const BLOCK_NOT_FOUND: status_code_t = 4000;
    pub const CHECKSUM_MISMATCH: status_code_t = 4001;
    pub const NODE_FULL: status_code_t = 4002;
    pub const NODE_UNREACHABLE: status_code_t = 4003;
    pub const BAD_REQUEST: status_code_t = 4004;
}

/// Cluster membership status codes (5xxx).
pub mod ClusterCode {
    use super::status_code_t;

    pub const NODE_NOT_FOUND: status_code_t = 5000;
    pub const INSUFFICIENT_NODES: status_code_t = 5001;
    pub const NODE_DEAD: status_code_t = 5002;
}

/// Client / coordinator status codes (6xxx).
pub mod ClientCode {
    use super::status_code_t;

    pub const BLOCK_UNAVAILABLE: status_code_t = 6000;
    pub const WRITE_QUORUM_FAILED: status_code_t = 6001;
    pub const CORRUPT_FILE: status_code_t = 6002;
    pub const OPERATION_TIMEOUT: status_code_t = 6003;
}

/// Return the symbolic name for a status code.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::TIMEOUT => "Timeout",
        StatusCode::CANCELED => "Canceled",
        StatusCode::UNKNOWN => "Unknown",

        NamespaceCode::INVALID_PATH => "Namespace::InvalidPath",
        NamespaceCode::NOT_FOUND => "Namespace::NotFound",
        NamespaceCode::ALREADY_EXISTS => "Namespace::AlreadyExists",
        NamespaceCode::NOT_EMPTY => "Namespace::NotEmpty",
        NamespaceCode::NOT_DIRECTORY => "Namespace::NotDirectory",
        NamespaceCode::IS_DIRECTORY => "Namespace::IsDirectory",
        NamespaceCode::SNAPSHOT_CORRUPT => "Namespace::SnapshotCorrupt",

        StorageCode::BLOCK_NOT_FOUND => "Storage::BlockNotFound",
        StorageCode::CHECKSUM_MISMATCH => "Storage::ChecksumMismatch",
        StorageCode::NODE_FULL => "Storage::NodeFull",
        StorageCode::NODE_UNREACHABLE => "Storage::NodeUnreachable",
        StorageCode::BAD_REQUEST => "Storage::BadRequest",

        ClusterCode::NODE_NOT_FOUND => "Cluster::NodeNotFound",
        ClusterCode::INSUFFICIENT_NODES => "Cluster::InsufficientNodes",
        ClusterCode::NODE_DEAD => "Cluster::NodeDead",

        ClientCode::BLOCK_UNAVAILABLE => "Client::BlockUnavailable",
        ClientCode::WRITE_QUORUM_FAILED => "Client::WriteQuorumFailed",
        ClientCode::CORRUPT_FILE => "Client::CorruptFile",
        ClientCode::OPERATION_TIMEOUT => "Client::OperationTimeout",

        _ => "Unknown",
    }
}

/// Whether a failure with this code may succeed against another replica or
/// node. Structural namespace errors are never transient.
pub fn is_transient(code: status_code_t) -> bool {
    matches!(
        code,
        StorageCode::NODE_UNREACHABLE
            | StorageCode::CHECKSUM_MISMATCH
            | StorageCode::BLOCK_NOT_FOUND
            | StorageCode::NODE_FULL
            | StatusCode::TIMEOUT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(to_string(StatusCode::OK), "OK");
        assert_eq!(to_string(NamespaceCode::NOT_EMPTY), "Namespace::NotEmpty");
        assert_eq!(to_string(ClientCode::CORRUPT_FILE), "Client::CorruptFile");
        assert_eq!(to_string(12345), "Unknown");
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(StorageCode::NODE_UNREACHABLE));
        assert!(is_transient(StorageCode::CHECKSUM_MISMATCH));
        assert!(!is_transient(NamespaceCode::INVALID_PATH));
        assert!(!is_transient(NamespaceCode::ALREADY_EXISTS));
        assert!(!is_transient(ClientCode::WRITE_QUORUM_FAILED));
    }

    #[test]
    fn test_codes_are_distinct_across_groups() {
        let codes = [
            NamespaceCode::INVALID_PATH,
            NamespaceCode::NOT_FOUND,
            NamespaceCode::ALREADY_EXISTS,
            NamespaceCode::NOT_EMPTY,
            ClusterCode::INSUFFICIENT_NODES,
            StorageCode::CHECKSUM_MISMATCH,
            StorageCode::NODE_UNREACHABLE,
            ClientCode::BLOCK_UNAVAILABLE,
            ClientCode::WRITE_QUORUM_FAILED,
            ClientCode::CORRUPT_FILE,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
