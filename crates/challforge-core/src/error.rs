// Copyright (C) 2026 Challforge contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for challforge-core.
//!
//! Provides a unified error type covering persistence, container runtime,
//! and challenge lifecycle failures.

use std::fmt;

use crate::types::{BuildId, ChallengeId, InstanceId};

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while managing challenges, builds, and
/// instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Challenge was not found in the database.
    ChallengeNotFound {
        /// The challenge ID that was not found.
        challenge_id: ChallengeId,
    },

    /// Build was not found in the database.
    BuildNotFound {
        /// The build ID that was not found.
        build_id: BuildId,
    },

    /// Instance was not found in the database.
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: InstanceId,
    },

    /// Two challenge definitions resolved to the same ID.
    DuplicateChallenge {
        /// The colliding challenge ID.
        challenge_id: ChallengeId,
        /// Definition file that claimed the ID first.
        first_path: String,
        /// Definition file that collided.
        second_path: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A source change cannot be applied while builds of the challenge exist.
    RebuildRequired {
        /// The challenge whose builds are stale.
        challenge_id: ChallengeId,
        /// Number of existing builds blocking the update.
        build_count: i64,
    },

    /// The build is locked and its instances cannot be managed.
    LockedBuild {
        /// The locked build ID.
        build_id: BuildId,
    },

    /// The build still has running instances.
    BuildInUse {
        /// The build ID.
        build_id: BuildId,
        /// Number of live instances.
        instance_count: i64,
    },

    /// No Dockerfile template is registered for a challenge type.
    MissingBuilderImage {
        /// The challenge type without a template.
        challenge_type: String,
    },

    /// The container runtime rejected the image build.
    ImageBuildFailed {
        /// The build ID being materialized.
        build_id: BuildId,
        /// The host whose image failed.
        host: String,
        /// Error message reported by the runtime.
        message: String,
    },

    /// A container runtime operation failed.
    RuntimeError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// The challenge has no solve script to run.
    NoSolveScript {
        /// The challenge ID.
        challenge_id: ChallengeId,
    },

    /// The solver exited without writing a flag file.
    FlagFileMissing {
        /// The instance that was being solved.
        instance_id: InstanceId,
        /// Solver exit code, if the container ran to completion.
        exit_code: Option<i64>,
        /// Captured solver container output.
        logs: String,
    },

    /// The solver produced a flag that does not match the build's flag.
    SolveFlagMismatch {
        /// The instance that was being solved.
        instance_id: InstanceId,
        /// Expected flag value.
        expected: String,
        /// Flag the solver produced.
        actual: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A transaction rollback itself failed; state may be inconsistent.
    RollbackFailed {
        /// The operation whose rollback failed.
        operation: String,
        /// The error that triggered the rollback.
        cause: String,
        /// The rollback failure details.
        details: String,
    },

    /// Filesystem operation failed.
    IoError {
        /// The path involved, if known.
        path: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ChallengeNotFound { .. } => "CHALLENGE_NOT_FOUND",
            Self::BuildNotFound { .. } => "BUILD_NOT_FOUND",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::DuplicateChallenge { .. } => "DUPLICATE_CHALLENGE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::RebuildRequired { .. } => "REBUILD_REQUIRED",
            Self::LockedBuild { .. } => "LOCKED_BUILD",
            Self::BuildInUse { .. } => "BUILD_IN_USE",
            Self::MissingBuilderImage { .. } => "MISSING_BUILDER_IMAGE",
            Self::ImageBuildFailed { .. } => "IMAGE_BUILD_FAILED",
            Self::RuntimeError { .. } => "RUNTIME_ERROR",
            Self::NoSolveScript { .. } => "NO_SOLVE_SCRIPT",
            Self::FlagFileMissing { .. } => "FLAG_FILE_MISSING",
            Self::SolveFlagMismatch { .. } => "SOLVE_FLAG_MISMATCH",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::RollbackFailed { .. } => "ROLLBACK_FAILED",
            Self::IoError { .. } => "IO_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChallengeNotFound { challenge_id } => {
                write!(f, "Challenge '{}' not found", challenge_id)
            }
            Self::BuildNotFound { build_id } => {
                write!(f, "Build '{}' not found", build_id)
            }
            Self::InstanceNotFound { instance_id } => {
                write!(f, "Instance '{}' not found", instance_id)
            }
            Self::DuplicateChallenge {
                challenge_id,
                first_path,
                second_path,
            } => {
                write!(
                    f,
                    "Challenge ID '{}' defined by both '{}' and '{}'",
                    challenge_id, first_path, second_path
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::RebuildRequired {
                challenge_id,
                build_count,
            } => {
                write!(
                    f,
                    "Challenge '{}' has {} existing build(s) that must be destroyed before its source can change",
                    challenge_id, build_count
                )
            }
            Self::LockedBuild { build_id } => {
                write!(f, "Build '{}' is locked", build_id)
            }
            Self::BuildInUse {
                build_id,
                instance_count,
            } => {
                write!(
                    f,
                    "Build '{}' still has {} running instance(s)",
                    build_id, instance_count
                )
            }
            Self::MissingBuilderImage { challenge_type } => {
                write!(
                    f,
                    "No Dockerfile template registered for challenge type '{}'",
                    challenge_type
                )
            }
            Self::ImageBuildFailed {
                build_id,
                host,
                message,
            } => {
                write!(
                    f,
                    "Image build failed for host '{}' of build '{}': {}",
                    host, build_id, message
                )
            }
            Self::RuntimeError { operation, details } => {
                write!(f, "Container runtime error during '{}': {}", operation, details)
            }
            Self::NoSolveScript { challenge_id } => {
                write!(f, "Challenge '{}' has no solve script", challenge_id)
            }
            Self::FlagFileMissing {
                instance_id,
                exit_code,
                logs,
            } => {
                if let Some(code) = exit_code {
                    write!(
                        f,
                        "Solver for instance '{}' exited with code {} without writing a flag; logs: {}",
                        instance_id, code, logs
                    )
                } else {
                    write!(
                        f,
                        "Solver for instance '{}' did not write a flag; logs: {}",
                        instance_id, logs
                    )
                }
            }
            Self::SolveFlagMismatch {
                instance_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Solver for instance '{}' produced flag '{}', expected '{}'",
                    instance_id, actual, expected
                )
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::RollbackFailed {
                operation,
                cause,
                details,
            } => {
                write!(
                    f,
                    "Rollback of '{}' failed ({}) after error: {}",
                    operation, details, cause
                )
            }
            Self::IoError { path, details } => {
                write!(f, "I/O error at '{}': {}", path, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<bollard::errors::Error> for CoreError {
    fn from(err: bollard::errors::Error) -> Self {
        CoreError::RuntimeError {
            operation: "docker".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IoError {
            path: String::new(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BuildId, InstanceId};

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                CoreError::ChallengeNotFound {
                    challenge_id: "cat/name".into(),
                },
                "CHALLENGE_NOT_FOUND",
            ),
            (
                CoreError::BuildNotFound {
                    build_id: BuildId(3),
                },
                "BUILD_NOT_FOUND",
            ),
            (
                CoreError::InstanceNotFound {
                    instance_id: InstanceId(4),
                },
                "INSTANCE_NOT_FOUND",
            ),
            (
                CoreError::LockedBuild {
                    build_id: BuildId(3),
                },
                "LOCKED_BUILD",
            ),
            (
                CoreError::BuildInUse {
                    build_id: BuildId(3),
                    instance_count: 2,
                },
                "BUILD_IN_USE",
            ),
            (
                CoreError::ValidationError {
                    field: "seed".to_string(),
                    message: "negative".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                CoreError::DatabaseError {
                    operation: "insert".to_string(),
                    details: "locked".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::ChallengeNotFound {
            challenge_id: "web/sqli-101".into(),
        };
        assert_eq!(err.to_string(), "Challenge 'web/sqli-101' not found");

        let err = CoreError::BuildInUse {
            build_id: BuildId(7),
            instance_count: 2,
        };
        assert_eq!(err.to_string(), "Build '7' still has 2 running instance(s)");

        let err = CoreError::RebuildRequired {
            challenge_id: "pwn/heap".into(),
            build_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "Challenge 'pwn/heap' has 3 existing build(s) that must be destroyed before its source can change"
        );

        let err = CoreError::SolveFlagMismatch {
            instance_id: InstanceId(1),
            expected: "flag{aa}".to_string(),
            actual: "flag{bb}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Solver for instance '1' produced flag 'flag{bb}', expected 'flag{aa}'"
        );

        let err = CoreError::FlagFileMissing {
            instance_id: InstanceId(1),
            exit_code: Some(2),
            logs: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Solver for instance '1' exited with code 2 without writing a flag; logs: connection refused"
        );
    }
}
