//! Command-line interface

pub mod args;
pub mod commands;

pub use args::{BuildArgs, CacheAction, CacheArgs, Cli, Commands, OutputFormat, ValidateArgs};

use crate::error::ErrorKind;

/// Process exit status for a failure of `kind`
pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Config | ErrorKind::InvalidInvocation => 2,
        ErrorKind::NoCompilerAvailable
        | ErrorKind::NoGeneratorAvailable
        | ErrorKind::NoPackageManagerAvailable => 3,
        ErrorKind::IntegrityVerification => 4,
        ErrorKind::InvocationTimeout => 5,
        ErrorKind::ProbeDegraded
        | ErrorKind::CacheCorruption
        | ErrorKind::BuildFailed
        | ErrorKind::Cancelled
        | ErrorKind::Io
        | ErrorKind::Internal => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_kind() {
        assert_eq!(exit_code(ErrorKind::Config), 2);
        assert_eq!(exit_code(ErrorKind::NoCompilerAvailable), 3);
        assert_eq!(exit_code(ErrorKind::IntegrityVerification), 4);
        assert_eq!(exit_code(ErrorKind::InvocationTimeout), 5);
        assert_eq!(exit_code(ErrorKind::BuildFailed), 1);
    }
}
