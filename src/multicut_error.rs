/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::fmt::Display;
use std::io::ErrorKind;

/// Well-defined errors for things that can go wrong during encoding or decoding.
/// Input errors are caller bugs and unrecoverable, stream errors indicate
/// corrupt or truncated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    AssertionFailure = 1,
    InvalidDimensions = 2,
    StreamInconsistent = 3,
    CorruptHeader = 4,
    BadClassifierLabel = 5,
    ShortRead = 6,
    OsError = 7,
}

impl ExitCode {
    pub fn as_integer_error_code(self) -> i32 {
        self as i32
    }
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error payload carried through all fallible paths. The exit code groups
/// failures coarsely (also used as the process exit code by the utility
/// binary), the message carries the specifics.
#[derive(Debug, Clone)]
pub struct MulticutError {
    exit_code: ExitCode,
    message: String,
}

impl MulticutError {
    pub fn new(exit_code: ExitCode, message: &str) -> MulticutError {
        MulticutError {
            exit_code,
            message: message.to_owned(),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for MulticutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error code: {0} {1}", self.exit_code, self.message)
    }
}

impl std::error::Error for MulticutError {}

impl From<std::io::Error> for MulticutError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::UnexpectedEof => MulticutError::new(ExitCode::ShortRead, &e.to_string()),
            _ => MulticutError::new(ExitCode::OsError, &e.to_string()),
        }
    }
}
