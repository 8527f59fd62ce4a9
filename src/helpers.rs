/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use anyhow::Result;

use crate::multicut_error::{ExitCode, MulticutError};

macro_rules! here {
    () => {
        concat!("at ", file!(), ":", line!())
    };
}

pub(crate) use here;

/// constructs a failure result carrying the given exit code and message
pub fn err_exit_code<T>(error_code: ExitCode, message: &str) -> Result<T> {
    return Err(MulticutError::new(error_code, message).into());
}
