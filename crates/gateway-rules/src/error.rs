// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors raised by condition evaluation, the expression language, and the
//! action pipeline.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EvalError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("type mismatch evaluating operator {0}")]
    TypeMismatch(String),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("expression parse error: {0}")]
    Parse(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("wrong argument count for {0}: expected {1}, got {2}")]
    ArgCount(String, usize, usize),

    #[error("action execution failed: {0}")]
    Action(String),
}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::Action(err.to_string())
    }
}
