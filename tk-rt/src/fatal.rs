//! Unrecoverable failures.
//!
//! Everything this crate detects is a sign that the code generator and the
//! runtime disagree about memory, so there is no recovery path: a [`Fatal`]
//! is reported once and the process exits. `Fatal` does not implement
//! `std::error::Error`.

use std::fmt;

pub const FATAL_EXIT_CODE: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FatalKind {
    ArgCount { expected: String, got: usize },
    Shape(String),
    Range(String),
    Unsupported(String),
    Os(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fatal {
    pub op: &'static str,
    pub kind: FatalKind,
}

pub type RtResult<T> = Result<T, Fatal>;

impl Fatal {
    pub fn arg_count(op: &'static str, expected: impl Into<String>, got: usize) -> Self {
        Self {
            op,
            kind: FatalKind::ArgCount {
                expected: expected.into(),
                got,
            },
        }
    }

    pub fn shape(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            kind: FatalKind::Shape(message.into()),
        }
    }

    pub fn range(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            kind: FatalKind::Range(message.into()),
        }
    }

    pub fn unsupported(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            kind: FatalKind::Unsupported(message.into()),
        }
    }

    pub fn os(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            kind: FatalKind::Os(message.into()),
        }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            FatalKind::ArgCount { expected, got } => {
                format!("{expected} argument(s) expected, got {got}")
            }
            FatalKind::Shape(message)
            | FatalKind::Range(message)
            | FatalKind::Unsupported(message)
            | FatalKind::Os(message) => message.clone(),
        }
    }

    /// Reports the failure as a single diagnostic line and exits.
    pub fn terminate(self) -> ! {
        if tracing::dispatcher::has_been_set() {
            tracing::error!("{} {self}", crate::logging::category_fatal());
        } else {
            eprintln!("{self}");
        }
        std::process::exit(FATAL_EXIT_CODE)
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error in {} -- {}", self.op, self.message())
    }
}

pub trait OrTerminate<T> {
    fn or_terminate(self) -> T;
}

impl<T> OrTerminate<T> for RtResult<T> {
    fn or_terminate(self) -> T {
        match self {
            Ok(value) => value,
            Err(fatal) => fatal.terminate(),
        }
    }
}
