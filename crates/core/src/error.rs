use thiserror::Error;

use crate::record::TaskStatus;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
