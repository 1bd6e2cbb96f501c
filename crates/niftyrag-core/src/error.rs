use thiserror::Error;

/// Errors raised while constructing validated domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("symbol is {len} characters long; at most {max} are allowed")]
    SymbolTooLong { len: usize, max: usize },

    #[error("symbol must start with a letter or digit, found '{ch}'")]
    SymbolInvalidStart { ch: char },

    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },
}
