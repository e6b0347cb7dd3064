mod error;
mod grammar;

pub use error::ParseError;

use crate::types::Program;

/// Parse rule source into a [`Program`].
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid rule syntax.
pub fn parse(input: &str) -> Result<Program, ParseError> {
    use winnow::Parser;
    grammar::program
        .parse(input)
        .map_err(|e| ParseError::new(e.offset(), e.inner().to_string()))
}
