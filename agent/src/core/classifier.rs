//! Deterministic classification of failure text into an [`ErrorType`].

use crate::core::types::ErrorType;

// Checked in order; the first table entry with a matching needle wins.
const SIGNATURES: &[(ErrorType, &[&str])] = &[
    (
        ErrorType::Timeout,
        &["timed out", "timeout", "time limit exceeded"],
    ),
    (
        ErrorType::SafetyViolation,
        &["forbidden", "access denied", "securityexception", "permission denied"],
    ),
    (
        ErrorType::MalformedCode,
        &[
            "does not contain a class",
            "generated source is empty",
            "reached end of file while parsing",
        ],
    ),
    (
        ErrorType::CompilationError,
        &[
            "cannot find symbol",
            "';' expected",
            "illegal start of",
            "class, interface, enum, or record expected",
            "class, interface, or enum expected",
            "incompatible types",
            "missing return statement",
            "error: ",
            "compilation failed",
        ],
    ),
    (
        ErrorType::RuntimeError,
        &[
            "exception in thread",
            "nullpointerexception",
            "arrayindexoutofbounds",
            "arithmeticexception",
            "stackoverflowerror",
            "outofmemoryerror",
            "exception",
        ],
    ),
    (
        ErrorType::TestFailure,
        &["but was", "but got", "assertion failed", "test failed"],
    ),
    (
        ErrorType::TestParseError,
        &["could not parse any test cases"],
    ),
];

/// Infer the most likely error category from compiler/runtime/test output.
pub fn classify_error_message(message: &str) -> ErrorType {
    let lower = message.to_lowercase();
    if lower.trim().is_empty() {
        return ErrorType::Unknown;
    }
    SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
        .map(|(error_type, _)| *error_type)
        .unwrap_or(ErrorType::Unknown)
}
