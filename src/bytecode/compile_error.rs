use thiserror::Error;

/// Early exit from a grammar rule.
///
/// User-facing problems are reported through `Diagnostics` before one of
/// these is returned; the variant only tells the caller how far to unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Abort {
    /// Abandon the current statement and resynchronise at the next `;` or `}`.
    #[error("statement abandoned")]
    Panic,

    /// Stop compiling the unit.
    #[error("compilation aborted")]
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Abort::Panic.to_string(), "statement abandoned");
        assert_eq!(Abort::Fatal.to_string(), "compilation aborted");
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = Abort::Fatal;
        let _: &dyn std::error::Error = &err;
    }
}
