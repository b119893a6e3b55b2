//! Workspace result alias.
//!
//! Component crates keep plain domain enums for the errors they pass between
//! their own functions and wrap them in a rootcause [`Report`] at their
//! public surface, where `?` performs the conversion.

use rootcause::Report;

/// Result of a public, fallible client operation.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Unreachable;

    impl fmt::Display for Unreachable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "server unreachable")
        }
    }

    impl std::error::Error for Unreachable {}

    fn check_server(up: bool) -> Result<u16, Unreachable> {
        let status = if up { Ok(200) } else { Err(Unreachable) };
        Ok(status?)
    }

    #[test]
    fn domain_error_converts_with_question_mark() {
        assert_eq!(check_server(true).expect("up"), 200);
        let report = check_server(false).expect_err("down");
        assert!(report.to_string().contains("server unreachable"));
    }
}
