use std::{any::Any, panic::UnwindSafe};

use anyhow::Result;

use crate::api::{IssuePhase, LanguageIssue};

pub fn mk_panic_error(info: &Box<dyn Any + Send>) -> String {
    let msg = match info.downcast_ref::<&'static str>() {
        Some(s) => *s,
        None => match info.downcast_ref::<String>() {
            Some(s) => &s[..],
            None => "non-string panic!()",
        },
    };

    format!("panic: {msg}")
}

pub fn catch_unwind<F: FnOnce() -> Result<R> + UnwindSafe, R>(f: F) -> Result<R> {
    match std::panic::catch_unwind(f) {
        Ok(r) => r,
        Err(e) => Err(anyhow::anyhow!(mk_panic_error(&e))),
    }
}

/// Runs one pipeline stage; panics and errors both come back as an
/// `Internal` issue tagged with the stage's phase.
pub fn catch_stage<F: FnOnce() -> Result<R> + UnwindSafe, R>(
    phase: IssuePhase,
    f: F,
) -> std::result::Result<R, LanguageIssue> {
    catch_unwind(f).map_err(|e| LanguageIssue::internal(phase, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IssueCode;

    #[test]
    fn panic_becomes_issue() {
        let r: std::result::Result<(), _> =
            catch_stage(IssuePhase::SyntaxAnalysis, || panic!("boom"));
        let issue = r.unwrap_err();
        assert_eq!(issue.code, IssueCode::Internal);
        assert_eq!(issue.phase, IssuePhase::SyntaxAnalysis);
        assert!(issue.message.contains("panic: boom"));
    }
}
