use anyhow::{Error, anyhow};

/// Folds the failures from fan-out work into a single error, keeping every
/// message. An empty list is success.
pub fn join_errors(errs: Vec<Error>) -> anyhow::Result<()> {
    match errs.len() {
        0 => Ok(()),
        1 => Err(errs.into_iter().next().unwrap()),
        _ => {
            let combined = errs
                .iter()
                .map(|e| format!("{e:#}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(anyhow!(combined))
        }
    }
}
