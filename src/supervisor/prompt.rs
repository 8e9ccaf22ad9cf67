//! Operator confirmation (yes/no), shown only when the typecheck fails.

pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Interactive `cliclack` prompt, defaulting to "no".
/// A prompt that cannot be shown or is cancelled (Esc, Ctrl+C, no TTY) counts as "no".
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, question: &str) -> bool {
        answer_or_decline(cliclack::confirm(question).initial_value(false).interact())
    }
}

/// `--yes`: always continue without asking
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        let _ = cliclack::log::info(format!("{} yes (--yes)", question));
        true
    }
}

fn answer_or_decline(answer: std::io::Result<bool>) -> bool {
    answer.unwrap_or_else(|e| {
        tracing::warn!("Prompt unavailable ({}), treating as no", e);
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_error_declines() {
        let cancelled = std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled");
        assert!(!answer_or_decline(Err(cancelled)));
        assert!(answer_or_decline(Ok(true)));
        assert!(!answer_or_decline(Ok(false)));
    }

    #[test]
    fn test_assume_yes() {
        assert!(AssumeYes.confirm("Continue anyway?"));
    }
}
