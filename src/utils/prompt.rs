/// Interactive confirmation for destructive operations
use anyhow::{Context, Result};
use dialoguer::Input;

use crate::error::PreflightError;

/// Source of operator answers
pub trait Prompt: Send + Sync {
    fn ask(&self, question: &str) -> Result<String>;
}

/// Reads the answer from the terminal
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&self, question: &str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(format!("{} [y/N]", question))
            .allow_empty(true)
            .interact_text()
            .context("Failed to read confirmation")
    }
}

/// Only a literal `y` or `Y` counts as consent
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y")
}

/// Ask for consent unless `assume_yes` is set; a refusal becomes [`PreflightError::Aborted`]
pub fn confirm(prompt: &dyn Prompt, question: &str, assume_yes: bool) -> Result<()> {
    if assume_yes {
        return Ok(());
    }

    let answer = prompt.ask(question)?;
    if is_affirmative(&answer) {
        Ok(())
    } else {
        Err(PreflightError::Aborted.into())
    }
}
