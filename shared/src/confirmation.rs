use std::io::IsTerminal;

use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::types::{RagError, Result};

/// Yes/no prompt for destructive actions such as a forced rebuild.
/// Without an attached terminal the default answer is taken.
pub fn ask_confirmation(prompt: &str, default_yes: bool) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(default_yes);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default_yes)
        .show_default(true)
        .interact()
        .map_err(prompt_error)
}

fn prompt_error(err: dialoguer::Error) -> RagError {
    let dialoguer::Error::IO(e) = err;
    RagError::Io(e)
}
