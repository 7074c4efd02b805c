//! Progress and confirmation traits
//!
//! These traits allow the declarative crate to be used without
//! depending on a specific terminal UI.

use crate::error::Result;
use crate::types::{Action, Address, ApplyResult, ExecuteSummary};

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
/// All calls happen on the thread that called `execute`.
pub trait ProgressCallback {
    /// Called once before the first provider call
    fn on_run_start(&mut self, steps: usize);

    /// Called when a provider call for a resource is issued
    fn on_resource_start(&mut self, address: &Address, action: Action);

    /// Called when a provider call for a resource completes
    fn on_resource_complete(&mut self, address: &Address, action: Action, result: &ApplyResult);

    /// Called after the last call completed
    fn on_run_complete(&mut self, summary: &ExecuteSummary);
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    ///
    /// # Arguments
    /// * `prompt` - The confirmation prompt to show
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _steps: usize) {}
    fn on_resource_start(&mut self, _address: &Address, _action: Action) {}
    fn on_resource_complete(&mut self, _address: &Address, _action: Action, _result: &ApplyResult) {}
    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
