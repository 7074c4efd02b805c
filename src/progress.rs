//! Terminal progress and confirmation for apply runs.

use crate::ui;
use colored::Colorize;
use declarative::{
    Action, Address, ApplyResult, ConfirmCallback, ExecuteSummary, ProgressCallback,
};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeSet;
use std::time::Duration;

/// Progress bar over the provider calls of one run
pub struct ApplyProgress {
    pb: Option<ProgressBar>,
    hidden: bool,
    running: BTreeSet<String>,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            pb: None,
            hidden: quiet,
            running: BTreeSet::new(),
        }
    }

    fn refresh_message(&self) {
        if let Some(pb) = &self.pb {
            let names: Vec<&str> = self.running.iter().map(String::as_str).collect();
            pb.set_message(names.join(", "));
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_run_start(&mut self, steps: usize) {
        let pb = if self.hidden {
            ProgressBar::with_draw_target(Some(steps as u64), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(steps as u64)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        self.pb = Some(pb);
    }

    fn on_resource_start(&mut self, address: &Address, action: Action) {
        self.running.insert(format!("{action} {address}"));
        self.refresh_message();
    }

    fn on_resource_complete(&mut self, address: &Address, action: Action, result: &ApplyResult) {
        self.running.remove(&format!("{action} {address}"));
        let symbol = if result.is_success() {
            "✓".green()
        } else {
            "✗".red()
        };
        let detail = match result {
            ApplyResult::Created { id } | ApplyResult::Replaced { id } => {
                format!(" ({id})").dimmed().to_string()
            }
            ApplyResult::Failed { error } => format!(": {error}"),
            _ => String::new(),
        };
        let line = format!(
            "  {symbol} {} {address}{detail}",
            ui::result_label(result)
        );

        if let Some(pb) = &self.pb {
            if !self.hidden {
                pb.println(line);
            }
            pb.inc(1);
        }
        self.refresh_message();
    }

    fn on_run_complete(&mut self, _summary: &ExecuteSummary) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Ask on the terminal before applying
pub struct PromptConfirm {
    auto_approve: bool,
    /// Answer given, if the run asked at all
    pub answer: Option<bool>,
}

impl PromptConfirm {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            answer: None,
        }
    }
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> declarative::Result<bool> {
        let answer = if self.auto_approve {
            true
        } else {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .map_err(|e| declarative::Error::Io(std::io::Error::other(e)))?
        };
        self.answer = Some(answer);
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_approve_skips_prompt() {
        let mut confirm = PromptConfirm::new(true);
        assert_eq!(confirm.answer, None);
        assert!(confirm.confirm("Apply?").unwrap());
        assert_eq!(confirm.answer, Some(true));
    }

    #[test]
    fn test_hidden_progress_counts_steps() {
        let mut progress = ApplyProgress::new(true);
        let address: Address = "network.ci".parse().unwrap();
        progress.on_run_start(2);
        progress.on_resource_start(&address, Action::Create);
        assert_eq!(progress.running.len(), 1);
        progress.on_resource_complete(
            &address,
            Action::Create,
            &ApplyResult::Created {
                id: "net-1".to_string(),
            },
        );
        assert!(progress.running.is_empty());
        assert_eq!(progress.pb.as_ref().map(ProgressBar::position), Some(1));
        progress.on_run_complete(&ExecuteSummary::default());
        assert!(progress.pb.is_none());
    }
}
