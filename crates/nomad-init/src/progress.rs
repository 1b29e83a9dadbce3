//! Terminal progress for provisioning runs

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use nomad_provision::{Reporter, StepResult};

/// Shows a spinner while a step runs and one line per finished step
#[derive(Default)]
pub struct SpinnerReporter {
    current: Option<ProgressBar>,
}

impl SpinnerReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.current.take() {
            spinner.finish_and_clear();
        }
    }
}

impl Reporter for SpinnerReporter {
    fn step_started(&mut self, index: usize, total: usize, description: &str) {
        self.clear();

        let spinner = ProgressBar::new_spinner();
        if let Ok(template) =
            ProgressStyle::default_spinner().template(&format!("{{spinner:.cyan}} [{index}/{total}] {{msg}}"))
        {
            spinner.set_style(template);
        }
        spinner.set_message(description.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.current = Some(spinner);
    }

    fn step_finished(&mut self, index: usize, total: usize, description: &str, result: &StepResult) {
        self.clear();

        match result {
            StepResult::Applied => {
                println!("[{index}/{total}] {} {description}", style("v").green());
            }
            StepResult::AlreadySatisfied => {
                println!(
                    "[{index}/{total}] {} {description} {}",
                    style("o").yellow(),
                    style("(unchanged)").dim()
                );
            }
            StepResult::Failed(reason) => {
                println!("[{index}/{total}] {} {description}", style("x").red());
                println!("      {}", style(reason).red());
            }
        }
    }
}

impl Drop for SpinnerReporter {
    fn drop(&mut self) {
        self.clear();
    }
}
