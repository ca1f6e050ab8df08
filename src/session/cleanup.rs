//! Best-effort teardown helper.

use std::fmt::Display;

type Step<'a, T, E> = (&'static str, Box<dyn FnOnce(&mut T) -> Result<(), E> + 'a>);

/// An ordered list of independent, fallible teardown steps.
///
/// Every step runs even if an earlier one failed; failures are logged
/// and counted, never propagated.
pub struct CleanupSteps<'a, T: ?Sized, E> {
    label: String,
    steps: Vec<Step<'a, T, E>>,
}

impl<'a, T: ?Sized, E: Display> CleanupSteps<'a, T, E> {
    /// Creates an empty step list; `label` identifies the target in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a named step.
    pub fn step(mut self, name: &'static str, f: impl FnOnce(&mut T) -> Result<(), E> + 'a) -> Self {
        self.steps.push((name, Box::new(f)));
        self
    }

    /// Runs every step against `target` and returns the number that failed.
    pub fn run(self, target: &mut T) -> usize {
        let mut failures = 0;
        for (name, step) in self.steps {
            if let Err(e) = step(target) {
                failures += 1;
                tracing::warn!(label = %self.label, step = name, error = %e, "Cleanup step failed");
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_steps_run_after_failure() {
        let mut log: Vec<String> = Vec::new();
        let failures = CleanupSteps::<Vec<String>, String>::new("test")
            .step("first", |log| {
                log.push("first".to_owned());
                Err("boom".to_owned())
            })
            .step("second", |log| {
                log.push("second".to_owned());
                Ok(())
            })
            .step("third", |log| {
                log.push("third".to_owned());
                Err("again".to_owned())
            })
            .run(&mut log);

        assert_eq!(failures, 2);
        assert_eq!(log, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_list() {
        let mut value = 0u8;
        assert_eq!(CleanupSteps::<u8, String>::new("noop").run(&mut value), 0);
    }
}
