use std::fmt::Display;
use std::time::{Duration, Instant};

/// What happened to a single stage during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every output tag was already present.
    SkippedSatisfied,
    /// Some input tags were absent; the listed ones.
    SkippedMissingInputs(Vec<String>),
    /// The unit ran and reported success; the tags it wrote.
    Success(Vec<String>),
    /// The unit ran and reported failure; the tags it wrote anyway.
    Failed(Vec<String>),
    /// The unit returned an error or panicked. Nothing was written.
    Errored(String),
}

impl Outcome {
    pub fn ran(&self) -> bool {
        matches!(
            self,
            Outcome::Success(_) | Outcome::Failed(_) | Outcome::Errored(_)
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Errored(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::SkippedSatisfied => "satisfied",
            Outcome::SkippedMissingInputs(_) => "unready",
            Outcome::Success(_) => "success",
            Outcome::Failed(_) => "failed",
            Outcome::Errored(_) => "errored",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitRun {
    pub name: String,
    pub outcome: Outcome,
    pub start: Instant,
    pub duration: Duration,
}

/// Per-stage outcomes of one pipeline run, in pipeline order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub runs: Vec<UnitRun>,
}

impl Diagnostics {
    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.runs
            .iter()
            .find(|run| run.name == name)
            .map(|run| &run.outcome)
    }

    pub fn executed(&self) -> impl Iterator<Item = &UnitRun> {
        self.runs.iter().filter(|run| run.outcome.ran())
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitRun> {
        self.runs.iter().filter(|run| run.outcome.is_failure())
    }

    pub fn total(&self) -> Duration {
        self.runs.iter().map(|run| run.duration).sum()
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self.runs.iter().map(|run| run.name.len()).max().unwrap_or(0);

        for run in &self.runs {
            write!(f, "{:<width$}  {:<9}", run.name, run.outcome.label())?;

            match &run.outcome {
                Outcome::SkippedMissingInputs(tags) => write!(f, "  missing {}", tags.join(", "))?,
                Outcome::Success(tags) | Outcome::Failed(tags) if !tags.is_empty() => {
                    write!(f, "  wrote {}", tags.join(", "))?
                }
                Outcome::Errored(message) => write!(f, "  {message}")?,
                _ => {}
            }

            if run.outcome.ran() {
                write!(f, "  ({:.2?})", run.duration)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}
