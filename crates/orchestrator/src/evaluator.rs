//! Loop-mode convergence evaluation.
//!
//! The evaluator is pluggable. When none is installed, the orchestrator
//! asks a registered agent to grade the output with [`grading_prompt`] and
//! reads its reply with [`Evaluation::parse`].

use async_trait::async_trait;
use conclave_core::error::InvocationError;

/// An evaluator's verdict on one iteration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// Explicit "stop refining" signal
    pub converged: bool,
    /// Quality score in `[0, 1]`
    pub score: Option<f64>,
    /// Feedback fed into the next refinement prompt
    pub critique: String,
}

impl Evaluation {
    pub fn converged() -> Self {
        Self {
            converged: true,
            ..Self::default()
        }
    }

    pub fn critique(critique: impl Into<String>) -> Self {
        Self {
            critique: critique.into(),
            ..Self::default()
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score.clamp(0.0, 1.0));
        self
    }

    /// Converged when explicitly signalled or scored at/above `threshold`.
    pub fn is_converged(&self, threshold: f64) -> bool {
        self.converged || self.score.is_some_and(|s| s >= threshold)
    }

    /// Read a grader's free-text reply.
    ///
    /// A `SCORE: <0..1>` line sets the score, a line that is exactly
    /// `CONVERGED` (trailing `.` or `!` allowed) sets the flag, and every
    /// other line is critique.
    pub fn parse(text: &str) -> Self {
        let mut evaluation = Self::default();
        let mut critique = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            let upper = trimmed.to_ascii_uppercase();
            if let Some(rest) = upper.strip_prefix("SCORE:") {
                if let Ok(score) = rest.trim().trim_end_matches('.').parse::<f64>() {
                    evaluation.score = Some(score.clamp(0.0, 1.0));
                }
                continue;
            }
            if upper.trim_end_matches(['.', '!']).trim_end() == "CONVERGED" {
                evaluation.converged = true;
                continue;
            }
            if !trimmed.is_empty() {
                critique.push(trimmed);
            }
        }

        evaluation.critique = critique.join("\n");
        evaluation
    }
}

/// Decides whether a loop-mode output needs another iteration.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, task: &str, output: &str) -> Result<Evaluation, InvocationError>;
}

/// Evaluator backed by a closure.
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&str, &str) -> Evaluation + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&str, &str) -> Evaluation + Send + Sync,
{
    async fn evaluate(&self, task: &str, output: &str) -> Result<Evaluation, InvocationError> {
        Ok((self.f)(task, output))
    }
}

/// Prompt asking an agent to grade `output` against `task`.
pub fn grading_prompt(task: &str, output: &str) -> String {
    format!(
        "Evaluate the following response to the task.\n\n\
         Task:\n{task}\n\n\
         Response:\n{output}\n\n\
         Reply with a line `SCORE: <number between 0 and 1>`. If no further \
         refinement is needed, add a line `CONVERGED`. Otherwise give a short \
         critique of what to improve."
    )
}

/// Prompt for the next loop iteration.
pub fn refinement_prompt(task: &str, previous: &str, critique: &str) -> String {
    let critique = if critique.trim().is_empty() {
        "No specific feedback; improve accuracy and completeness."
    } else {
        critique
    };
    format!(
        "Original request:\n{task}\n\n\
         Previous answer:\n{previous}\n\n\
         Reviewer feedback:\n{critique}\n\n\
         Revise the answer to address the feedback."
    )
}
