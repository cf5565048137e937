//! loop: generate, evaluate, refine until convergence or the iteration cap.

use conclave_agent::AgentHandle;
use conclave_core::Result;
use conclave_core::error::{InvocationError, OrchestrationError};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::evaluator::{Evaluation, Evaluator, grading_prompt, refinement_prompt};
use crate::options::ProcessOptions;
use crate::orchestrator::Orchestrator;

/// Who decides convergence for this request.
enum Grader<'a> {
    Custom(&'a dyn Evaluator),
    Agent(Arc<AgentHandle>),
}

/// Whether an output scored `score` should replace the current best.
///
/// Scored beats unscored, a higher score wins, and ties go to the later
/// output.
fn improves(best: Option<Option<f64>>, score: Option<f64>) -> bool {
    match (best, score) {
        (None, _) | (Some(None), _) => true,
        (Some(Some(_)), None) => false,
        (Some(Some(best)), Some(score)) => score >= best,
    }
}

impl Orchestrator {
    pub(crate) async fn run_loop(
        &self,
        ctx: &mut ExecutionContext,
        options: &ProcessOptions,
    ) -> Result<()> {
        let Some(primary) = ctx.agents.first().cloned() else {
            return Err(OrchestrationError::NoAgents.into());
        };
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.config.loop_max_iterations)
            .max(1);
        let threshold = self.config.convergence_threshold;

        let grader = match &self.evaluator {
            Some(evaluator) => Grader::Custom(evaluator.as_ref()),
            None => {
                let id = options.evaluator_agent.as_ref().unwrap_or(primary.id());
                Grader::Agent(self.registry.get(id)?)
            }
        };

        let mut best: Option<(String, Option<f64>)> = None;
        let mut prompt = ctx.input.clone();

        for iteration in 1..=max_iterations {
            ctx.iterations = iteration;
            let step = format!("iteration:{iteration}");

            let output = match self.invoke_agent(ctx, &primary, &prompt, step.clone()).await {
                Ok(outcome) => outcome.output,
                Err(cause) => return Err(Self::loop_failure(ctx, iteration, cause)),
            };
            self.record_output(ctx, primary.id(), &output, &step)?;

            let evaluation = match self.grade(ctx, &grader, iteration, &output).await {
                Ok(evaluation) => evaluation,
                Err(cause) => return Err(Self::loop_failure(ctx, iteration, cause)),
            };
            debug!(
                iteration,
                converged = evaluation.converged,
                score = ?evaluation.score,
                "Iteration evaluated"
            );

            if evaluation.is_converged(threshold) {
                info!(iteration, score = ?evaluation.score, "Loop converged");
                ctx.output = output;
                ctx.converged = true;
                ctx.score = evaluation.score;
                return Ok(());
            }

            prompt = refinement_prompt(&ctx.input, &output, &evaluation.critique);
            if improves(best.as_ref().map(|(_, s)| *s), evaluation.score) {
                best = Some((output, evaluation.score));
            }
        }

        let (best_output, best_score) = best.unwrap_or_default();
        info!(iterations = max_iterations, best_score = ?best_score, "Loop did not converge");
        Err(OrchestrationError::NotConverged {
            iterations: max_iterations,
            best_output,
            best_score,
        }
        .into())
    }

    async fn grade(
        &self,
        ctx: &ExecutionContext,
        grader: &Grader<'_>,
        iteration: usize,
        output: &str,
    ) -> std::result::Result<Evaluation, InvocationError> {
        match grader {
            Grader::Custom(evaluator) => evaluator.evaluate(&ctx.input, output).await,
            Grader::Agent(handle) => {
                let reply = self
                    .invoke_agent(
                        ctx,
                        handle,
                        &grading_prompt(&ctx.input, output),
                        format!("evaluate:{iteration}"),
                    )
                    .await?;
                Ok(Evaluation::parse(&reply.output))
            }
        }
    }

    fn loop_failure(
        ctx: &ExecutionContext,
        iteration: usize,
        cause: InvocationError,
    ) -> conclave_core::Error {
        OrchestrationError::PartialPipelineFailure {
            failed_stage: iteration - 1,
            cause,
            completed: ctx.outputs.clone(),
        }
        .into()
    }
}
