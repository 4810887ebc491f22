//! Planner specialist: decomposes an instruction into an executable plan.
//!
//! Runs on the premium tier; a plan is worth the tokens.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::base::{parse_json_response, AgentBehavior, AgentContext, AgentError};
use crate::bus::TaskSpec;
use crate::provider::ChatMessage;
use crate::tier::Tier;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Task-decomposition agent.
pub struct PlannerAgent {
    tier: Tier,
    model: String,
}

impl Default for PlannerAgent {
    fn default() -> Self {
        Self { tier: Tier::Premium, model: DEFAULT_MODEL.to_string() }
    }
}

impl PlannerAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    fn plan_prompt(instruction: &str) -> String {
        format!(
            r#"Break down the following task into concrete, actionable steps:

Task: {instruction}

Respond with a JSON object containing:
{{
  "summary": "Brief summary of the plan",
  "steps": [
    {{
      "step_number": 1,
      "action": "Specific action to take",
      "agent": "Which agent should handle this (coder/reviewer)",
      "dependencies": []
    }}
  ],
  "estimated_time": "Estimated completion time"
}}

Plan:"#
        )
    }
}

#[async_trait]
impl AgentBehavior for PlannerAgent {
    fn agent_type(&self) -> &str {
        "planner"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["planning".to_string(), "task_decomposition".to_string()]
    }

    fn system_prompt(&self) -> String {
        "You are an expert task planner.\n\n\
         Your role:\n\
         1. Analyze complex tasks and break them down into clear, actionable steps\n\
         2. Identify dependencies between steps\n\
         3. Assign steps to the appropriate specialist agent (coder, reviewer)\n\
         4. Estimate time requirements\n\n\
         Guidelines:\n\
         - Be specific and concrete in step descriptions\n\
         - Keep steps focused and single-purpose\n\
         - Always output valid JSON"
            .to_string()
    }

    fn default_tier(&self) -> Tier {
        self.tier
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }

    async fn process_task(&self, task: TaskSpec, cx: &AgentContext) -> Result<Value, AgentError> {
        if task.instruction.is_empty() {
            return Err(AgentError::MissingInput("instruction".to_string()));
        }
        info!(agent = cx.agent_id(), instruction = %task.instruction, "planning task");

        let response = cx
            .call_llm(
                vec![ChatMessage::user(Self::plan_prompt(&task.instruction))],
                0.3,
                Some(1000),
                None,
            )
            .await?;

        match parse_json_response(&response) {
            Ok(plan) => {
                cx.remember("last_plan", plan.clone());
                Ok(json!({
                    "status": "success",
                    "plan": plan,
                    "planner": cx.agent_id(),
                }))
            }
            Err(_) => Ok(json!({
                "status": "error",
                "error": "failed to parse plan",
                "raw_response": response,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_premium_tier() {
        let planner = PlannerAgent::new();
        assert_eq!(planner.default_tier(), Tier::Premium);
        assert_eq!(planner.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn prompt_embeds_instruction() {
        let prompt = PlannerAgent::plan_prompt("ship the feature");
        assert!(prompt.contains("ship the feature"));
        assert!(prompt.contains("step_number"));
    }
}
