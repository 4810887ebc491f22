//! Coder specialist: code generation on the cheap-cloud tier.
//!
//! Non-JSON model output degrades to a raw-code result instead of failing;
//! generated code gets a syntax sanity check through the registry.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::base::{parse_json_response, AgentBehavior, AgentContext, AgentError};
use crate::bus::TaskSpec;
use crate::provider::ChatMessage;
use crate::tier::Tier;

const DEFAULT_MODEL: &str = "accounts/fireworks/models/llama-v3p1-70b-instruct";

/// Code-generation agent.
pub struct CoderAgent {
    tier: Tier,
    model: String,
}

impl Default for CoderAgent {
    fn default() -> Self {
        Self { tier: Tier::CloudCheap, model: DEFAULT_MODEL.to_string() }
    }
}

impl CoderAgent {
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

    fn code_prompt(instruction: &str, context: Option<&str>) -> String {
        let context_block = context
            .filter(|c| !c.is_empty())
            .map(|c| format!("Context: {}\n\n", c))
            .unwrap_or_default();
        format!(
            r#"Generate code for the following task:

Task: {instruction}

{context_block}Requirements:
1. Write clean, well-documented code
2. Add error handling
3. Keep functions focused and testable

Respond with JSON:
{{
  "code": "Generated code here",
  "explanation": "Brief explanation of the implementation",
  "dependencies": ["List of required packages"],
  "test_cases": ["Example test cases"]
}}

Response:"#
        )
    }
}

#[async_trait]
impl AgentBehavior for CoderAgent {
    fn agent_type(&self) -> &str {
        "coder"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["coding".to_string(), "code_generation".to_string()]
    }

    fn system_prompt(&self) -> String {
        "You are an expert software engineer.\n\n\
         Your role:\n\
         1. Generate clean, efficient, and maintainable code\n\
         2. Implement proper error handling\n\
         3. Consider edge cases and performance\n\n\
         Guidelines:\n\
         - Write self-documenting code\n\
         - Optimize for readability over cleverness\n\
         - Output valid JSON when requested"
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
        info!(agent = cx.agent_id(), instruction = %task.instruction, "coding task");

        let prompt = Self::code_prompt(&task.instruction, task.context.as_deref());
        let response = cx.call_llm(vec![ChatMessage::user(prompt)], 0.2, Some(2000), None).await?;

        let mut result = match parse_json_response(&response) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(agent = cx.agent_id(), "non-JSON response, returning raw code");
                json!({
                    "code": response,
                    "explanation": "Generated code (raw format)",
                })
            }
        };

        if let Some(code) = result.get("code").and_then(Value::as_str).map(str::to_string) {
            let check = cx.use_tool("check_syntax", json!({ "code": code })).await;
            let valid = check
                .as_ref()
                .and_then(|c| c.get("valid"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if let Some(object) = result.as_object_mut() {
                object.insert("syntax_valid".to_string(), json!(valid));
            }
            cx.remember("last_code", json!(code));
        }

        Ok(json!({
            "status": "success",
            "result": result,
            "coder": cx.agent_id(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_cheap_cloud() {
        let coder = CoderAgent::new();
        assert_eq!(coder.default_tier(), Tier::CloudCheap);
    }

    #[test]
    fn prompt_includes_context_when_present() {
        let with = CoderAgent::code_prompt("parse args", Some("CLI tool"));
        assert!(with.contains("Context: CLI tool"));
        let without = CoderAgent::code_prompt("parse args", None);
        assert!(!without.contains("Context:"));
    }
}
