//! Reviewer specialist: code quality review on the premium tier.
//!
//! Runs the built-in analyzers first and hands their findings to the model
//! alongside the code under review.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::base::{parse_json_response, AgentBehavior, AgentContext, AgentError};
use crate::bus::TaskSpec;
use crate::provider::ChatMessage;
use crate::tier::Tier;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Code-review agent.
pub struct ReviewerAgent {
    tier: Tier,
    model: String,
}

impl Default for ReviewerAgent {
    fn default() -> Self {
        Self { tier: Tier::Premium, model: DEFAULT_MODEL.to_string() }
    }
}

impl ReviewerAgent {
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

    fn review_prompt(code: &str, syntax: &Value, complexity: &Value, todos: &Value) -> String {
        format!(
            r#"Review the following code for quality, security, and best practices:

Code:
```
{code}
```

Analysis data:
- Syntax: {syntax}
- Complexity: {complexity}
- TODOs: {todos}

Provide a comprehensive review as JSON:
{{
  "overall_rating": "Excellent/Good/Fair/Poor",
  "score": 0,
  "strengths": ["List of strengths"],
  "issues": [
    {{
      "severity": "critical/major/minor",
      "category": "security/performance/style/documentation",
      "description": "Issue description",
      "suggestion": "How to fix"
    }}
  ],
  "suggestions": ["List of improvement suggestions"],
  "approved": false
}}

Review:"#
        )
    }
}

#[async_trait]
impl AgentBehavior for ReviewerAgent {
    fn agent_type(&self) -> &str {
        "reviewer"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["review".to_string(), "quality_assurance".to_string()]
    }

    fn system_prompt(&self) -> String {
        "You are an expert code reviewer.\n\n\
         Your role:\n\
         1. Analyze code for correctness, efficiency, and maintainability\n\
         2. Identify security vulnerabilities and potential bugs\n\
         3. Provide constructive, actionable feedback\n\
         4. Rate code quality objectively\n\n\
         Guidelines:\n\
         - Be thorough but constructive\n\
         - Prioritize issues by severity\n\
         - Suggest concrete improvements\n\
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
        let Some(code) = task.data.get("code").and_then(Value::as_str).map(str::to_string) else {
            return Err(AgentError::MissingInput("code".to_string()));
        };
        info!(agent = cx.agent_id(), chars = code.len(), "reviewing code");

        let syntax = cx.use_tool("check_syntax", json!({ "code": code })).await.unwrap_or(Value::Null);
        let complexity =
            cx.use_tool("estimate_complexity", json!({ "code": code })).await.unwrap_or(Value::Null);
        let todos = cx.use_tool("extract_todos", json!({ "code": code })).await.unwrap_or(Value::Null);

        let prompt = Self::review_prompt(&code, &syntax, &complexity, &todos);
        let response = cx.call_llm(vec![ChatMessage::user(prompt)], 0.1, Some(1500), None).await?;

        match parse_json_response(&response) {
            Ok(review) => {
                cx.remember("last_review", review.clone());
                Ok(json!({
                    "status": "success",
                    "review": review,
                    "analysis": {
                        "syntax": syntax,
                        "complexity": complexity,
                        "todo_count": todos.as_array().map(Vec::len).unwrap_or(0),
                    },
                    "reviewer": cx.agent_id(),
                }))
            }
            Err(_) => Ok(json!({
                "status": "error",
                "error": "failed to parse review",
                "raw_response": response,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_premium() {
        let reviewer = ReviewerAgent::new();
        assert_eq!(reviewer.default_tier(), Tier::Premium);
    }

    #[test]
    fn review_prompt_embeds_analysis() {
        let prompt = ReviewerAgent::review_prompt(
            "fn main() {}",
            &json!({"valid": true}),
            &json!({"score": 1}),
            &json!([]),
        );
        assert!(prompt.contains("fn main() {}"));
        assert!(prompt.contains("\"valid\":true") || prompt.contains("valid"));
    }
}
