//! Tool registry integration tests: timeouts, the rate-limit boundary,
//! and schema emission.

mod init_logging;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strata::tools::{
    FnHandler, ParamType, ToolContext, ToolHandler, ToolParameter, ToolRegistry, ToolSpec,
};

/// **Scenario**: a tool with a 1-second timeout whose handler sleeps 5
/// seconds fails with a timeout error; the reported execution time is
/// about one second, not five.
#[tokio::test]
async fn slow_tool_times_out_at_deadline() {
    let registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("slow", "sleeps too long").timeout(Duration::from_secs(1)),
        FnHandler::new(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("never"))
        }),
    );

    let result = registry.execute("slow", json!({}), None).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("timeout"));
    assert!(result.execution_time >= Duration::from_secs(1));
    assert!(result.execution_time < Duration::from_secs(2));
}

/// **Scenario**: rate-limit boundary: with rate 120/min (500 ms apart),
/// a call right after a success is rejected, and a call at least the
/// minimum interval later is accepted.
#[tokio::test]
async fn successful_calls_separated_by_minimum_interval() {
    let registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("metered", "rate limited").rate_limit(120),
        FnHandler::new(|_| async { Ok(json!("ok")) }),
    );

    assert!(registry.execute("metered", json!({}), None).await.success);
    let rejected = registry.execute("metered", json!({}), None).await;
    assert!(!rejected.success);
    assert!(rejected.error.as_deref().unwrap().contains("rate limit exceeded"));

    tokio::time::sleep(Duration::from_millis(520)).await;
    assert!(registry.execute("metered", json!({}), None).await.success);
}

/// **Scenario**: the emitted schema round-trips every declared parameter
/// attribute (type, description, enum, default, requiredness).
#[tokio::test]
async fn schema_round_trips_parameter_metadata() {
    let registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("lookup", "Look up a record")
            .category("data")
            .parameter(ToolParameter::required("id", ParamType::String, "Record id"))
            .parameter(
                ToolParameter::optional("format", ParamType::String, "Output format", Some(json!("json")))
                    .with_choices(vec![json!("json"), json!("text")]),
            )
            .parameter(ToolParameter::optional("limit", ParamType::Integer, "Row cap", None)),
        FnHandler::new(|_| async { Ok(json!(null)) }),
    );

    let schema = registry.schema("lookup").unwrap();
    assert_eq!(schema["name"], "lookup");
    assert_eq!(schema["description"], "Look up a record");
    assert_eq!(schema["parameters"]["required"], json!(["id"]));
    let format = &schema["parameters"]["properties"]["format"];
    assert_eq!(format["type"], "string");
    assert_eq!(format["enum"], json!(["json", "text"]));
    assert_eq!(format["default"], "json");
    assert!(schema["parameters"]["properties"]["limit"].get("enum").is_none());

    assert_eq!(registry.all_schemas().len(), 1);
}

/// **Scenario**: a handler that reads the call context sees the caller
/// identity the registry was handed.
#[tokio::test]
async fn context_reaches_handler() {
    struct WhoAmI;

    #[async_trait::async_trait]
    impl ToolHandler for WhoAmI {
        async fn call(
            &self,
            _params: serde_json::Value,
            ctx: Option<&ToolContext>,
        ) -> Result<serde_json::Value, strata::tools::ToolError> {
            Ok(json!(ctx.and_then(|c| c.user_id.clone())))
        }
    }

    let registry = ToolRegistry::new();
    registry.register(ToolSpec::new("whoami", "caller identity"), Arc::new(WhoAmI));

    let ctx = ToolContext { user_id: Some("agent-7".to_string()), data: Default::default() };
    let result = registry.execute("whoami", json!({}), Some(&ctx)).await;
    assert_eq!(result.output, Some(json!("agent-7")));
}

/// **Scenario**: listing filters by category; unregistering removes the
/// tool from listings and execution.
#[tokio::test]
async fn list_filter_and_unregister() {
    let registry = ToolRegistry::new();
    registry.register(ToolSpec::new("a", "x").category("math"), FnHandler::new(|_| async { Ok(json!(1)) }));
    registry.register(ToolSpec::new("b", "y").category("search"), FnHandler::new(|_| async { Ok(json!(2)) }));

    assert_eq!(registry.list(Some("math"), None).len(), 1);
    assert_eq!(registry.list(None, None).len(), 2);

    registry.unregister("a");
    assert!(registry.get("a").is_none());
    let gone = registry.execute("a", json!({}), None).await;
    assert!(!gone.success);
}
