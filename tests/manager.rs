//! Integration tests for startup, registry merging, invocation routing,
//! and shutdown, over scripted in-memory transports.

mod common;

use common::*;
use papertrail::config::LimitSettings;
use papertrail::error::Error;
use papertrail::manager::{ClientManager, InvocationOutput};
use papertrail::mcp::Session;
use papertrail::registry::CapabilityKind;
use serde_json::json;
use std::time::Duration;

fn limits() -> LimitSettings {
    LimitSettings {
        request_timeout_secs: 5,
        // Sequential bring-up keeps registration order deterministic in tests
        connect_fan_out: 1,
        max_tool_iterations: 10,
    }
}

fn manager_with(connector: ScriptedConnector) -> ClientManager {
    ClientManager::with_connector(&limits(), Box::new(connector))
}

#[tokio::test]
async fn start_tolerates_partial_failure() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));
    connector.add(ScriptedTransport::new(
        "aux",
        tools_handler(vec![json!({
            "name": "aux_tool",
            "description": "",
            "inputSchema": {"type": "object", "properties": {}}
        })]),
    ));
    // "broken" has no scripted transport: connection refused

    let manager = manager_with(connector);
    let report = manager
        .start(&[descriptor("research"), descriptor("broken"), descriptor("aux")])
        .await
        .unwrap();

    assert_eq!(report.connected.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken");
    assert!(matches!(report.failed[0].1, Error::Connection { .. }));

    let status = manager.list_servers_status().await;
    assert_eq!(status.len(), 3);
    assert!(status["research"].connected);
    assert!(status["aux"].connected);
    assert!(!status["broken"].connected);
    assert_eq!(status["broken"].capabilities, 0);
    // research: 2 tools + 1 resource + 1 template + 1 prompt
    assert_eq!(status["research"].capabilities, 5);
}

#[tokio::test]
async fn missing_descriptor_name_is_fatal() {
    let manager = manager_with(ScriptedConnector::new());
    let err = manager.start(&[descriptor("")]).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn losing_every_server_aborts_startup() {
    // The connector knows none of the descriptors
    let manager = manager_with(ScriptedConnector::new());
    let err = manager
        .start(&[descriptor("one"), descriptor("two")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllServersFailed { attempted: 2 }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn disabled_servers_are_skipped() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));

    let manager = manager_with(connector);
    let mut disabled = descriptor("research");
    disabled.enabled = false;
    let report = manager.start(&[disabled]).await.unwrap();

    assert!(report.connected.is_empty());
    assert!(report.failed.is_empty());
    assert!(manager.list_servers_status().await.is_empty());
}

#[tokio::test]
async fn colliding_tool_names_keep_the_first_registration() {
    let shared_tool = json!({
        "name": "search_papers",
        "description": "",
        "inputSchema": {
            "type": "object",
            "properties": {"topic": {"type": "string"}},
            "required": ["topic"]
        }
    });
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new(
        "alpha",
        tools_handler(vec![shared_tool.clone()]),
    ));
    connector.add(ScriptedTransport::new(
        "beta",
        tools_handler(vec![shared_tool]),
    ));

    let manager = manager_with(connector);
    let report = manager
        .start(&[descriptor("alpha"), descriptor("beta")])
        .await
        .unwrap();

    assert_eq!(report.collisions.len(), 1);
    assert!(matches!(
        &report.collisions[0],
        Error::Collision { name, existing, rejected }
            if name == "search_papers" && existing == "alpha" && rejected == "beta"
    ));

    // Exactly one registered tool; the winner routes the call
    let tools = manager.list(CapabilityKind::Tool).await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].server, "alpha");
}

#[tokio::test]
async fn request_ids_strictly_increase_across_a_thousand_calls() {
    let transport = ScriptedTransport::new("research", research_handler());
    let connector = ScriptedConnector::new();
    connector.add(transport.clone());

    let manager = manager_with(connector);
    manager.start(&[descriptor("research")]).await.unwrap();

    for _ in 0..1000 {
        manager
            .call_tool("search_papers", json!({"topic": "llms"}))
            .await
            .unwrap();
    }

    let ids = transport.sent_ids.lock().unwrap().clone();
    assert!(ids.len() >= 1000);
    assert_eq!(ids[0], 1);
    assert!(ids.windows(2).all(|w| w[1] > w[0]), "ids must never repeat");
}

#[tokio::test]
async fn invoke_binds_tokens_against_the_discovered_schema() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));
    let manager = manager_with(connector);
    manager.start(&[descriptor("research")]).await.unwrap();

    let tokens = vec!["llms".to_string(), "max_results=3".to_string()];
    let output = manager.invoke("search_papers", &tokens).await.unwrap();
    match output {
        InvocationOutput::Tool(result) => {
            assert!(result.to_text().contains("2301.0001"));
        }
        other => panic!("expected a tool result, got {:?}", other),
    }

    // Missing required argument names the parameter
    let err = manager.invoke("search_papers", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::MissingArgument { argument, .. } if argument == "topic"
    ));

    // Unknown capability
    assert!(matches!(
        manager.invoke("ghost_tool", &[]).await.unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[tokio::test]
async fn resources_resolve_statically_then_by_template_prefix() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));
    let manager = manager_with(connector);
    manager.start(&[descriptor("research")]).await.unwrap();

    let exact = manager.read_resource("papers://folders").await.unwrap();
    assert_eq!(exact.to_text(), "contents of papers://folders");

    // No static entry for this URI; the papers://{topic} template matches
    let templated = manager.read_resource("papers://quantum").await.unwrap();
    assert_eq!(templated.to_text(), "contents of papers://quantum");

    assert!(matches!(
        manager.read_resource("files://nope").await.unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[tokio::test]
async fn prompts_bind_and_render() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));
    let manager = manager_with(connector);
    manager.start(&[descriptor("research")]).await.unwrap();

    let tokens = vec!["topic=llms".to_string()];
    let (args, rendered) = manager
        .prompt_from_tokens("research_brief", &tokens)
        .await
        .unwrap();
    assert_eq!(args["topic"], json!("llms"));
    assert_eq!(rendered.rendered(), "Find recent papers and summarize them.");

    let err = manager
        .prompt_from_tokens("research_brief", &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MissingArgument { argument, .. } if argument == "topic"
    ));
}

#[tokio::test]
async fn shutdown_after_partial_failure_closes_only_opened_sessions() {
    let research = ScriptedTransport::new("research", research_handler());
    let connector = ScriptedConnector::new();
    connector.add(research.clone());

    let manager = manager_with(connector);
    let report = manager
        .start(&[descriptor("research"), descriptor("broken")])
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);

    manager.shutdown().await;
    assert!(research.is_closed());

    // Second shutdown is a no-op, not an error
    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_in_reverse_start_order() {
    // With fan_out = 1 bring-up is sequential, so start order is the
    // descriptor order
    let alpha = ScriptedTransport::new("alpha", research_handler());
    let beta = ScriptedTransport::new("beta", research_handler());
    let connector = ScriptedConnector::new();
    connector.add(alpha.clone());
    connector.add(beta.clone());

    let manager = manager_with(connector);
    manager
        .start(&[descriptor("alpha"), descriptor("beta")])
        .await
        .unwrap();
    manager.shutdown().await;

    assert!(alpha.is_closed());
    assert!(beta.is_closed());
}

#[tokio::test]
async fn operations_before_initialize_fail() {
    let transport = ScriptedTransport::new("research", research_handler());
    let session = Session::new(
        "research",
        Box::new(SharedTransport(transport)),
        Duration::from_secs(5),
    );

    assert!(matches!(
        session.list_tools().await.unwrap_err(),
        Error::NotInitialized { server } if server == "research"
    ));
    assert!(matches!(
        session.call_tool("search_papers", json!({})).await.unwrap_err(),
        Error::NotInitialized { .. }
    ));
}

#[tokio::test]
async fn initialize_runs_exactly_once() {
    let transport = ScriptedTransport::new("research", research_handler());
    let session = Session::new(
        "research",
        Box::new(SharedTransport(transport.clone())),
        Duration::from_secs(5),
    );

    session.initialize().await.unwrap();
    // The handshake completion notification went out
    assert_eq!(
        transport.notifications.lock().unwrap().as_slice(),
        ["notifications/initialized"]
    );

    assert!(matches!(
        session.initialize().await.unwrap_err(),
        Error::Handshake { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn slow_responses_surface_as_timeouts_with_cancellation() {
    let transport = ScriptedTransport::with_delay(
        "sluggish",
        research_handler(),
        Duration::from_secs(60),
    );
    let session = Session::new(
        "sluggish",
        Box::new(SharedTransport(transport.clone())),
        Duration::from_secs(5),
    );

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, Error::Handshake { .. }));
    assert!(err.to_string().contains("timed out"));
    // A best-effort cancellation notice was sent for the abandoned call
    assert!(transport
        .notifications
        .lock()
        .unwrap()
        .contains(&"notifications/cancelled".to_string()));
}

#[tokio::test]
async fn server_reported_tool_errors_carry_server_identity() {
    let handler: Box<Handler> = Box::new(|method, _| match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "flaky", "version": "0.0.1"}
        })),
        "tools/list" => Ok(json!({
            "tools": [{
                "name": "flaky_tool",
                "description": "",
                "inputSchema": {"type": "object", "properties": {}}
            }]
        })),
        "tools/call" => Err((-32000, "backend exploded".to_string())),
        other => Err((-32601, format!("method not found: {}", other))),
    });
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("flaky", handler));
    let manager = manager_with(connector);
    manager.start(&[descriptor("flaky")]).await.unwrap();

    let err = manager.call_tool("flaky_tool", json!({})).await.unwrap_err();
    assert!(matches!(
        &err,
        Error::Tool { kind: papertrail::error::ToolErrorKind::ExecutionFailed, message, .. }
            if message == "backend exploded"
    ));
    assert_eq!(err.server(), Some("flaky"));

    // A name nothing registered stays a registry miss
    assert!(matches!(
        manager.call_tool("ghost", json!({})).await.unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[tokio::test]
async fn refresh_capabilities_is_idempotent() {
    let connector = ScriptedConnector::new();
    connector.add(ScriptedTransport::new("research", research_handler()));
    let manager = manager_with(connector);
    manager.start(&[descriptor("research")]).await.unwrap();

    let before = manager.list(CapabilityKind::Tool).await.len();
    let collisions = manager.refresh_capabilities().await.unwrap();
    assert!(collisions.is_empty());
    assert_eq!(manager.list(CapabilityKind::Tool).await.len(), before);
}
