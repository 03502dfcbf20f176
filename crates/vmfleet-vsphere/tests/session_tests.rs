use std::sync::Arc;
use std::time::Duration;

use vmfleet_vsphere::simulated::{CountingAuthenticator, ScriptedTransport};
use vmfleet_vsphere::*;

fn config() -> ClientConfig {
    let mut c = ClientConfig::new("vc.lab.local", "administrator@vsphere.local", "pw");
    c.backoff_base_ms = 1;
    c.max_backoff_ms = 5;
    c.renew_margin_secs = 60;
    c
}

fn host_body() -> Result<RawResult, TransportError> {
    Ok(RawResult::success(
        OutputFormat::Json,
        r#"[{"host":"host-1","name":"esx01","connection_state":"CONNECTED"}]"#,
    ))
}

#[tokio::test]
async fn test_concurrent_calls_on_empty_slot_log_in_once() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    transport.set_fallback(host_body()).await;
    let auth = CountingAuthenticator::new();
    auth.set_delay(Duration::from_millis(50)).await;
    let client = Arc::new(VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap());

    let calls = (0..10).map(|_| {
        let client = client.clone();
        async move { client.host_info(None).await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(auth.logins(), 1);
    assert_eq!(transport.calls(), 10);
}

#[tokio::test]
async fn test_concurrent_calls_on_expired_credential_renew_once() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    transport.set_fallback(host_body()).await;
    let auth = CountingAuthenticator::new();
    // First session lives 1s, well inside the 60s renewal margin.
    auth.push_ttl(Duration::from_secs(1)).await;
    let client = Arc::new(VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap());
    client.connect().await.unwrap();
    assert_eq!(auth.logins(), 1);

    auth.set_delay(Duration::from_millis(50)).await;
    let calls = (0..12).map(|_| {
        let client = client.clone();
        async move { client.host_info(Some("esx01")).await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(auth.logins(), 2);
    // The renewed-away session-1 is logged out exactly once.
    assert_eq!(auth.logouts(), 1);
    let tokens: Vec<Option<String>> = transport
        .recorded()
        .await
        .into_iter()
        .map(|c| c.token)
        .collect();
    assert!(tokens.iter().all(|t| t.as_deref() == Some("session-2")));
}

#[tokio::test]
async fn test_rejected_token_triggers_one_relogin() {
    let transport = ScriptedTransport::new(OutputFormat::KeyValue);
    transport
        .push_err(TransportError::auth_expired("session not authenticated"))
        .await;
    transport.push_ok("Power on of web01 successful").await;
    let auth = CountingAuthenticator::new();
    let client = VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap();

    let ack = client.vm_power("web01", PowerAction::PowerOn).await.unwrap();
    assert_eq!(ack.action.as_deref(), Some("poweron"));
    assert_eq!(auth.logins(), 2);

    let tokens: Vec<Option<String>> = transport
        .recorded()
        .await
        .into_iter()
        .map(|c| c.token)
        .collect();
    assert_eq!(
        tokens,
        vec![Some("session-1".to_string()), Some("session-2".to_string())]
    );
}

#[tokio::test]
async fn test_second_token_rejection_surfaces_auth_error() {
    let transport = ScriptedTransport::new(OutputFormat::KeyValue);
    transport
        .set_fallback(Err(TransportError::auth_expired("session not authenticated")))
        .await;
    let auth = CountingAuthenticator::new();
    let client = VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap();

    let err = client.vm_info("web01").await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(transport.calls(), 2);
    assert_eq!(auth.logins(), 2);
}

#[tokio::test]
async fn test_bad_credentials_fail_before_transport() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let auth = CountingAuthenticator::new();
    auth.push_failure(TransportError::auth_rejected("invalid login"))
        .await;
    let client = VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap();

    let err = client.host_info(None).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(auth.logins(), 1);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_unreachable_endpoint_during_login_is_transient() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let auth = CountingAuthenticator::new();
    auth.push_failure(TransportError::not_sent("connection refused"))
        .await;
    auth.push_failure(TransportError::not_sent("connection refused"))
        .await;
    let client = VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap();

    // Two refusals, then the third login succeeds.
    client.connect().await.unwrap();
    assert_eq!(auth.logins(), 3);
    assert!(client.is_connected().await);

    let mut cfg = config();
    cfg.max_retries = 0;
    let auth = CountingAuthenticator::new();
    auth.push_failure(TransportError::not_sent("connection refused"))
        .await;
    let client = VmwareClient::new(cfg, transport, auth).unwrap();
    let err = client.connect().await.unwrap_err();
    assert!(err.is_transient());
    assert!(!err.is_ambiguous());
}

#[tokio::test]
async fn test_tokenless_credential_never_renews() {
    let transport = ScriptedTransport::new(OutputFormat::KeyValue);
    transport
        .set_fallback(Ok(RawResult::success(OutputFormat::KeyValue, "Name: esx01\n")))
        .await;
    let auth = CountingAuthenticator::tokenless();
    let client = VmwareClient::new(config(), transport.clone(), auth.clone()).unwrap();

    for _ in 0..3 {
        let hosts = client.host_info(None).await.unwrap();
        assert_eq!(hosts[0].name, "esx01");
    }
    assert_eq!(auth.logins(), 1);
    assert!(transport.recorded().await.iter().all(|c| c.token.is_none()));
}

#[tokio::test]
async fn test_disconnect_logs_out_and_clears() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let auth = CountingAuthenticator::new();
    let client = VmwareClient::new(config(), transport, auth.clone()).unwrap();

    assert!(!client.is_connected().await);
    client.connect().await.unwrap();
    assert!(client.is_connected().await);

    client.disconnect().await.unwrap();
    assert!(!client.is_connected().await);
    assert_eq!(auth.logouts(), 1);

    // Disconnecting twice is a no-op.
    client.disconnect().await.unwrap();
    assert_eq!(auth.logouts(), 1);
}

#[tokio::test]
async fn test_reconnect_logs_out_previous_session() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let auth = CountingAuthenticator::new();
    let client = VmwareClient::new(config(), transport, auth.clone()).unwrap();

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(auth.logins(), 2);
    assert_eq!(auth.logouts(), 1);

    // Tokenless grants hold nothing server-side to release.
    let transport = ScriptedTransport::new(OutputFormat::KeyValue);
    let auth = CountingAuthenticator::tokenless();
    let client = VmwareClient::new(config(), transport, auth.clone()).unwrap();
    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(auth.logouts(), 0);
}

#[test]
fn test_renew_margin_must_be_shorter_than_ttl() {
    let mut cfg = config();
    cfg.session_ttl_secs = 60;
    cfg.renew_margin_secs = 60;
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let err = match VmwareClient::new(cfg, transport, CountingAuthenticator::new()) {
        Ok(_) => panic!("a margin equal to the TTL must be rejected"),
        Err(e) => e,
    };
    assert_eq!(err.kind, VmwareErrorKind::Config);
    assert!(err.message.contains("renewMarginSecs"));
}

#[test]
fn test_config_safe_omits_password() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    let client = VmwareClient::new(config(), transport, CountingAuthenticator::new()).unwrap();
    let json = serde_json::to_string(&client.config_safe()).unwrap();
    assert!(json.contains("vc.lab.local"));
    assert!(!json.contains("\"pw\""));
}
