use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vmfleet_vsphere::catalog::{OperationSpec, ParamKind};
use vmfleet_vsphere::simulated::{CountingAuthenticator, ScriptedTransport};
use vmfleet_vsphere::*;

fn config() -> ClientConfig {
    let mut c = ClientConfig::new("vc.lab.local", "administrator@vsphere.local", "pw");
    c.max_retries = 3;
    c.backoff_base_ms = 1;
    c.max_backoff_ms = 5;
    c
}

fn client_with(format: OutputFormat) -> (VmwareClient, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new(format);
    let client = VmwareClient::new(config(), transport.clone(), CountingAuthenticator::new()).unwrap();
    (client, transport)
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A value that passes the field's own checks.
fn valid_value(spec: &OperationSpec, name: &str) -> String {
    let param = spec.param(name).unwrap();
    match (param.allowed, param.kind) {
        (Some(allowed), _) => allowed[0].to_string(),
        (None, ParamKind::Integer) => "1".to_string(),
        (None, ParamKind::Flag) => "true".to_string(),
        (None, ParamKind::Text) => format!("{name}-value"),
    }
}

// ── Validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_required_field_never_reaches_transport() {
    let (client, transport) = client_with(OutputFormat::KeyValue);

    for spec in client.catalog().operations() {
        let required: Vec<&str> = spec
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        for dropped in &required {
            let map: HashMap<String, String> = required
                .iter()
                .filter(|name| *name != dropped)
                .map(|name| (name.to_string(), valid_value(spec, name)))
                .collect();
            let err = client.invoke(spec.name, &map).await.unwrap_err();
            assert!(err.is_validation(), "{} without {dropped}: {err}", spec.name);
            assert!(err.message.contains(dropped), "{}: {}", spec.name, err.message);
        }
    }
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_out_of_set_value_rejected() {
    let (client, transport) = client_with(OutputFormat::KeyValue);

    let mut checked = 0;
    for spec in client.catalog().operations() {
        for param in spec.params.iter().filter(|p| p.allowed.is_some()) {
            let mut map: HashMap<String, String> = spec
                .params
                .iter()
                .filter(|p| p.required)
                .map(|p| (p.name.to_string(), valid_value(spec, p.name)))
                .collect();
            map.insert(param.name.to_string(), "definitely-not-allowed".to_string());
            let err = client.invoke(spec.name, &map).await.unwrap_err();
            assert!(err.is_validation(), "{} / {}", spec.name, param.name);
            checked += 1;
        }
    }
    // One per choice field across the builtin catalog.
    assert_eq!(checked, 14);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_unknown_field_and_operation() {
    let (client, transport) = client_with(OutputFormat::KeyValue);

    let err = client
        .invoke("vm.info", &params(&[("vmname", "web01"), ("vmnmae", "web02")]))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = client.invoke("vm.teleport", &HashMap::new()).await.unwrap_err();
    assert_eq!(err.kind, VmwareErrorKind::UnknownOperation);
    assert_eq!(transport.calls(), 0);
}

// ── Retry policy ────────────────────────────────────────────────────

#[tokio::test]
async fn test_idempotent_query_retried_until_success() {
    let (client, transport) = client_with(OutputFormat::Json);
    transport.push_err(TransportError::not_sent("connection refused")).await;
    transport.push_err(TransportError::ambiguous("read timed out")).await;
    transport
        .push_err(TransportError::from_status(503, "service unavailable"))
        .await;
    transport
        .push_ok(r#"{"value":[{"host":"host-12","name":"esx01.lab","connection_state":"CONNECTED"}]}"#)
        .await;

    let hosts = client.host_info(None).await.unwrap();
    assert_eq!(transport.calls(), 4);
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].name, "esx01.lab");
    assert_eq!(hosts[0].id.as_deref(), Some("host-12"));
    assert_eq!(hosts[0].connection_state, HostConnectionState::Connected);
}

#[tokio::test]
async fn test_idempotent_query_gives_up_after_budget() {
    let (client, transport) = client_with(OutputFormat::Json);
    transport
        .set_fallback(Err(TransportError::not_sent("connection refused")))
        .await;

    let err = client.host_info(Some("esx01")).await.unwrap_err();
    assert_eq!(transport.calls(), 4);
    assert_eq!(
        err.kind,
        VmwareErrorKind::Transient {
            ambiguous: false,
            attempts: 4
        }
    );
}

#[tokio::test]
async fn test_non_idempotent_ambiguous_failure_not_retried() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport
        .push_err(TransportError::ambiguous("connection reset after send"))
        .await;
    transport.push_ok("Operation :: power on VM web01 successful").await;

    let err = client
        .vm_power("web01", PowerAction::PowerOn)
        .await
        .unwrap_err();
    assert_eq!(transport.calls(), 1);
    assert!(err.is_transient());
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn test_non_idempotent_timeout_is_ambiguous() {
    let transport = ScriptedTransport::new(OutputFormat::KeyValue);
    transport.set_delay(Duration::from_secs(3)).await;
    transport.set_fallback(Ok(RawResult::success(OutputFormat::KeyValue, "ok"))).await;
    let mut cfg = config();
    cfg.timeout_secs = 1;
    let client = VmwareClient::new(cfg, transport.clone(), CountingAuthenticator::new()).unwrap();

    let err = client
        .clone_vm("web01", "esx01", "web01-copy", None)
        .await
        .unwrap_err();
    assert_eq!(transport.calls(), 1);
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn test_non_idempotent_not_sent_retried_once() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport.push_err(TransportError::not_sent("connection refused")).await;
    transport.push_ok("Clone of web01 successful").await;

    let ack = client
        .clone_vm("web01", "esx01", "web01-copy", Some("ds-fast"))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(ack.operation, "vm.clone");
    assert_eq!(ack.detail.as_deref(), Some("Clone of web01 successful"));

    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport
        .set_fallback(Err(TransportError::not_sent("connection refused")))
        .await;
    let err = client
        .vm_power("web01", PowerAction::Reset)
        .await
        .unwrap_err();
    assert_eq!(transport.calls(), 2);
    assert!(err.is_transient());
    assert!(!err.is_ambiguous());
}

#[tokio::test]
async fn test_permanent_rejection_surfaces_immediately() {
    let (client, transport) = client_with(OutputFormat::Json);
    transport
        .push_err(TransportError::from_status(404, r#"{"error_type":"NOT_FOUND"}"#))
        .await;

    let err = client.vm_info("web09").await.unwrap_err();
    assert_eq!(transport.calls(), 1);
    assert!(err.is_permanent());
    assert!(err.diagnostic.unwrap().contains("NOT_FOUND"));
}

// ── Parsing through the pipeline ────────────────────────────────────

#[tokio::test]
async fn test_vm_name_round_trips_through_key_value_output() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport
        .push_ok(
            "Information of Virtual Machine web01\n\n\
             Name:  web01\n\
             No. of CPU(s):  2\n\
             Memory Size:  4096 MB\n\
             Power State:  poweredOn\n\
             Guest Full Name:  Ubuntu Linux (64-bit)\n",
        )
        .await;

    let vms = client.vm_info("web01").await.unwrap();
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].name, "web01");
    assert_eq!(vms[0].power_state, VmPowerState::PoweredOn);
    assert_eq!(vms[0].memory_size_mib, Some(4096));

    let recorded = transport.recorded().await;
    assert_eq!(recorded[0].operation, "vm.info");
    assert_eq!(recorded[0].args, vec!["--vmname", "web01"]);
}

#[tokio::test]
async fn test_vm_name_round_trips_through_json_output() {
    let (client, transport) = client_with(OutputFormat::Json);
    transport
        .push_ok(r#"[{"vm":"vm-42","name":"web01","power_state":"POWERED_OFF","cpu_count":4}]"#)
        .await;

    let vms = client.vm_info("web01").await.unwrap();
    assert_eq!(vms[0].name, "web01");
    assert_eq!(vms[0].id.as_deref(), Some("vm-42"));
    assert_eq!(vms[0].power_state, VmPowerState::PoweredOff);
    assert_eq!(vms[0].cpu_count, Some(4));
}

#[tokio::test]
async fn test_empty_snapshot_list_is_empty_not_error() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport.push_ok("").await;
    assert!(client.snapshots("web01").await.unwrap().is_empty());

    let (client, transport) = client_with(OutputFormat::Json);
    transport.push_ok("[]").await;
    assert!(client.snapshots("web01").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_execution_is_parse_error_with_diagnostic() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport
        .push_raw(RawResult::failed(
            OutputFormat::KeyValue,
            255,
            "Virtual Machine web09 not found.",
        ))
        .await;

    let err = client.snapshots("web09").await.unwrap_err();
    assert!(err.is_parse());
    assert!(err.message.starts_with("vm.snapshot"));
    assert_eq!(err.diagnostic.as_deref(), Some("Virtual Machine web09 not found."));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_about_and_performance_typed_methods() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport
        .push_ok("Product Name: VMware vCenter Server\nVersion: 8.0.2\nBuild: 22385739\n")
        .await;
    let about = client.about(AboutService::All).await.unwrap();
    assert_eq!(about.version.as_deref(), Some("8.0.2"));
    assert_eq!(transport.recorded().await[0].args, vec!["--aboutservice", "all"]);

    let (client, transport) = client_with(OutputFormat::Json);
    transport
        .push_ok(r#"[{"counter":"cpu.usage.average","unit":"%","value":12.5}]"#)
        .await;
    let samples = client
        .performance(
            "esx01",
            CounterType::Cpu,
            &PerformanceQuery {
                samples: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(samples[0].counter, "cpu.usage.average");
    assert_eq!(
        transport.recorded().await[0].args,
        vec!["--host", "esx01", "--countertype", "cpu", "--samples", "3"]
    );
}

#[tokio::test]
async fn test_host_secret_kept_out_of_argv() {
    let (client, transport) = client_with(OutputFormat::KeyValue);
    transport.push_ok("Host esx05 added to cluster prod").await;

    let options = HostOpOptions {
        cluster: Some("prod".into()),
        username: Some("root".into()),
        password: Some("t0ps3cret".into()),
        ..Default::default()
    };
    let ack = client
        .host_operation("esx05", HostAction::AddHost, &options)
        .await
        .unwrap();
    assert_eq!(ack.action.as_deref(), Some("addhost"));
    let recorded = &transport.recorded().await[0];
    assert!(!recorded.args.iter().any(|a| a.contains("t0ps3cret")));
    assert!(recorded.args.contains(&"root".to_string()));
    assert_eq!(recorded.secret_env, vec!["VI_TARGET_PASSWORD"]);
}

// ── Transport selection ─────────────────────────────────────────────

#[tokio::test]
async fn test_rest_unsupported_operation_costs_nothing() {
    let client = VmwareClient::from_config(config()).unwrap();
    let err = client.create_vms("/tmp/vms.xml", None).await.unwrap_err();
    assert_eq!(err.kind, VmwareErrorKind::Unsupported);
    assert!(!client.is_connected().await);
}

// ── Concurrency cap ─────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_calls_capped() {
    let transport = ScriptedTransport::new(OutputFormat::Json);
    transport.set_delay(Duration::from_millis(30)).await;
    transport.set_fallback(Ok(RawResult::success(OutputFormat::Json, "[]"))).await;
    let mut cfg = config();
    cfg.max_concurrent = 2;
    let client = Arc::new(
        VmwareClient::new(cfg, transport.clone(), CountingAuthenticator::new()).unwrap(),
    );

    let calls = (0..8).map(|_| {
        let client = client.clone();
        async move { client.browse_datastores(None, None).await }
    });
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|v| v.is_empty())));
    assert_eq!(transport.calls(), 8);
    assert!(transport.peak_in_flight() <= 2);
}
