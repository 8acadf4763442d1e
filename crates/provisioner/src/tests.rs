//! State machine tests driving [`ProvisionerState`] event by event.

use crate::{FieldScorer, ProvisionerConfig, ProvisionerState};
use fleet_core::{
    Action, CorrelationId, Event, FailureKind, Operation, OperationOutput, OperationResult,
    OutboundMessage, RequestId, StateMachine, TimerId, UpdateTicket,
};
use fleet_messages::{HandlesResponse, Subject};
use fleet_types::{Configuration, Credentials, NodeId, ServiceHandle, ServiceId};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn make_state() -> ProvisionerState {
    let config = ProvisionerConfig::new("fleet").with_node_timeout(Duration::from_secs(2));
    ProvisionerState::new(config, Arc::new(FieldScorer::new("available_memory")))
}

fn payload(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn announce(state: &mut ProvisionerState, id: &str) {
    state.handle(Event::NodeAnnounceReceived {
        payload: payload(json!({ "id": id })),
    });
}

fn client(state: &mut ProvisionerState, id: u64, op: Operation) -> Vec<Action> {
    state.handle(Event::Client {
        request_id: RequestId(id),
        op,
    })
}

fn reply(state: &mut ProvisionerState, correlation: CorrelationId, value: Value) -> Vec<Action> {
    state.handle(Event::ReplyReceived {
        correlation,
        payload: payload(value),
    })
}

/// Every `Action::Request` as (subject, correlation).
fn requests(actions: &[Action]) -> Vec<(String, CorrelationId)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Request {
                subject,
                correlation,
                ..
            } => Some((subject.as_str().to_string(), *correlation)),
            _ => None,
        })
        .collect()
}

fn only_request(actions: &[Action]) -> (String, CorrelationId) {
    let sent = requests(actions);
    assert_eq!(sent.len(), 1, "expected exactly one request in {:?}", actions);
    sent[0].clone()
}

fn result_of(actions: &[Action], request_id: u64) -> Option<OperationResult> {
    actions.iter().find_map(|a| match a {
        Action::EmitResult {
            request_id: id,
            result,
        } if *id == RequestId(request_id) => Some(result.clone()),
        _ => None,
    })
}

fn provision_op(plan: &str) -> Operation {
    let mut request = Configuration::new();
    request.insert("plan".into(), json!(plan));
    request.insert("label".into(), json!("db"));
    Operation::Provision {
        request,
        prior: None,
    }
}

fn seed_instance(state: &mut ProvisionerState, id: &str, node: &str) {
    let handle = ServiceHandle::new(
        ServiceId::from(id),
        Configuration::new(),
        Credentials::new().with("name", id).with("node_id", node),
    );
    state.directory.insert(handle);
}

fn seed_binding(state: &mut ProvisionerState, id: &str, instance: &str, node: &str) {
    let handle = ServiceHandle::new(
        ServiceId::from(id),
        Configuration::new(),
        Credentials::new().with("name", instance).with("node_id", node),
    );
    state.directory.insert(handle);
}

// ═══════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_connected_publishes_discover_and_arms_sweep() {
    let mut state = make_state();
    let actions = state.handle(Event::Connected);

    assert!(matches!(
        &actions[0],
        Action::Publish { subject, message: OutboundMessage::Discover(_) }
            if subject.as_str() == "fleet.discover"
    ));
    assert!(actions.contains(&Action::SetTimer {
        id: TimerId::RegistrySweep,
        duration: Duration::from_secs(60),
    }));
}

#[traced_test]
#[test]
fn test_announcements_refresh_and_sweep_expires_nodes() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    state.set_time(Duration::from_secs(200));
    announce(&mut state, "node-2");

    state.set_time(Duration::from_secs(301));
    let actions = state.handle(Event::TimerFired {
        id: TimerId::RegistrySweep,
    });

    assert!(!state.registry().contains(&NodeId::from("node-1")));
    assert!(state.registry().contains(&NodeId::from("node-2")));
    assert!(matches!(actions[..], [Action::SetTimer { id: TimerId::RegistrySweep, .. }]));
}

#[traced_test]
#[test]
fn test_malformed_announcement_is_dropped() {
    let mut state = make_state();
    let actions = state.handle(Event::NodeAnnounceReceived {
        payload: b"not json".to_vec(),
    });
    assert!(actions.is_empty());
    assert!(state.registry().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Provision
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_provision_picks_highest_score() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    announce(&mut state, "node-2");

    let actions = client(&mut state, 1, provision_op("free"));
    let (subject, discover) = only_request(&actions);
    assert_eq!(subject, "fleet.discover");

    assert!(reply(&mut state, discover, json!({"id": "node-1", "available_memory": 10})).is_empty());
    let actions = reply(&mut state, discover, json!({"id": "node-2", "available_memory": 30}));
    assert!(actions.contains(&Action::CancelTimer {
        id: TimerId::Discovery(discover),
    }));
    assert!(actions.contains(&Action::Unsubscribe {
        correlation: discover
    }));
    let (subject, provision) = only_request(&actions);
    assert_eq!(subject, "fleet.provision.node-2");

    let actions = reply(
        &mut state,
        provision,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-2", "pass": "secret"}}),
    );
    let handle = match result_of(&actions, 1) {
        Some(Ok(OperationOutput::Handle(handle))) => handle,
        other => panic!("unexpected result {:?}", other),
    };
    assert_eq!(handle.service_id, ServiceId::from("i1"));
    assert_eq!(handle.configuration["plan"], json!("free"));
    assert_eq!(handle.configuration["label"], json!("db"));
    assert!(state.directory().contains(&ServiceId::from("i1")));
    assert_eq!(state.in_flight(), 0);
}

#[traced_test]
#[test]
fn test_provision_forwards_absent_plan() {
    let mut state = make_state();
    announce(&mut state, "node-1");

    let actions = client(
        &mut state,
        3,
        Operation::Provision {
            request: Configuration::new(),
            prior: None,
        },
    );
    let (_, discover) = only_request(&actions);
    let actions = reply(&mut state, discover, json!({"id": "node-1", "available_memory": 5}));
    let sent = actions.iter().find_map(|a| match a {
        Action::Request {
            message: OutboundMessage::Provision(req),
            ..
        } => Some(req.clone()),
        _ => None,
    });
    match sent {
        Some(req) => assert_eq!(req.plan, None),
        None => panic!("expected provision request in {:?}", actions),
    }
}

#[traced_test]
#[test]
fn test_provision_without_nodes_is_no_capacity() {
    let mut state = make_state();
    let actions = client(&mut state, 7, provision_op("free"));

    let failure = result_of(&actions, 7).unwrap().unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoCapacity);
    assert_eq!(state.in_flight(), 0);
}

#[traced_test]
#[test]
fn test_zero_score_respects_over_provisioning() {
    for (allow, expect_provision) in [(false, false), (true, true)] {
        let config = ProvisionerConfig::new("fleet").with_over_provisioning(allow);
        let mut state = ProvisionerState::new(config, Arc::new(FieldScorer::new("available_memory")));
        announce(&mut state, "node-1");

        let actions = client(&mut state, 1, provision_op("free"));
        let (_, discover) = requests(&actions)[0].clone();
        let actions = reply(&mut state, discover, json!({"id": "node-1", "available_memory": 0}));

        let provisions: Vec<_> = requests(&actions)
            .into_iter()
            .filter(|(s, _)| s == "fleet.provision.node-1")
            .collect();
        assert_eq!(!provisions.is_empty(), expect_provision, "allow = {}", allow);
        if !expect_provision {
            let failure = result_of(&actions, 1).unwrap().unwrap_err();
            assert_eq!(failure.kind, FailureKind::NoCapacity);
        }
    }
}

#[traced_test]
#[test]
fn test_discovery_timeout_uses_partial_replies() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    announce(&mut state, "node-2");

    let actions = client(&mut state, 1, provision_op("free"));
    let (_, discover) = requests(&actions)[0].clone();
    reply(&mut state, discover, json!({"id": "node-1", "available_memory": 5}));

    let actions = state.handle(Event::TimerFired {
        id: TimerId::Discovery(discover),
    });
    assert_eq!(requests(&actions)[0].0, "fleet.provision.node-1");

    // A straggler after the barrier completed is ignored
    let actions = reply(&mut state, discover, json!({"id": "node-2", "available_memory": 50}));
    assert!(actions.is_empty());
}

#[traced_test]
#[test]
fn test_provision_timeout_then_late_reply_dropped() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    let actions = client(&mut state, 3, provision_op("free"));
    let (_, discover) = requests(&actions)[0].clone();
    let actions = reply(&mut state, discover, json!({"id": "node-1", "available_memory": 5}));
    let (_, provision) = requests(&actions)[0].clone();

    let actions = state.handle(Event::TimerFired {
        id: TimerId::Request(provision),
    });
    assert!(actions.contains(&Action::Unsubscribe {
        correlation: provision
    }));
    let failure = result_of(&actions, 3).unwrap().unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.http_status(), 500);

    let actions = reply(
        &mut state,
        provision,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1"}}),
    );
    assert!(actions.is_empty());
    assert!(state.directory().is_empty());
}

#[traced_test]
#[test]
fn test_provision_forwards_node_error_and_malformed_reply() {
    let mut state = make_state();
    announce(&mut state, "node-1");

    let provision_corr = |state: &mut ProvisionerState, id: u64| {
        let actions = client(state, id, provision_op("free"));
        let (_, discover) = requests(&actions)[0].clone();
        let actions = reply(state, discover, json!({"id": "node-1", "available_memory": 5}));
        requests(&actions)[0].1
    };

    let corr = provision_corr(&mut state, 1);
    let actions = reply(
        &mut state,
        corr,
        json!({"success": false, "error": {"code": 31001, "status": 400, "description": "bad plan"}}),
    );
    let failure = result_of(&actions, 1).unwrap().unwrap_err();
    assert_eq!(failure.kind, FailureKind::NodeReported);
    assert_eq!(failure.error.code, 31001);

    let corr = provision_corr(&mut state, 2);
    let actions = state.handle(Event::ReplyReceived {
        correlation: corr,
        payload: b"{garbage".to_vec(),
    });
    let failure = result_of(&actions, 2).unwrap().unwrap_err();
    assert_eq!(failure.kind, FailureKind::Internal);
    assert!(state.directory().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Bind / unbind / unprovision / restore
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_bind_records_binding_with_options() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");

    let actions = client(
        &mut state,
        1,
        Operation::Bind {
            instance_id: ServiceId::from("i1"),
            binding_options: json!({"ro": true}),
            prior: None,
        },
    );
    let (subject, corr) = only_request(&actions);
    assert_eq!(subject, "fleet.bind.node-1");

    let actions = reply(
        &mut state,
        corr,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1", "user": "u1"}}),
    );
    let handle = match result_of(&actions, 1) {
        Some(Ok(OperationOutput::Handle(handle))) => handle,
        other => panic!("unexpected result {:?}", other),
    };
    assert_ne!(handle.service_id, ServiceId::from("i1"));
    assert_eq!(handle.binding_options(), Some(&json!({"ro": true})));
    assert_eq!(state.directory().find_all_bindings(&ServiceId::from("i1")).len(), 1);
}

#[traced_test]
#[test]
fn test_unknown_instance_is_not_found_without_node_traffic() {
    let mut state = make_state();
    let ops = vec![
        Operation::Unprovision {
            instance_id: ServiceId::from("missing"),
        },
        Operation::Bind {
            instance_id: ServiceId::from("missing"),
            binding_options: Value::Null,
            prior: None,
        },
        Operation::Restore {
            instance_id: ServiceId::from("missing"),
            backup_path: "/backups/1".into(),
        },
    ];
    for (i, op) in ops.into_iter().enumerate() {
        let actions = client(&mut state, i as u64, op);
        assert!(requests(&actions).is_empty());
        let failure = result_of(&actions, i as u64).unwrap().unwrap_err();
        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(failure.http_status(), 404);
        assert_eq!(failure.error.description, "instance_id missing not found");
    }
}

#[traced_test]
#[test]
fn test_unbind_unknown_handle_is_not_found() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");

    let actions = client(
        &mut state,
        1,
        Operation::Unbind {
            instance_id: ServiceId::from("i1"),
            handle_id: ServiceId::from("b9"),
            binding_options: Value::Null,
        },
    );
    assert!(requests(&actions).is_empty());
    assert_eq!(result_of(&actions, 1).unwrap().unwrap_err().kind, FailureKind::NotFound);
}

#[traced_test]
#[test]
fn test_instance_without_node_id_is_internal() {
    let mut state = make_state();
    state.directory.insert(ServiceHandle::new(
        ServiceId::from("i1"),
        Configuration::new(),
        Credentials::new().with("name", "i1"),
    ));
    let actions = client(
        &mut state,
        1,
        Operation::Unprovision {
            instance_id: ServiceId::from("i1"),
        },
    );
    assert_eq!(result_of(&actions, 1).unwrap().unwrap_err().kind, FailureKind::Internal);
}

#[traced_test]
#[test]
fn test_unprovision_cascades_bindings_on_success_only() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");
    seed_binding(&mut state, "b1", "i1", "node-1");
    seed_binding(&mut state, "b2", "i1", "node-1");
    seed_instance(&mut state, "i2", "node-1");

    let op = || Operation::Unprovision {
        instance_id: ServiceId::from("i1"),
    };

    let actions = client(&mut state, 1, op());
    let corr = requests(&actions)[0].1;
    match actions.iter().find_map(|a| match a {
        Action::Request {
            message: OutboundMessage::Unprovision(req),
            ..
        } => Some(req.clone()),
        _ => None,
    }) {
        Some(req) => assert_eq!(req.bindings.len(), 2),
        None => panic!("expected unprovision request"),
    }
    let actions = reply(&mut state, corr, json!({"success": false}));
    assert!(result_of(&actions, 1).unwrap().is_err());
    assert_eq!(state.directory().len(), 4);

    let actions = client(&mut state, 2, op());
    let corr = requests(&actions)[0].1;
    let actions = reply(&mut state, corr, json!({"success": true}));
    assert_eq!(result_of(&actions, 2), Some(Ok(OperationOutput::Done)));
    assert_eq!(state.directory().len(), 1);
    assert!(state.directory().contains(&ServiceId::from("i2")));
}

#[traced_test]
#[test]
fn test_unbind_removes_only_the_handle() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");
    seed_binding(&mut state, "b1", "i1", "node-1");

    let actions = client(
        &mut state,
        1,
        Operation::Unbind {
            instance_id: ServiceId::from("i1"),
            handle_id: ServiceId::from("b1"),
            binding_options: Value::Null,
        },
    );
    let (subject, corr) = only_request(&actions);
    assert_eq!(subject, "fleet.unbind.node-1");
    let actions = reply(&mut state, corr, json!({"success": true}));
    assert_eq!(result_of(&actions, 1), Some(Ok(OperationOutput::Done)));
    assert!(!state.directory().contains(&ServiceId::from("b1")));
    assert!(state.directory().contains(&ServiceId::from("i1")));
}

#[traced_test]
#[test]
fn test_restore_leaves_directory_untouched() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");
    let before = state.directory().clone();

    let actions = client(
        &mut state,
        1,
        Operation::Restore {
            instance_id: ServiceId::from("i1"),
            backup_path: "/backups/i1".into(),
        },
    );
    let (subject, corr) = requests(&actions)[0].clone();
    assert_eq!(subject, "fleet.restore.node-1");
    let actions = reply(&mut state, corr, json!({"success": true}));
    assert_eq!(result_of(&actions, 1), Some(Ok(OperationOutput::Done)));
    assert_eq!(state.directory(), &before);
}

// ═══════════════════════════════════════════════════════════════════════════
// Node-originated queries
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_handles_query_all_and_bindings() {
    let mut state = make_state();
    seed_instance(&mut state, "i1", "node-1");
    seed_binding(&mut state, "b1", "i1", "node-1");
    let reply_to = Subject::raw("_INBOX.1");

    let response = |actions: Vec<Action>| match &actions[..] {
        [Action::Reply {
            message: OutboundMessage::Handles(handles),
            ..
        }] => handles.clone(),
        other => panic!("unexpected actions {:?}", other),
    };

    let all = state.handle(Event::HandlesQueryReceived {
        payload: vec![],
        reply_to: reply_to.clone(),
    });
    assert!(matches!(response(all), HandlesResponse::All(ref h) if h.len() == 2));

    // Bindings are answered with their credentials only
    let bindings = state.handle(Event::HandlesQueryReceived {
        payload: b"i1".to_vec(),
        reply_to,
    });
    match response(bindings) {
        HandlesResponse::Bindings(credentials) => {
            assert_eq!(credentials.len(), 1);
            assert_eq!(credentials[0].name(), Some(ServiceId::from("i1")));
        }
        other => panic!("expected binding credentials, got {:?}", other),
    }
}

#[traced_test]
#[test]
fn test_update_service_handle_round_trip() {
    let mut state = make_state();
    let reply_to = Subject::raw("_INBOX.2");
    let handle = json!({
        "service_id": "i1",
        "configuration": {"plan": "free"},
        "credentials": {"name": "i1", "node_id": "node-1"}
    });

    let actions = state.handle(Event::UpdateServiceHandleReceived {
        payload: payload(handle),
        reply_to: reply_to.clone(),
    });
    let ticket = match &actions[..] {
        [Action::UpdateHandle { ticket, handle }] => {
            assert_eq!(handle.service_id, ServiceId::from("i1"));
            *ticket
        }
        other => panic!("unexpected actions {:?}", other),
    };

    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket,
        success: true,
    });
    assert!(matches!(
        &actions[..],
        [Action::Reply { reply_to: r, message: OutboundMessage::Simple(resp) }]
            if *r == reply_to && resp.success
    ));

    // Unknown tickets are ignored
    assert!(state
        .handle(Event::HandleUpdateCompleted {
            ticket: UpdateTicket(99),
            success: true,
        })
        .is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Orphans
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_check_orphan_cycle_merges_reports() {
    let mut state = make_state();
    let actions = client(&mut state, 1, Operation::CheckOrphan { handles: vec![] });
    assert_eq!(result_of(&actions, 1), Some(Ok(OperationOutput::Done)));
    assert!(state.orphans().is_open());

    for report in [
        json!({"success": true, "orphan_ins_hash": {"node-1": ["i1"]}}),
        json!({"success": true, "orphan_instances": {"node-2": ["i2", "i3"]},
               "orphan_bindings": {"node-2": [{"name": "i2"}]}}),
        json!({"success": false}),
    ] {
        state.handle(Event::OrphanResultReceived {
            payload: payload(report),
        });
    }
    let (instances, bindings) = state.orphan_snapshot();
    assert_eq!(instances.len(), 2);
    assert_eq!(bindings[&NodeId::from("node-2")].len(), 1);

    state.handle(Event::TimerFired {
        id: TimerId::OrphanCycle,
    });
    assert!(!state.orphans().is_open());
    state.handle(Event::OrphanResultReceived {
        payload: payload(json!({"success": true, "orphan_ins_hash": {"node-3": ["i9"]}})),
    });
    assert_eq!(state.orphan_snapshot().0.len(), 2);
}

#[traced_test]
#[test]
fn test_purge_orphan_reports_per_node_then_summary() {
    let mut state = make_state();
    let instances = BTreeMap::from([(NodeId::from("node-1"), vec![ServiceId::from("i1")])]);
    let bindings = BTreeMap::from([
        (NodeId::from("node-1"), vec![Credentials::new().with("name", "i1")]),
        (NodeId::from("node-2"), vec![Credentials::new().with("name", "i2")]),
    ]);

    let actions = client(
        &mut state,
        5,
        Operation::PurgeOrphan {
            orphan_instances: instances,
            orphan_bindings: bindings,
        },
    );
    let sent = requests(&actions);
    assert_eq!(
        sent.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
        vec!["fleet.purge_orphan.node-1", "fleet.purge_orphan.node-2"]
    );

    let actions = reply(&mut state, sent[0].1, json!({"success": true}));
    assert!(matches!(
        &actions[..],
        [_, _, Action::EmitPurgeResult { node_id, result: Ok(_), .. }] if node_id.as_str() == "node-1"
    ));
    assert!(result_of(&actions, 5).is_none());

    let actions = state.handle(Event::TimerFired {
        id: TimerId::Request(sent[1].1),
    });
    assert!(actions.iter().any(|a| matches!(
        a,
        Action::EmitPurgeResult { result: Err(f), .. } if f.kind == FailureKind::Timeout
    )));
    assert_eq!(
        result_of(&actions, 5),
        Some(Ok(OperationOutput::PurgeSummary {
            succeeded: vec![NodeId::from("node-1")],
            failed: vec![NodeId::from("node-2")],
        }))
    );
}

#[traced_test]
#[test]
fn test_purge_orphan_empty_is_immediate_success() {
    let mut state = make_state();
    let actions = client(
        &mut state,
        1,
        Operation::PurgeOrphan {
            orphan_instances: BTreeMap::new(),
            orphan_bindings: BTreeMap::new(),
        },
    );
    assert_eq!(actions.len(), 1);
    assert!(matches!(
        result_of(&actions, 1),
        Some(Ok(OperationOutput::PurgeSummary { .. }))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// Recovery
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_recover_without_bindings() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    let prior = ServiceHandle::new(
        ServiceId::from("i1"),
        serde_json::from_value(json!({"plan": "free"})).unwrap(),
        Credentials::new().with("name", "i1").with("node_id", "node-0"),
    );

    let actions = client(
        &mut state,
        9,
        Operation::Recover {
            instance_id: ServiceId::from("i1"),
            backup_path: "/backups/i1".into(),
            handles: vec![prior],
        },
    );
    let (_, discover) = requests(&actions)[0].clone();
    let actions = reply(&mut state, discover, json!({"id": "node-1", "available_memory": 5}));
    let provision = match actions.iter().find_map(|a| match a {
        Action::Request {
            message: OutboundMessage::Provision(req),
            correlation,
            ..
        } => Some((req.clone(), *correlation)),
        _ => None,
    }) {
        Some((req, corr)) => {
            // prior credentials are forwarded
            assert_eq!(req.credentials.and_then(|c| c.name()), Some(ServiceId::from("i1")));
            corr
        }
        None => panic!("expected provision request"),
    };

    let actions = reply(
        &mut state,
        provision,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1"}}),
    );
    let ticket = match actions.iter().find_map(|a| match a {
        Action::UpdateHandle { ticket, .. } => Some(*ticket),
        _ => None,
    }) {
        Some(ticket) => ticket,
        None => panic!("expected update handle"),
    };
    assert!(result_of(&actions, 9).is_none());

    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket,
        success: true,
    });
    let (subject, restore) = requests(&actions)[0].clone();
    assert_eq!(subject, "fleet.restore.node-1");

    let actions = reply(&mut state, restore, json!({"success": true}));
    assert_eq!(result_of(&actions, 9), Some(Ok(OperationOutput::Done)));
}

#[traced_test]
#[test]
fn test_recover_fails_when_handle_update_fails() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    let prior = ServiceHandle::new(
        ServiceId::from("i1"),
        Configuration::new(),
        Credentials::new().with("name", "i1").with("node_id", "node-1"),
    );
    let actions = client(
        &mut state,
        2,
        Operation::Recover {
            instance_id: ServiceId::from("i1"),
            backup_path: "/b".into(),
            handles: vec![prior],
        },
    );
    let (_, discover) = requests(&actions)[0].clone();
    let actions = reply(&mut state, discover, json!({"id": "node-1", "available_memory": 5}));
    let (_, provision) = requests(&actions)[0].clone();
    let actions = reply(
        &mut state,
        provision,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1"}}),
    );
    let Some(Action::UpdateHandle { ticket, .. }) = actions.last() else {
        panic!("expected update handle");
    };

    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket: *ticket,
        success: false,
    });
    assert!(requests(&actions).is_empty());
    assert_eq!(result_of(&actions, 2).unwrap().unwrap_err().kind, FailureKind::Internal);
}

#[traced_test]
#[test]
fn test_recover_missing_instance_handle() {
    let mut state = make_state();
    let actions = client(
        &mut state,
        1,
        Operation::Recover {
            instance_id: ServiceId::from("i1"),
            backup_path: "/b".into(),
            handles: vec![],
        },
    );
    assert_eq!(result_of(&actions, 1).unwrap().unwrap_err().kind, FailureKind::NotFound);
}

fn binding_handle(id: &str) -> ServiceHandle {
    ServiceHandle::new(
        ServiceId::from(id),
        serde_json::from_value(json!({"data": {"binding_options": {"role": id}}})).unwrap(),
        Credentials::new()
            .with("name", "i1")
            .with("node_id", "node-0")
            .with("user", id),
    )
}

fn update_ticket(actions: &[Action]) -> UpdateTicket {
    match actions.iter().find_map(|a| match a {
        Action::UpdateHandle { ticket, .. } => Some(*ticket),
        _ => None,
    }) {
        Some(ticket) => ticket,
        None => panic!("expected update handle in {:?}", actions),
    }
}

fn emitted_results(actions: &[Action], request_id: u64) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, Action::EmitResult { request_id: id, .. } if *id == RequestId(request_id)))
        .count()
}

/// Drive a recovery of `i1` up to its rebind fan-out.
///
/// Returns every action emitted so far and the bind requests as
/// (binding id, correlation).
fn recover_until_rebind(
    state: &mut ProvisionerState,
    request_id: u64,
    bindings: &[&str],
) -> (Vec<Action>, Vec<(ServiceId, CorrelationId)>) {
    announce(state, "node-1");
    let instance = ServiceHandle::new(
        ServiceId::from("i1"),
        serde_json::from_value(json!({"plan": "free"})).unwrap(),
        Credentials::new().with("name", "i1").with("node_id", "node-0"),
    );
    let mut handles = vec![instance];
    handles.extend(bindings.iter().map(|id| binding_handle(id)));

    let mut all = client(
        state,
        request_id,
        Operation::Recover {
            instance_id: ServiceId::from("i1"),
            backup_path: "/backups/i1".into(),
            handles,
        },
    );
    let (_, discover) = only_request(&all);
    let actions = reply(state, discover, json!({"id": "node-1", "available_memory": 5}));
    let (_, provision) = only_request(&actions);
    all.extend(actions);

    let actions = reply(
        state,
        provision,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1"}}),
    );
    let ticket = update_ticket(&actions);
    all.extend(actions);

    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket,
        success: true,
    });
    let (_, restore) = only_request(&actions);
    all.extend(actions);

    let actions = reply(state, restore, json!({"success": true}));
    assert!(actions.contains(&Action::SetTimer {
        id: TimerId::Rebind(0),
        duration: Duration::from_secs(2),
    }));
    let binds = actions
        .iter()
        .filter_map(|a| match a {
            Action::Request {
                message: OutboundMessage::Bind(_),
                correlation,
                ..
            } => Some(*correlation),
            _ => None,
        })
        .zip(bindings.iter().map(|id| ServiceId::from(*id)))
        .map(|(correlation, id)| (id, correlation))
        .collect();
    all.extend(actions);
    (all, binds)
}

#[traced_test]
#[test]
fn test_recover_partial_rebind_keeps_surviving_binding() {
    let mut state = make_state();
    let (mut all, binds) = recover_until_rebind(&mut state, 4, &["b1", "b2"]);
    assert_eq!(binds.len(), 2);
    let (b1, b1_corr) = binds[0].clone();
    let (b2, b2_corr) = binds[1].clone();

    let actions = reply(
        &mut state,
        b1_corr,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1", "user": "b1"}}),
    );
    let ticket = update_ticket(&actions);
    all.extend(actions);
    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket,
        success: true,
    });
    assert_eq!(result_of(&actions, 4), None);
    all.extend(actions);

    let actions = reply(
        &mut state,
        b2_corr,
        json!({"success": false, "error": {"code": 31100, "status": 500, "description": "Node failure: x"}}),
    );
    assert!(actions.contains(&Action::CancelTimer {
        id: TimerId::Rebind(0),
    }));
    assert_eq!(result_of(&actions, 4).unwrap().unwrap_err().kind, FailureKind::Internal);
    all.extend(actions);

    // Nothing is rolled back
    assert!(state.directory().contains(&b1));
    assert!(!state.directory().contains(&b2));
    assert_eq!(emitted_results(&all, 4), 1);
    assert!(state.recoveries.is_empty());
    assert_eq!(state.in_flight(), 0);
}

#[traced_test]
#[test]
fn test_recover_rebind_deadline_fails_and_late_bind_is_ignored() {
    let mut state = make_state();
    let (mut all, binds) = recover_until_rebind(&mut state, 5, &["b1"]);
    let (_, b1_corr) = binds[0].clone();

    state.set_time(Duration::from_secs(2));
    let actions = state.handle(Event::TimerFired {
        id: TimerId::Rebind(0),
    });
    assert_eq!(result_of(&actions, 5).unwrap().unwrap_err().kind, FailureKind::Internal);
    assert!(state.recoveries.is_empty());
    all.extend(actions);

    // The outstanding bind times out afterwards without a second result
    let actions = state.handle(Event::TimerFired {
        id: TimerId::Request(b1_corr),
    });
    assert_eq!(
        actions,
        vec![Action::Unsubscribe {
            correlation: b1_corr
        }]
    );
    all.extend(actions);

    assert_eq!(emitted_results(&all, 5), 1);
    assert_eq!(state.in_flight(), 0);
}

#[traced_test]
#[test]
fn test_recover_binding_update_failure_fails_recovery() {
    let mut state = make_state();
    let (mut all, binds) = recover_until_rebind(&mut state, 6, &["b1"]);
    let (b1, b1_corr) = binds[0].clone();

    let actions = reply(
        &mut state,
        b1_corr,
        json!({"success": true, "credentials": {"name": "i1", "node_id": "node-1", "user": "b1"}}),
    );
    let ticket = update_ticket(&actions);
    all.extend(actions);

    let actions = state.handle(Event::HandleUpdateCompleted {
        ticket,
        success: false,
    });
    assert_eq!(result_of(&actions, 6).unwrap().unwrap_err().kind, FailureKind::Internal);
    all.extend(actions);

    // The rebound binding stays recorded
    assert!(state.directory().contains(&b1));
    assert_eq!(emitted_results(&all, 6), 1);
    assert!(state.recoveries.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_status_masks_passwords() {
    let mut state = make_state();
    announce(&mut state, "node-1");
    state.directory.insert(ServiceHandle::new(
        ServiceId::from("i1"),
        Configuration::new(),
        Credentials::new()
            .with("name", "i1")
            .with("node_id", "node-1")
            .with("password", "hunter2"),
    ));
    state.set_time(Duration::from_secs(12));

    let status = state.status();
    assert!(status.healthy);
    assert_eq!(status.nodes, vec![(NodeId::from("node-1"), 12)]);
    assert_eq!(
        status.instances[0].credentials.get_str("password"),
        Some(fleet_types::MASKED_PASSWORD)
    );
}
