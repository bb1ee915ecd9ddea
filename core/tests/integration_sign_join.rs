//! End-to-end sign → verify → join rounds against the scripted server.

mod common;

use common::*;
use kanon_core::bhttp::{BinaryHttpMessage, Fields};
use kanon_core::protocol::wire::GetTokensRequest;
use kanon_core::protocol::{TransportError, OHTTP_REQUEST_CONTENT_TYPE};
use kanon_core::signjoin::SignJoinManager;
use kanon_core::{Clock, KAnonCaller, KAnonError, KAnonMessage, MessageStatus, SignJoinSource};
use prost::Message;
use std::sync::Arc;

use MessageStatus::{Failed, Joined, NotProcessed};

#[tokio::test]
async fn test_success_path_joins_every_message() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b", "c"]);

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(outcome.requested, 3);
    assert_eq!(outcome.eligible, 3);
    assert_eq!(outcome.joined, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(harness.statuses(&messages), vec![Joined, Joined, Joined]);

    // Stamped with the generation that signed them
    let expected_expiry = START + harness.config.client_params_ttl_secs;
    for message in &messages {
        let stored = harness.stores.messages.get(message.id).unwrap().unwrap();
        assert_eq!(
            stored.corresponding_client_parameters_expiry,
            Some(expected_expiry)
        );
    }

    assert_eq!(harness.http.count(PARAMS_URL), 1);
    assert_eq!(harness.http.count(REGISTER_URL), 1);
    assert_eq!(harness.http.count(TOKENS_URL), 1);
    assert_eq!(harness.http.count(JOIN_URL), 3);

    let stats = harness.stats.sign_join.lock();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].source, SignJoinSource::Background);
    assert_eq!(stats[0].joined, 3);
}

#[tokio::test]
async fn test_tokens_request_carries_fingerprints() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);

    harness
        .caller()
        .sign_and_join_messages(messages, SignJoinSource::Immediate)
        .await
        .unwrap();

    let requests = harness.http.requests();
    let tokens = requests.iter().find(|r| r.url == TOKENS_URL).unwrap();
    let request = GetTokensRequest::decode(tokens.body.as_slice()).unwrap();
    assert_eq!(request.client_params_version, "client-v1");
    assert_eq!(
        request.client_fingerprints_bytes,
        vec![
            b"types/fledge/sets/a".to_vec(),
            b"types/fledge/sets/b".to_vec()
        ]
    );
    let metadata = request.request_metadata.unwrap();
    assert!(!metadata.is_attested());
}

#[tokio::test]
async fn test_join_requests_are_framed_and_encapsulated() {
    let harness = Harness::new();
    let messages = harness.seed(&["abc"]);

    harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.ohttp.contexts(), vec![messages[0].id]);

    let requests = harness.http.requests();
    let join = requests.iter().find(|r| r.url == JOIN_URL).unwrap();
    assert_eq!(join.content_type, OHTTP_REQUEST_CONTENT_TYPE);

    let framed = BinaryHttpMessage::deserialize(&join.body).unwrap();
    let control = framed.request_control().unwrap();
    assert_eq!(control.method, "POST");
    assert_eq!(control.scheme, "https");
    assert_eq!(control.authority, JOIN_AUTHORITY);
    assert_eq!(control.path, "/v2/types/fledge/sets/abc:join");
    assert_eq!(
        framed.header_fields().get_str("date"),
        Some("Tue, 14 Nov 2023 22:13:20 GMT")
    );

    let body: serde_json::Value = serde_json::from_slice(framed.content()).unwrap();
    // "types/fledge/sets/abc" and "signature", base64 encoded
    assert_eq!(body["act"]["nonce_bytes"], "dHlwZXMvZmxlZGdlL3NldHMvYWJj");
    assert_eq!(body["act"]["token_v0"]["bb_signature"], "c2lnbmF0dXJl");
}

#[tokio::test]
async fn test_verification_false_fails_every_message() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    harness.act.reject("types/fledge/sets/b");

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.joined, 0);
    assert_eq!(harness.statuses(&messages), vec![Failed, Failed]);
    assert_eq!(harness.http.count(JOIN_URL), 0);
}

#[tokio::test]
async fn test_verification_error_fails_every_message() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    harness.act.fail_verification();

    harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.statuses(&messages), vec![Failed, Failed]);
}

#[tokio::test]
async fn test_undecodable_tokens_response_fails_batch() {
    let harness = Harness::new();
    let messages = harness.seed(&["a"]);
    harness.http.respond_with(TOKENS_URL, vec![0xff, 0xff, 0xff]);

    harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.statuses(&messages), vec![Failed]);
}

#[tokio::test]
async fn test_token_count_mismatch_fails_batch() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    harness.act.recover_one_token_short();

    harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.statuses(&messages), vec![Failed, Failed]);
    assert_eq!(harness.http.count(JOIN_URL), 0);
}

#[tokio::test]
async fn test_join_failures_are_per_message() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b", "c"]);
    harness.http.set_join_status("b", 500);

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.statuses(&messages), vec![Joined, Failed, Joined]);
    assert_eq!(outcome.joined, 2);
    assert_eq!(outcome.failed, 1);
}

#[tokio::test]
async fn test_join_transport_failure_fails_only_that_message() {
    let harness = Harness::new();
    let messages = harness.seed(&["a"]);
    harness.http.fail(JOIN_URL, TransportError::Network("reset".into()));

    harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.statuses(&messages), vec![Failed]);
}

#[tokio::test]
async fn test_sub_batches_are_independent() {
    let mut config = test_config();
    config.sign_batch_size = 2;
    let harness = Harness::with_config(config);
    let messages = harness.seed(&["a", "b", "c", "d", "e"]);
    // Third batch holds only "e"
    harness.act.reject("types/fledge/sets/e");

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.http.count(TOKENS_URL), 3);
    assert_eq!(
        harness.statuses(&messages),
        vec![Joined, Joined, Joined, Joined, Failed]
    );
    assert_eq!(outcome.joined, 4);
    assert_eq!(outcome.failed, 1);
    // Bootstrap ran once for all batches
    assert_eq!(harness.http.count(REGISTER_URL), 1);
}

#[tokio::test]
async fn test_tokens_transport_failure_leaves_messages_pending() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    harness.http.fail(TOKENS_URL, TransportError::Status(503));

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(outcome.not_processed, 2);
    assert_eq!(harness.statuses(&messages), vec![NotProcessed, NotProcessed]);
}

#[tokio::test]
async fn test_registration_failure_leaves_messages_pending() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    harness
        .http
        .fail(REGISTER_URL, TransportError::Network("unreachable".into()));

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(outcome.not_processed, 2);
    assert_eq!(harness.statuses(&messages), vec![NotProcessed, NotProcessed]);
    assert!(harness.stores.params.all_client_parameters().unwrap().is_empty());
    assert!(harness.stores.params.all_server_parameters().unwrap().is_empty());
    assert_eq!(harness.http.count(TOKENS_URL), 0);
    assert_eq!(harness.stats.sign_join.lock().len(), 1);
}

#[tokio::test]
async fn test_already_joined_messages_cause_no_traffic() {
    let harness = Harness::new();
    let messages = harness.seed(&["a", "b"]);
    let caller = harness.caller();

    caller
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();
    let calls = harness.http.total();

    let outcome = caller
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.http.total(), calls);
    assert_eq!(outcome.eligible, 0);
    assert_eq!(harness.statuses(&messages), vec![Joined, Joined]);
    assert_eq!(harness.stats.sign_join.lock().len(), 2);
}

#[tokio::test]
async fn test_expired_and_unknown_messages_are_skipped() {
    let harness = Harness::new();
    let expired = harness
        .stores
        .messages
        .insert(KAnonMessage::new("old", 1, START - 10, START))
        .unwrap();
    let mut unknown = KAnonMessage::new("ghost", 2, START, START + 10);
    unknown.id = 9_999;

    let outcome = harness
        .caller()
        .sign_and_join_messages(vec![expired.clone(), unknown], SignJoinSource::Immediate)
        .await
        .unwrap();

    assert_eq!(outcome.requested, 2);
    assert_eq!(outcome.eligible, 0);
    assert_eq!(harness.http.total(), 0);
    assert_eq!(harness.status(expired.id), NotProcessed);
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let harness = Harness::new();

    let result = harness
        .caller()
        .sign_and_join_messages(vec![], SignJoinSource::Immediate)
        .await;

    assert!(matches!(result, Err(KAnonError::InvalidArgument(_))));
    assert_eq!(harness.http.total(), 0);
    assert!(harness.stats.sign_join.lock().is_empty());
}

#[tokio::test]
async fn test_cached_parameters_are_reused() {
    let harness = Harness::new();
    let caller = harness.caller();

    let first = harness.seed(&["a"]);
    caller
        .sign_and_join_messages(first, SignJoinSource::Background)
        .await
        .unwrap();

    harness.clock.advance(60);
    let second = harness.seed(&["b"]);
    caller
        .sign_and_join_messages(second.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.status(second[0].id), Joined);
    assert_eq!(harness.http.count(PARAMS_URL), 1);
    assert_eq!(harness.http.count(REGISTER_URL), 1);
    assert_eq!(harness.act.client_parameters_generated(), 1);

    let initialize = harness.stats.initialize.lock();
    assert_eq!(initialize.len(), 2);
    assert!(initialize[0].registered);
    assert!(!initialize[1].registered);
}

#[tokio::test]
async fn test_profile_reset_forces_new_registration() {
    let harness = Harness::new();
    let caller = harness.caller();

    caller
        .sign_and_join_messages(harness.seed(&["a"]), SignJoinSource::Background)
        .await
        .unwrap();
    let first_profile = harness.stores.profile.current().unwrap().unwrap();

    harness.stores.profile.reset().unwrap();
    harness.clock.advance(1);
    caller
        .sign_and_join_messages(harness.seed(&["b"]), SignJoinSource::Background)
        .await
        .unwrap();

    let second_profile = harness.stores.profile.current().unwrap().unwrap();
    assert_ne!(first_profile, second_profile);
    assert_eq!(harness.http.count(REGISTER_URL), 2);
    // Server parameters were still usable for signing
    assert_eq!(harness.http.count(PARAMS_URL), 1);

    let active = harness
        .stores
        .params
        .active_client_parameters(START + 1)
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].client_id, second_profile);
}

#[tokio::test]
async fn test_closed_join_window_fails_join() {
    let mut config = test_config();
    config.server_params_join_ttl_secs = 5;
    let harness = Harness::with_config(config);
    let caller = harness.caller();

    caller
        .sign_and_join_messages(harness.seed(&["a"]), SignJoinSource::Background)
        .await
        .unwrap();

    // Still inside the sign window, past the join window
    harness.clock.advance(10);
    let late = harness.seed(&["b"]);
    caller
        .sign_and_join_messages(late.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(harness.status(late[0].id), Failed);
    assert_eq!(harness.http.count(JOIN_URL), 1);
}

#[tokio::test]
async fn test_resubmitted_message_is_retried() {
    let harness = Harness::new();
    let messages = harness.seed(&["a"]);
    harness.http.set_join_status("a", 429);
    let caller = harness.caller();

    caller
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();
    assert_eq!(harness.status(messages[0].id), Failed);

    harness.http.set_join_status("a", 200);
    assert_eq!(harness.stores.messages.resubmit(&[messages[0].id]).unwrap(), 1);
    caller
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();
    assert_eq!(harness.status(messages[0].id), Joined);
}

#[tokio::test]
async fn test_join_response_with_binary_header_value_counts_as_joined() {
    let harness = Harness::new();
    let messages = harness.seed(&["a"]);
    harness
        .http
        .set_join_headers("a", Fields::new().with("x-trace", [0xffu8, 0xfe, b'1']));

    let outcome = harness
        .caller()
        .sign_and_join_messages(messages.clone(), SignJoinSource::Background)
        .await
        .unwrap();

    assert_eq!(outcome.joined, 1);
    assert_eq!(harness.status(messages[0].id), Joined);
}

#[tokio::test]
async fn test_signed_message_is_restamped_when_signed_again() {
    let harness = Harness::new();
    let messages = harness.seed(&["a"]);
    let id = messages[0].id;
    // Left `Signed` by an earlier generation that has since lapsed
    harness
        .stores
        .messages
        .update_status_for_generation(&[id], MessageStatus::Signed, START + 500)
        .unwrap();

    harness
        .caller()
        .sign_and_join_messages(messages, SignJoinSource::Background)
        .await
        .unwrap();

    let expected_expiry = START + harness.config.client_params_ttl_secs;
    let stored = harness.stores.messages.get(id).unwrap().unwrap();
    assert_eq!(stored.status, Joined);
    assert_eq!(
        stored.corresponding_client_parameters_expiry,
        Some(expected_expiry)
    );

    // Past the old stamp the join still covers the hash set
    harness.clock.advance(1_000);
    assert!(stored.is_covered(harness.clock.now()));
    let manager = SignJoinManager::new(
        harness.config.clone(),
        harness.stores.messages.clone(),
        harness.caller(),
        Arc::new(FixedRandom(0)),
        harness.clock.clone(),
    );
    let now = harness.clock.now();
    let outcome = manager
        .process_new_messages(vec![KAnonMessage::new("a", 9, now, now + 86_400)])
        .await
        .unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.stored, 0);
}
