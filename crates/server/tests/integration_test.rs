//! The six seed scenarios for the distribution protocol, run directly
//! against `meshctl-store`/`meshctl-pki`/`meshctl-ipam`/`meshctl-assembler`/
//! `meshctl-scheduler` rather than through the HTTP layer: the behavior
//! under test is the domain crates' composition, not axum routing.
//!
//! Every test is `#[ignore]`d because it requires a real PostgreSQL
//! database; set `TEST_DATABASE_URL` and run with `cargo test -- --ignored`.

mod common;

use std::net::IpAddr;

use chrono::{Duration, Utc};
use meshctl_assembler::{assemble, AssemblerSettings};
use meshctl_store::{ca_repo, client_repo, group_repo, ip_repo, tokens};

fn settings() -> AssemblerSettings {
    AssemblerSettings {
        cert_validity: Duration::days(180),
        renew_before: Duration::days(90),
        lighthouse_port: 4242,
        punchy: true,
    }
}

/// Scenario 1: bootstrap and first fetch.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn bootstrap_and_first_fetch() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    ca_repo::create_and_activate(&pool, "ca-A", now, now + Duration::days(540))
        .await
        .unwrap();

    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();

    let node1 = client_repo::create(&pool, "node-1", "alice", false, None)
        .await
        .unwrap();
    let assignment = ip_repo::allocate(&pool, node1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();
    assert_eq!(assignment.ip_address, "10.100.0.1".parse::<IpAddr>().unwrap());

    let issued = tokens::issue(&pool, node1.id, b"test-pepper").await.unwrap();

    let resolved = tokens::resolve(&pool, &issued.plaintext, b"test-pepper")
        .await
        .unwrap();
    assert_eq!(resolved, Some(node1.id));

    let bundle = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();

    assert!(bundle.client_cert_pem.contains("BEGIN CERTIFICATE"));
    assert_eq!(bundle.ca_chain_pems.len(), 1);
    assert!(!bundle.is_lighthouse);
    assert!(bundle.config_yaml.contains("10.100.0.1"));

    common::cleanup_test_db(&pool).await;
}

/// Scenario 2: lighthouse discovery.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn lighthouse_discovery() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    ca_repo::create_and_activate(&pool, "ca-A", now, now + Duration::days(540))
        .await
        .unwrap();
    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();

    let public_ip: IpAddr = "203.0.113.7".parse().unwrap();
    let lh1 = client_repo::create(&pool, "lh-1", "alice", true, Some(public_ip))
        .await
        .unwrap();
    let lh_assignment = ip_repo::allocate(&pool, lh1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();
    assert_eq!(lh_assignment.ip_address, "10.100.0.1".parse::<IpAddr>().unwrap());

    let node2 = client_repo::create(&pool, "node-2", "alice", false, None)
        .await
        .unwrap();
    let node2_assignment = ip_repo::allocate(&pool, node2.id, ip_pool.id, None, None, true)
        .await
        .unwrap();
    assert_eq!(node2_assignment.ip_address, "10.100.0.2".parse::<IpAddr>().unwrap());

    let bundle = assemble(&pool, node2.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();

    assert!(bundle.config_yaml.contains("10.100.0.1"));
    assert!(bundle.config_yaml.contains("203.0.113.7:4242"));
    // node-2 does not advertise itself as a lighthouse host.
    assert!(!bundle.config_yaml.contains("10.100.0.2:4242"));

    common::cleanup_test_db(&pool).await;
}

/// Scenario 3: group mutation dirties the bundle.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn group_mutation_dirties_bundle() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    ca_repo::create_and_activate(&pool, "ca-A", now, now + Duration::days(540))
        .await
        .unwrap();
    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();
    let node1 = client_repo::create(&pool, "node-1", "alice", false, None)
        .await
        .unwrap();
    ip_repo::allocate(&pool, node1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();

    let before = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();

    let group = group_repo::create(&pool, "env:prod", "alice").await.unwrap();
    client_repo::add_to_group(&pool, node1.id, group.id).await.unwrap();

    let client_after = client_repo::get(&pool, node1.id).await.unwrap();
    assert!(client_after.config_dirty_at >= now);

    let after = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();

    assert_ne!(before.client_cert_pem, after.client_cert_pem);
    assert!(after.config_yaml.contains("env:prod"));
    assert!(!before.config_yaml.contains("env:prod"));

    common::cleanup_test_db(&pool).await;
}

/// Scenario 4: CA rotation overlap.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn ca_rotation_overlap() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    let rotate_settings = meshctl_scheduler::SchedulerSettings {
        ca_rotate_at: Duration::days(365),
        ca_total_validity: Duration::days(548),
        cert_renew_before: Duration::days(90),
        overlap_window: Duration::days(90),
        wake_interval: std::time::Duration::from_secs(3600),
    };

    // ca-A is already old enough to be due for rotation.
    let ca_a_not_before = now - Duration::days(400);
    let ca_a = ca_repo::create_and_activate(&pool, "ca-A", ca_a_not_before, ca_a_not_before + Duration::days(540))
        .await
        .unwrap();

    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();
    let node1 = client_repo::create(&pool, "node-1", "alice", false, None)
        .await
        .unwrap();
    ip_repo::allocate(&pool, node1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();

    let report = meshctl_scheduler::run_once(&pool, &rotate_settings, now).await.unwrap();
    assert!(report.ca_rotated);

    let chain = ca_repo::get_active_ca_chain(&pool).await.unwrap();
    assert_eq!(chain.len(), 2);
    let ca_a_refreshed = ca_repo::get(&pool, ca_a.id).await.unwrap();
    assert!(ca_a_refreshed.is_previous);
    assert!(!ca_a_refreshed.can_sign);

    let mut expected_order = chain.clone();
    expected_order.sort_by_key(|ca| ca.id);
    let expected_pems: Vec<String> = expected_order.iter().map(|ca| ca.public_cert_pem.clone()).collect();

    let bundle = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();
    assert_eq!(bundle.ca_chain_pems, expected_pems);
    assert!(bundle.ca_chain_pems.contains(&ca_a_refreshed.public_cert_pem));

    let signing_ca = ca_repo::get_signing_ca(&pool).await.unwrap();
    assert_ne!(signing_ca.id, ca_a.id);
    assert!(bundle.ca_chain_pems.contains(&signing_ca.public_cert_pem));

    // Fast-forward past the overlap window measured from ca-A's demotion.
    let far_future = now + Duration::days(91);
    let second_report = meshctl_scheduler::run_once(&pool, &rotate_settings, far_future)
        .await
        .unwrap();
    assert_eq!(second_report.cas_demoted_from_chain, 1);

    let remaining_chain = ca_repo::get_active_ca_chain(&pool).await.unwrap();
    assert_eq!(remaining_chain.len(), 1);
    assert_eq!(remaining_chain[0].id, signing_ca.id);

    common::cleanup_test_db(&pool).await;
}

/// Scenario 5: token leak revocation.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn token_leak_revocation() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    ca_repo::create_and_activate(&pool, "ca-A", now, now + Duration::days(540))
        .await
        .unwrap();
    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();
    let node1 = client_repo::create(&pool, "node-1", "alice", false, None)
        .await
        .unwrap();
    ip_repo::allocate(&pool, node1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();

    let pepper: &[u8] = b"test-pepper";
    let issued = tokens::issue(&pool, node1.id, pepper).await.unwrap();

    let before_leak = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();

    let deactivated = tokens::deactivate_leaked(&pool, &issued.plaintext, "https://example.com/leak", pepper)
        .await
        .unwrap();
    assert_eq!(deactivated, 1);

    let resolved = tokens::resolve(&pool, &issued.plaintext, pepper).await.unwrap();
    assert_eq!(resolved, None);

    // The client's existing certificate remains valid: assembling again
    // with a fresh in-process call (bypassing the now-dead token) still
    // reuses the same certificate, since leak response never touches
    // `client_certificate`.
    let after_leak = assemble(&pool, node1.id, common::test_spki(), &settings(), now)
        .await
        .unwrap();
    assert_eq!(before_leak.client_cert_pem, after_leak.client_cert_pem);

    common::cleanup_test_db(&pool).await;
}

/// Scenario 6: blocked client.
#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn blocked_client_is_refused() {
    let pool = common::create_test_pool().await;
    let now = Utc::now();

    ca_repo::create_and_activate(&pool, "ca-A", now, now + Duration::days(540))
        .await
        .unwrap();
    let ip_pool = ip_repo::create_pool(&pool, "10.100.0.0/16".parse().unwrap(), "main overlay")
        .await
        .unwrap();
    let node1 = client_repo::create(&pool, "node-1", "alice", false, None)
        .await
        .unwrap();
    ip_repo::allocate(&pool, node1.id, ip_pool.id, None, None, true)
        .await
        .unwrap();
    let issued = tokens::issue(&pool, node1.id, b"test-pepper").await.unwrap();

    client_repo::set_blocked(&pool, node1.id, true).await.unwrap();

    let result = assemble(&pool, node1.id, common::test_spki(), &settings(), now).await;
    assert!(matches!(result, Err(meshctl_assembler::Error::Forbidden)));

    // The token still resolves — blocking is enforced at assembly, not at
    // the token layer — and the client and its assignment are untouched.
    let resolved = tokens::resolve(&pool, &issued.plaintext, b"test-pepper")
        .await
        .unwrap();
    assert_eq!(resolved, Some(node1.id));

    let still_there = client_repo::get(&pool, node1.id).await.unwrap();
    assert!(still_there.is_blocked);
    let assignment_still_there = client_repo::primary_assignment(&pool, node1.id).await.unwrap();
    assert!(assignment_still_there.is_some());

    common::cleanup_test_db(&pool).await;
}
