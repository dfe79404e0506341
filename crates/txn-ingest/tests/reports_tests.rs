//! Fraud report queries against a loaded transactions table

mod common;

use common::{csv_file, init_test_tracing, run_file, TestPostgres};
use txn_ingest::reports::{FraudReports, ReportOptions};

fn recent(days_ago: i64) -> String {
    (chrono::Utc::now().naive_utc() - chrono::Duration::days(days_ago))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[allow(clippy::too_many_arguments)]
fn txn(
    id: &str,
    agent: &str,
    amount: &str,
    status: &str,
    created_at: &str,
    lat: &str,
    lon: &str,
    email: &str,
) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},9876543210",
        id, agent, amount, status, created_at, created_at, lat, lon, email
    )
}

async fn seeded() -> TestPostgres {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");

    let rows = vec![
        // Same user in Mumbai, then Delhi
        txn("T1", "Asha", "100.00", "Success", &recent(10), "19.076090", "72.877426", "far@test.com"),
        txn("T2", "Asha", "250.00", "Success", &recent(5), "28.704060", "77.102493", "far@test.com"),
        // Same user twice in one neighbourhood
        txn("T3", "Ravi", "75.00", "Success", &recent(8), "12.971599", "77.594566", "near@test.com"),
        txn("T4", "Ravi", "20.00", "Success", &recent(7), "12.972000", "77.595000", "near@test.com"),
        // Three failures around Chennai, one in Kolkata
        txn("T5", "Meena", "10.00", "Failed", &recent(3), "13.082680", "80.270721", "f1@test.com"),
        txn("T6", "Meena", "10.00", "Failed", &recent(3), "13.100000", "80.300000", "f2@test.com"),
        txn("T7", "Meena", "10.00", "Failed", &recent(3), "13.050000", "80.250000", "f3@test.com"),
        txn("T8", "Meena", "10.00", "Failed", &recent(3), "22.572645", "88.363892", "f4@test.com"),
        // Outside the agent window
        txn("T9", "Old", "99999.00", "Success", "2001-01-01 00:00:00", "", "", "old@test.com"),
    ];
    let file = csv_file(&rows).unwrap();
    run_file(pg.pool(), file.path()).await.expect("Pipeline failed");
    pg
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_users_with_distant_locations() {
    init_test_tracing();
    let pg = seeded().await;
    let reports = FraudReports::new(pg.pool_clone());

    let users = reports.users_with_distant_locations(5_000.0).await.unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].email, "far@test.com");
    assert!(users[0].max_distance_meters > 1_000_000.0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_transactions_by_location() {
    init_test_tracing();
    let pg = seeded().await;
    let reports = FraudReports::new(pg.pool_clone());

    let cells = reports.failed_transactions_by_location(2, 1.5).await.unwrap();

    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].failed_transaction_count, 3);
    assert_eq!(cells[0].grid_lat, 13.5);
    assert_eq!(cells[0].grid_lon, 81.0);

    let none = reports.failed_transactions_by_location(3, 1.5).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_top_agents() {
    init_test_tracing();
    let pg = seeded().await;
    let reports = FraudReports::new(pg.pool_clone());

    let agents = reports.top_agents(365, 50).await.unwrap();
    let names: Vec<_> = agents
        .iter()
        .map(|a| a.agent_name.clone().unwrap_or_default())
        .collect();

    assert_eq!(names, vec!["Asha".to_string(), "Ravi".to_string()]);
    assert_eq!(
        agents[0]
            .total_transaction_amount
            .as_ref()
            .map(ToString::to_string)
            .as_deref(),
        Some("350.00")
    );

    let top_one = reports.top_agents(365, 1).await.unwrap();
    assert_eq!(top_one.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_run_all_with_defaults() {
    init_test_tracing();
    let pg = seeded().await;

    let set = FraudReports::new(pg.pool_clone())
        .run_all(&ReportOptions::default())
        .await
        .unwrap();

    assert_eq!(set.distant_users.len(), 1);
    assert_eq!(set.failed_locations.len(), 1);
    assert_eq!(set.top_agents.len(), 2);
}
