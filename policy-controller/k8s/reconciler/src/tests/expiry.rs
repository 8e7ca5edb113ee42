use super::*;
use crate::expiry;
use chrono::TimeZone;
use pretty_assertions::assert_eq;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn expiring(target: &str) -> SovereignPolicySpec {
    SovereignPolicySpec {
        expiry_date: Some("2030-01-01T00:00:00Z".to_string()),
        ..mk_spec(target, &["eu-west-1"])
    }
}

#[tokio::test(start_paused = true)]
async fn expiry_retracts_constraint_once() {
    let test = Harness::new();
    test.store.add_namespace("finance");
    test.apply(mk_policy("ops", "p", 1, expiring("finance")));
    settle().await;
    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Active));

    assert!(expiry::tick(&test.index, &test.events, at(-1)));
    settle().await;
    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Active));
    test.store.clear_writes();

    assert!(expiry::tick(&test.index, &test.events, at(1)));
    settle().await;

    let status = test.store.status(&id("ops", "p")).expect("status");
    assert_eq!(status.phase, Phase::Expired);
    assert_eq!(status.message, "Policy expired on 2030-01-01T00:00:00Z");
    assert!(!status.constraint_created);
    assert!(test.store.constraint("geo-residency-finance").is_none());
    assert_eq!(
        test.store
            .annotations("finance")
            .and_then(|a| a.get(labels::ALLOWED_REGIONS).cloned()),
        Some("eu-west-1".to_string()),
        "annotations are left in place"
    );
    assert_eq!(
        test.store.writes(),
        vec![
            Write::DeleteConstraint("geo-residency-finance".to_string()),
            Write::Status(id("ops", "p"), Phase::Expired),
        ]
    );
    assert!(test.index.read().claimant("finance").is_none());

    test.store.clear_writes();
    assert!(expiry::tick(&test.index, &test.events, at(60)));
    settle().await;
    assert_eq!(test.store.writes(), vec![]);
}

#[tokio::test(start_paused = true)]
async fn extended_expiry_reactivates_policy() {
    let test = Harness::new();
    test.store.add_namespace("finance");
    test.apply(mk_policy("ops", "p", 1, expiring("finance")));
    settle().await;
    expiry::tick(&test.index, &test.events, at(1));
    settle().await;
    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Expired));

    let extended = SovereignPolicySpec {
        expiry_date: Some("2999-01-01T00:00:00Z".to_string()),
        ..mk_spec("finance", &["eu-west-1"])
    };
    test.apply(mk_policy("ops", "p", 2, extended));
    settle().await;

    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Active));
    assert!(test.store.constraint("geo-residency-finance").is_some());
}

#[tokio::test(start_paused = true)]
async fn expiry_ignores_inactive_policies() {
    let test = Harness::new();
    test.apply(mk_policy("ops", "p", 1, expiring("finance")));
    settle().await;
    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Failed));
    test.store.clear_writes();

    assert!(expiry::tick(&test.index, &test.events, at(1)));
    settle().await;

    assert_eq!(test.store.writes(), vec![]);
    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Failed));
}
