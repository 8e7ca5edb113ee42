use super::*;
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn standby_waits_for_lease() {
    let test = Harness::with_holder("other");
    test.store.add_namespace("finance");

    test.apply(mk_policy("ops", "p", 1, mk_spec("finance", &["eu-west-1"])));
    settle().await;
    assert_eq!(test.store.writes(), vec![]);
    assert_eq!(test.phase(&id("ops", "p")), None);

    test.claims.send_replace(claim(HOSTNAME));
    settle().await;

    assert_eq!(test.phase(&id("ops", "p")), Some(Phase::Active));
    assert!(test.store.constraint("geo-residency-finance").is_some());
}

#[tokio::test(start_paused = true)]
async fn expired_claim_is_not_leadership() {
    let test = Harness::with_holder(HOSTNAME);
    test.claims.send_replace(Arc::new(Claim {
        holder: HOSTNAME.to_string(),
        expiry: DateTime::<Utc>::MIN_UTC,
    }));
    test.store.add_namespace("finance");

    test.apply(mk_policy("ops", "p", 1, mk_spec("finance", &["eu-west-1"])));
    settle().await;

    assert_eq!(test.store.writes(), vec![]);
}
