use crate::auth::TokenAuthority;
use crate::error::AuthError;
use crate::models::Tier;
use crate::persistence::Store;
use std::sync::Arc;

fn authority() -> Arc<TokenAuthority> {
    Arc::new(TokenAuthority::new(
        b"rotation-test-secret",
        900,
        7 * 24 * 3600,
        Arc::new(Store::open_in_memory().unwrap()),
    ))
}

#[test]
fn concurrent_refreshes_of_one_token_have_one_winner() {
    let authority = authority();
    let pair = authority.issue("acc-1", Tier::Professional).unwrap();
    let refresh_token = Arc::new(pair.refresh_token);

    let mut threads = Vec::new();
    for _ in 0..8 {
        let authority = authority.clone();
        let token = refresh_token.clone();
        threads.push(std::thread::spawn(move || authority.refresh(&token)));
    }
    let results: Vec<_> = threads
        .into_iter()
        .map(|t| t.join().expect("refresh thread panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one rotation must win");
    // Every loser observed the replay, directly or via the resulting
    // lineage revocation.
    for loser in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            loser.as_ref().unwrap_err(),
            AuthError::Reused | AuthError::Invalid | AuthError::Revoked
        ));
    }
    // At least one concurrent loser raced the same generation and saw
    // Reused, which revoked the family: the winner's pair is dead too.
    if results
        .iter()
        .any(|r| matches!(r, Err(AuthError::Reused)))
    {
        let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        assert!(authority.verify(&winner.access_token).is_err());
    }
}

#[test]
fn sequential_rotation_chain_stays_healthy() {
    let authority = authority();
    let mut pair = authority.issue("acc-1", Tier::Starter).unwrap();
    for _ in 0..5 {
        pair = authority.refresh(&pair.refresh_token).unwrap();
        assert!(authority.verify(&pair.access_token).is_ok());
    }
}

#[test]
fn replay_after_rotation_revokes_even_later_generations() {
    let authority = authority();
    let first = authority.issue("acc-1", Tier::Starter).unwrap();
    let second = authority.refresh(&first.refresh_token).unwrap();
    let third = authority.refresh(&second.refresh_token).unwrap();

    // An attacker replays the oldest token two rotations later.
    assert_eq!(
        authority.refresh(&first.refresh_token).unwrap_err(),
        AuthError::Reused
    );
    assert!(authority.verify(&third.access_token).is_err());
    assert!(authority.refresh(&third.refresh_token).is_err());
}
