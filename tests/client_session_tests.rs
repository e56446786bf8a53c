//! Client session context tests: rehydration, stale-cache retention, the
//! generation guard, and persisted-store hygiene.

use tempfile::tempdir;

use brigade::cli::session::{
    rehydrate, Rehydration, SessionContext, SessionState, SessionStore, VerifyOutcome, REFRESH_TOKEN_KEY,
    TOKEN_KEY, USER_KEY,
};
use brigade::identity::{PublicStaff, Role};

fn staff(name: &str) -> PublicStaff {
    PublicStaff {
        id: "u1".into(),
        email: "staff@example.com".into(),
        name: name.into(),
        role: Role::Waiter,
        active: true,
        phone_number: None,
    }
}

fn user_json(name: &str) -> String {
    serde_json::to_string(&staff(name)).unwrap()
}

#[test]
fn empty_store_settles_unauthenticated() {
    let tmp = tempdir().unwrap();
    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    assert_eq!(*ctx.state(), SessionState::Uninitialized);
    assert!(ctx.begin_rehydration().is_none());
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
}

#[test]
fn cached_session_is_trusted_optimistically() {
    let tmp = tempdir().unwrap();
    let store = SessionStore::open(tmp.path());
    store.save("tok-1", Some("refresh-1"), &user_json("Pat")).unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let (token, generation) = ctx.begin_rehydration().expect("cached session");
    assert_eq!(token, "tok-1");
    assert_eq!(generation, 0);
    assert_eq!(ctx.refresh_token(), Some("refresh-1"));
    // Authenticated before any network call has happened.
    assert_eq!(*ctx.state(), SessionState::Authenticated(staff("Pat")));
}

#[test]
fn verification_failure_keeps_the_stale_identity() {
    // Server unreachable: availability wins, the cached user stays.
    let tmp = tempdir().unwrap();
    SessionStore::open(tmp.path()).save("tok-1", None, &user_json("Pat")).unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let (_, generation) = ctx.begin_rehydration().unwrap();
    ctx.apply_verification(generation, VerifyOutcome::Failed);
    assert_eq!(*ctx.state(), SessionState::Authenticated(staff("Pat")));
}

#[test]
fn verification_success_overwrites_cached_identity() {
    let tmp = tempdir().unwrap();
    SessionStore::open(tmp.path()).save("tok-1", None, &user_json("Pat")).unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let (_, generation) = ctx.begin_rehydration().unwrap();
    ctx.apply_verification(generation, VerifyOutcome::Fresh(staff("Patricia")));
    assert_eq!(*ctx.state(), SessionState::Authenticated(staff("Patricia")));

    // And the persisted entry was refreshed too.
    let store = SessionStore::open(tmp.path());
    let cached: PublicStaff = serde_json::from_str(&store.get(USER_KEY).unwrap()).unwrap();
    assert_eq!(cached.name, "Patricia");
}

#[test]
fn corrupt_cached_user_clears_everything() {
    let tmp = tempdir().unwrap();
    let store = SessionStore::open(tmp.path());
    store.save("tok-1", Some("refresh-1"), "{not json at all").unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    assert!(ctx.begin_rehydration().is_none());
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
    assert!(SessionStore::open(tmp.path()).is_empty());
}

#[test]
fn partial_entries_are_treated_as_corrupt() {
    let tmp = tempdir().unwrap();
    let store = SessionStore::open(tmp.path());
    // Token without a cached user.
    store.put(TOKEN_KEY, "tok-1").unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    assert!(ctx.begin_rehydration().is_none());
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
    assert!(SessionStore::open(tmp.path()).is_empty());
}

#[test]
fn rehydrate_classification() {
    assert_eq!(rehydrate(None, None, None), Rehydration::Empty);
    assert_eq!(rehydrate(None, Some("r".into()), None), Rehydration::Corrupt);
    assert_eq!(rehydrate(Some("t".into()), None, Some("garbage".into())), Rehydration::Corrupt);
    match rehydrate(Some("t".into()), None, Some(user_json("Pat"))) {
        Rehydration::Cached(token, refresh, user) => {
            assert_eq!(token, "t");
            assert!(refresh.is_none());
            assert_eq!(user.name, "Pat");
        }
        other => panic!("expected cached, got {other:?}"),
    }
}

#[test]
fn stale_verification_after_logout_is_discarded() {
    let tmp = tempdir().unwrap();
    SessionStore::open(tmp.path()).save("tok-1", None, &user_json("Pat")).unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let (_, generation) = ctx.begin_rehydration().unwrap();

    // User logs out before the verification response lands.
    ctx.complete_logout();
    ctx.apply_verification(generation, VerifyOutcome::Fresh(staff("Pat")));
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
    assert!(SessionStore::open(tmp.path()).is_empty());
}

#[test]
fn stale_verification_after_relogin_is_discarded() {
    let tmp = tempdir().unwrap();
    SessionStore::open(tmp.path()).save("tok-1", None, &user_json("Old")).unwrap();

    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let (_, old_generation) = ctx.begin_rehydration().unwrap();

    // A new login supersedes the pending verification of the old session.
    ctx.complete_login("tok-2".into(), None, staff("New")).unwrap();
    ctx.apply_verification(old_generation, VerifyOutcome::Fresh(staff("Old")));
    assert_eq!(*ctx.state(), SessionState::Authenticated(staff("New")));
    assert_eq!(ctx.token(), Some("tok-2"));
}

#[test]
fn login_persists_all_three_entries() {
    let tmp = tempdir().unwrap();
    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let _ = ctx.begin_rehydration();
    ctx.complete_login("tok-9".into(), Some("refresh-9".into()), staff("Pat")).unwrap();

    let store = SessionStore::open(tmp.path());
    assert_eq!(store.get(TOKEN_KEY).as_deref(), Some("tok-9"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-9"));
    assert!(store.get(USER_KEY).is_some());
}

#[test]
fn logout_clears_local_state_even_without_server() {
    // The server-side call is the caller's concern and best-effort; local
    // clearing must happen regardless.
    let tmp = tempdir().unwrap();
    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let _ = ctx.begin_rehydration();
    ctx.complete_login("tok-1".into(), Some("refresh-1".into()), staff("Pat")).unwrap();

    ctx.complete_logout();
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
    assert!(ctx.token().is_none());
    assert!(ctx.refresh_token().is_none());
    assert!(SessionStore::open(tmp.path()).is_empty());

    // Idempotent.
    ctx.complete_logout();
    assert_eq!(*ctx.state(), SessionState::Unauthenticated);
}

#[test]
fn update_user_replaces_cache_without_round_trip() {
    let tmp = tempdir().unwrap();
    let mut ctx = SessionContext::new(SessionStore::open(tmp.path()));
    let _ = ctx.begin_rehydration();
    ctx.complete_login("tok-1".into(), None, staff("Pat")).unwrap();

    ctx.update_user(staff("Pat Renamed")).unwrap();
    assert_eq!(*ctx.state(), SessionState::Authenticated(staff("Pat Renamed")));
    let cached: PublicStaff =
        serde_json::from_str(&SessionStore::open(tmp.path()).get(USER_KEY).unwrap()).unwrap();
    assert_eq!(cached.name, "Pat Renamed");
}
