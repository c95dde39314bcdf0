use std::collections::HashSet;
use std::sync::Arc;

use gatekeeper::errors::AppError;
use gatekeeper::models::{DocsLocation, Identity, UiMode, UserSettings};
use gatekeeper::Gatekeeper;
use tokio_test::{assert_err, assert_ok};

fn all_settings() -> Vec<UserSettings> {
    let mut out = Vec::new();
    for mode in [UiMode::Basic, UiMode::Advanced] {
        for canary_mode in [false, true] {
            for docs_location in [DocsLocation::Local, DocsLocation::Remote] {
                out.push(UserSettings {
                    mode,
                    canary_mode,
                    docs_location,
                });
            }
        }
    }
    out
}

#[tokio::test]
async fn test_defaults_for_unknown_identity() {
    let gk = Gatekeeper::ephemeral();
    let settings = assert_ok!(gk.get_settings("someone").await);
    assert_eq!(settings.mode, UiMode::Basic);
    assert!(!settings.canary_mode);
    assert_eq!(settings.docs_location, DocsLocation::Local);
}

#[tokio::test]
async fn test_every_combination_round_trips() {
    let gk = Gatekeeper::ephemeral();
    for settings in all_settings() {
        assert_ok!(gk.set_settings("foo", "foo", settings).await);
        assert_eq!(gk.get_settings("foo").await.unwrap(), settings);
    }
}

#[tokio::test]
async fn test_identities_are_isolated() {
    let gk = Gatekeeper::ephemeral();
    let advanced = UserSettings {
        mode: UiMode::Advanced,
        ..UserSettings::default()
    };
    gk.set_settings("foo", "foo", advanced).await.unwrap();
    assert_eq!(gk.get_settings("bar").await.unwrap(), UserSettings::default());
}

#[tokio::test]
async fn test_cross_identity_write_needs_admin() {
    let admins: HashSet<Identity> = [Identity::new("root").unwrap()].into_iter().collect();
    let gk = Gatekeeper::ephemeral().with_admins(admins);
    let canary = UserSettings {
        canary_mode: true,
        ..UserSettings::default()
    };

    let err = assert_err!(gk.set_settings("bar", "foo", canary).await);
    assert!(matches!(err, AppError::Forbidden(_)));
    assert_eq!(gk.get_settings("foo").await.unwrap(), UserSettings::default());

    assert_ok!(gk.set_settings("root", "foo", canary).await);
    assert_eq!(gk.get_settings("foo").await.unwrap(), canary);
}

#[tokio::test]
async fn test_concurrent_writers_leave_a_whole_record() {
    let gk = Arc::new(Gatekeeper::ephemeral());
    let writes = all_settings().into_iter().map(|settings| {
        let gk = gk.clone();
        tokio::spawn(async move { gk.set_settings("foo", "foo", settings).await })
    });
    for joined in futures::future::join_all(writes).await {
        assert_ok!(joined.unwrap());
    }
    let stored = gk.get_settings("foo").await.unwrap();
    assert!(all_settings().contains(&stored));
}

#[test]
fn test_wire_format_uses_uppercase_enums() {
    let settings = UserSettings {
        mode: UiMode::Advanced,
        canary_mode: true,
        docs_location: DocsLocation::Remote,
    };
    let json = serde_json::to_value(settings).unwrap();
    assert_eq!(json["mode"], "ADVANCED");
    assert_eq!(json["docs_location"], "REMOTE");

    let partial: UserSettings = serde_json::from_str(r#"{"canary_mode": true}"#).unwrap();
    assert_eq!(partial.mode, UiMode::Basic);
    assert!(partial.canary_mode);
}
