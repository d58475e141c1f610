//! Manifest encoding tests
//!
//! The manifest is the only data the package host reads, so its JSON keys and
//! round-trip behavior are checked here against arbitrary field values.

use proptest::prelude::*;
use template_packer::models::{ManifestError, PackageManifest};

fn manifest_strategy() -> impl Strategy<Value = PackageManifest> {
    (
        "[a-z]{1,8}(\\.[a-z0-9]{1,8}){0,3}",
        "[A-Za-z][A-Za-z0-9 ]{0,39}",
        "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        "[a-z]{1,10}",
        "[0-9]{4}\\.[0-9]",
        ".{0,80}",
    )
        .prop_map(
            |(name, display_name, version, kind, target_platform_version, description)| {
                PackageManifest {
                    name,
                    display_name,
                    version,
                    kind,
                    target_platform_version,
                    description,
                }
            },
        )
}

proptest! {
    #[test]
    fn prop_json_round_trip(manifest in manifest_strategy()) {
        let json = manifest.to_json().unwrap();
        prop_assert_eq!(PackageManifest::from_json(&json).unwrap(), manifest);
    }

    #[test]
    fn prop_generated_manifests_pass_presence_check(manifest in manifest_strategy()) {
        prop_assert!(manifest.ensure_present().is_ok());
    }
}

#[test]
fn test_host_field_names() {
    let json = PackageManifest::default().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let object = value.as_object().unwrap();

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        ["description", "displayName", "name", "type", "unity", "version"]
    );
    assert_eq!(object["type"], "template");
}

#[test]
fn test_missing_keys_take_placeholders() {
    let manifest = PackageManifest::from_json(r#"{"name":"com.acme.template.demo"}"#).unwrap();

    assert_eq!(manifest.name, "com.acme.template.demo");
    assert_eq!(manifest.version, PackageManifest::default().version);
}

#[test]
fn test_empty_version_rejected() {
    let manifest = PackageManifest {
        version: String::new(),
        ..PackageManifest::default()
    };

    assert!(matches!(
        manifest.ensure_present(),
        Err(ManifestError::MissingField("version"))
    ));
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(
        PackageManifest::from_json("{"),
        Err(ManifestError::Parse(_))
    ));
}
