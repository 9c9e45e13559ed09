//! Integration tests for complete capture runs.
//!
//! Every run goes through the in-memory registry backend, so these tests exercise the
//! redirection and cleanup guarantees on any host.

use std::path::{Path, PathBuf};

use regcapture::{
    capture::DEFAULT_SHADOW_PATH,
    prelude::*,
    registry::{Operation, Status},
};

const CLSID: &str = "{0D43FE01-F093-11CF-8940-00A0C9054228}";

fn memory_registry() -> (Registry, MemoryApi) {
    let api = MemoryApi::new();
    (Registry::new(api.clone()), api)
}

fn destination(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("component.reg")
}

fn capture(
    registry: &Registry,
    path: &Path,
    work: impl FnOnce(&Registry) -> Result<()>,
) -> Result<CaptureOutcome> {
    capture_and_emit(registry, work, path, &CaptureOptions::default())
}

/// Writes what a typical in-process COM server writes when registered.
fn register_component(registry: &Registry) -> Result<()> {
    let clsid = registry
        .classes_root()
        .create_subkey(&format!(r"CLSID\{CLSID}"))?;
    clsid.set_string("", "FileSystem Object")?;

    let server = clsid.create_subkey("InprocServer32")?;
    server.set_string("", r"C:\Windows\System32\scrrun.dll")?;
    server.set_string("ThreadingModel", "Both")?;
    clsid.create_subkey("ProgID")?.set_string("", "Scripting.FileSystemObject")?;

    registry
        .local_machine()
        .create_subkey(r"SOFTWARE\Vendor\Component")?
        .set_dword("Version", 255)?;

    registry
        .current_user()
        .create_subkey(r"Software\Vendor\Component")?
        .set_multi_string("Paths", &["a", "b"])?;

    Ok(())
}

fn assert_no_leftovers(registry: &Registry, api: &MemoryApi) {
    assert!(api.overridden_keys().is_empty());
    assert!(registry.active_overrides().is_empty());

    let error = registry
        .current_user()
        .open_subkey(DEFAULT_SHADOW_PATH)
        .unwrap_err();
    assert_eq!(error.status(), Some(Status::FILE_NOT_FOUND));
}

#[test]
fn script_for_a_registered_component() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let outcome = capture(&registry, &path, register_component)?;
    assert_eq!(
        outcome,
        CaptureOutcome::Written {
            path: path.clone(),
            sections: 5
        }
    );

    let expected = format!(
        "REGEDIT4\r\n\
         \r\n\
         [HKEY_CLASSES_ROOT\\CLSID\\{CLSID}]\r\n\
         @=\"FileSystem Object\"\r\n\
         \r\n\
         [HKEY_CLASSES_ROOT\\CLSID\\{CLSID}\\InprocServer32]\r\n\
         @=\"C:\\\\Windows\\\\System32\\\\scrrun.dll\"\r\n\
         \"ThreadingModel\"=\"Both\"\r\n\
         \r\n\
         [HKEY_CLASSES_ROOT\\CLSID\\{CLSID}\\ProgID]\r\n\
         @=\"Scripting.FileSystemObject\"\r\n\
         \r\n\
         [HKEY_CURRENT_USER\\Software\\Vendor\\Component]\r\n\
         \"Paths\"=multiStringData:\"a\",\"b\"\r\n\
         \r\n\
         [HKEY_LOCAL_MACHINE\\SOFTWARE\\Vendor\\Component]\r\n\
         \"Version\"=dword:000000FF\r\n\
         \r\n"
    );
    assert_eq!(std::fs::read_to_string(&path)?, expected);

    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn script_is_utf8_without_bom() -> Result<()> {
    let (registry, _) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    capture(&registry, &path, |registry| {
        registry
            .classes_root()
            .create_subkey("Grüße")?
            .set_string("", "Größe")
    })?;

    let bytes = std::fs::read(&path)?;
    assert!(bytes.starts_with(b"REGEDIT4\r\n"));
    assert!(String::from_utf8(bytes)
        .unwrap()
        .contains("[HKEY_CLASSES_ROOT\\Grüße]\r\n@=\"Größe\"\r\n"));
    Ok(())
}

#[test]
fn emission_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let first = dir.path().join("first.reg");
    let second = dir.path().join("second.reg");

    let (registry, _) = memory_registry();
    capture(&registry, &first, register_component)?;
    capture(&registry, &second, register_component)?;
    assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);

    // Same content written in a different order
    let (registry, _) = memory_registry();
    let third = dir.path().join("third.reg");
    capture(&registry, &third, |registry| {
        registry
            .current_user()
            .create_subkey(r"Software\Vendor\Component")?
            .set_multi_string("Paths", &["a", "b"])?;
        registry
            .local_machine()
            .create_subkey(r"SOFTWARE\Vendor\Component")?
            .set_dword("Version", 255)?;

        let clsid = registry
            .classes_root()
            .create_subkey(&format!(r"CLSID\{CLSID}"))?;
        clsid.create_subkey("ProgID")?.set_string("", "Scripting.FileSystemObject")?;
        let server = clsid.create_subkey("InprocServer32")?;
        server.set_string("ThreadingModel", "Both")?;
        server.set_string("", r"C:\Windows\System32\scrrun.dll")?;
        clsid.set_string("", "FileSystem Object")
    })?;
    assert_eq!(std::fs::read(&first)?, std::fs::read(&third)?);
    Ok(())
}

#[test]
fn real_hives_are_never_touched() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;

    capture(&registry, &destination(&dir), |registry| {
        register_component(registry)?;

        // While redirected, the callback reads back what it wrote.
        let server = registry
            .classes_root()
            .open_subkey(&format!(r"CLSID\{CLSID}\InprocServer32"))?;
        assert_eq!(server.value("ThreadingModel")?.as_string(), "Both");
        assert!(server.real_name()?.contains(DEFAULT_SHADOW_PATH));
        Ok(())
    })?;

    assert!(!api.key_exists(PredefinedKey::ClassesRoot, &format!(r"CLSID\{CLSID}")));
    assert!(!api.key_exists(PredefinedKey::LocalMachine, r"SOFTWARE\Vendor"));
    assert!(!api.key_exists(PredefinedKey::CurrentUser, r"Software\Vendor"));
    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn existing_real_data_is_not_captured() -> Result<()> {
    let (registry, api) = memory_registry();
    registry
        .classes_root()
        .create_subkey(".existing")?
        .set_string("", "Existing.File")?;
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    capture(&registry, &path, |registry| {
        assert!(registry.classes_root().open_subkey(".existing").is_err());
        registry
            .classes_root()
            .create_subkey(".new")?
            .set_string("", "New.File")
    })?;

    let script = std::fs::read_to_string(&path)?;
    assert!(script.contains("[HKEY_CLASSES_ROOT\\.new]"));
    assert!(!script.contains(".existing"));
    assert_eq!(
        api.read_value(PredefinedKey::ClassesRoot, ".existing", "")
            .map(|(kind, _)| kind),
        Some(ValueKind::String as u32)
    );
    Ok(())
}

#[test]
fn failing_callback_cleans_up() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let error = capture_and_emit(
        &registry,
        |registry: &Registry| -> std::result::Result<(), std::io::Error> {
            registry
                .classes_root()
                .create_subkey("Partial")
                .map_err(std::io::Error::other)?;
            Err(std::io::Error::other("DllRegisterServer returned 0x80004005"))
        },
        &path,
        &CaptureOptions::default(),
    )
    .unwrap_err();

    match &error {
        Error::Registration(source) => {
            assert_eq!(source.to_string(), "DllRegisterServer returned 0x80004005");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!path.exists());
    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn nothing_to_register() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let outcome = capture(&registry, &path, |_| Ok(()))?;
    assert_eq!(outcome, CaptureOutcome::NothingToRegister);
    assert!(!path.exists());
    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn existing_script_is_kept_when_nothing_is_registered() -> Result<()> {
    let (registry, _) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);
    std::fs::write(&path, "previous")?;

    capture(&registry, &path, |_| Ok(()))?;
    assert_eq!(std::fs::read_to_string(&path)?, "previous");
    Ok(())
}

#[test]
fn empty_leaf_keys_are_sections() -> Result<()> {
    let (registry, _) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let outcome = capture(&registry, &path, |registry| {
        registry.classes_root().create_subkey(r"Component.Category\Implemented")?;
        Ok(())
    })?;

    assert!(matches!(outcome, CaptureOutcome::Written { sections: 1, .. }));
    assert_eq!(
        std::fs::read_to_string(&path)?,
        "REGEDIT4\r\n\r\n[HKEY_CLASSES_ROOT\\Component.Category\\Implemented]\r\n\r\n"
    );
    Ok(())
}

#[test]
fn unsupported_value_writes_nothing() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);
    std::fs::write(&path, "previous")?;

    let error = capture(&registry, &path, |registry| {
        let key = registry.classes_root().create_subkey(r"CLSID\Odd")?;
        key.set_string("Fine", "value")?;
        key.set_value(&RegistryValue::new("Size", ValueKind::QWord as u32, vec![0; 8]))
    })
    .unwrap_err();

    match error {
        Error::UnsupportedValueKind { key, value, kind } => {
            assert_eq!(key, r"HKEY_CLASSES_ROOT\CLSID\Odd");
            assert_eq!(value, "Size");
            assert_eq!(kind, "QWord");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read_to_string(&path)?, "previous");
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn rejected_redirection_is_fatal_and_cleaned_up() -> Result<()> {
    let (registry, api) = memory_registry();
    api.reject_overrides(true);
    let dir = tempfile::tempdir()?;
    let mut called = false;

    let error = capture(&registry, &destination(&dir), |_| {
        called = true;
        Ok(())
    })
    .unwrap_err();

    assert!(!called);
    assert_eq!(error.operation(), Some(Operation::OverrideKey));
    assert_eq!(error.status(), Some(Status::ACCESS_DENIED));

    api.reject_overrides(false);
    assert_no_leftovers(&registry, &api);
    Ok(())
}

#[test]
fn failed_teardown_is_reported() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let error = capture(&registry, &path, |registry| {
        registry.classes_root().create_subkey("Ignored")?;
        api.reject_overrides(true);
        Ok(())
    })
    .unwrap_err();

    assert_eq!(error.operation(), Some(Operation::OverrideKey));
    assert!(!path.exists());
    // HKEY_CURRENT_USER is still redirected, yet the real shadow root is gone.
    assert_eq!(api.overridden_keys().len(), 3);
    assert!(!api.key_exists(PredefinedKey::CurrentUser, DEFAULT_SHADOW_PATH));

    api.reject_overrides(false);
    Ok(())
}

#[test]
fn redirections_are_removed_in_reverse_order() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;

    capture(&registry, &destination(&dir), register_component)?;
    assert_eq!(
        api.override_removals(),
        vec![
            PredefinedKey::CurrentUser,
            PredefinedKey::LocalMachine,
            PredefinedKey::ClassesRoot,
        ]
    );

    let (registry, api) = memory_registry();
    capture(&registry, &destination(&dir), |_| {
        Err(Error::InvalidName("failed".into()))
    })
    .unwrap_err();
    assert_eq!(
        api.override_removals(),
        vec![
            PredefinedKey::CurrentUser,
            PredefinedKey::LocalMachine,
            PredefinedKey::ClassesRoot,
        ]
    );
    Ok(())
}

#[test]
fn panicking_callback_cleans_up_in_reverse_order() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        capture(&registry, &path, |registry| {
            registry.classes_root().create_subkey("Partial")?;
            panic!("registration crashed");
        })
    }));

    assert!(result.is_err());
    assert_eq!(
        api.override_removals(),
        vec![
            PredefinedKey::CurrentUser,
            PredefinedKey::LocalMachine,
            PredefinedKey::ClassesRoot,
        ]
    );
    assert_no_leftovers(&registry, &api);
    assert!(!api.key_exists(PredefinedKey::ClassesRoot, "Partial"));
    assert!(!path.exists());
    Ok(())
}

#[test]
fn degenerate_shadow_paths_are_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);

    for shadow_path in ["", "\\", r"\\\"] {
        let (registry, api) = memory_registry();
        registry
            .current_user()
            .create_subkey(r"Software\Precious")?
            .set_dword("Kept", 1)?;

        let error = capture_and_emit(
            &registry,
            register_component,
            &path,
            &CaptureOptions::default().with_shadow_path(shadow_path),
        )
        .unwrap_err();

        assert!(matches!(error, Error::InvalidName(_)), "{shadow_path:?}: {error}");
        assert!(api.key_exists(PredefinedKey::CurrentUser, r"Software\Precious"));
        assert!(api
            .read_value(PredefinedKey::CurrentUser, r"Software\Precious", "Kept")
            .is_some());
        assert!(api.overridden_keys().is_empty());
        assert!(!path.exists());
    }
    Ok(())
}

#[test]
fn shadow_path_separators_are_ignored() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let options = CaptureOptions::default().with_shadow_path(r"\Shadow\");

    let outcome = capture_and_emit(&registry, register_component, &destination(&dir), &options)?;
    assert!(matches!(outcome, CaptureOutcome::Written { sections: 5, .. }));
    assert!(!api.key_exists(PredefinedKey::CurrentUser, "Shadow"));
    assert!(api.key_exists(PredefinedKey::CurrentUser, "Software"));
    Ok(())
}

#[test]
fn volatile_shadow_refuses_stable_keys() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let options = CaptureOptions::default().with_volatile(true);

    let error = capture_and_emit(
        &registry,
        |registry: &Registry| registry.classes_root().create_subkey("Stable").map(drop),
        &destination(&dir),
        &options,
    )
    .unwrap_err();
    assert_eq!(error.status(), Some(Status::CHILD_MUST_BE_VOLATILE));
    assert_no_leftovers(&registry, &api);

    let outcome = capture_and_emit(
        &registry,
        |registry: &Registry| {
            registry
                .classes_root()
                .create_subkey_with(
                    "Transient",
                    KeyRights::FULL_CONTROL,
                    KeyOptions::default(),
                    true,
                )?
                .set_dword("", 1)
        },
        &destination(&dir),
        &options,
    )?;
    assert!(matches!(outcome, CaptureOutcome::Written { sections: 1, .. }));
    Ok(())
}

#[test]
fn custom_shadow_path() -> Result<()> {
    let (registry, api) = memory_registry();
    let dir = tempfile::tempdir()?;
    let options = CaptureOptions::default().with_shadow_path(r"Software\Custom\Capture");

    capture_and_emit(
        &registry,
        |registry: &Registry| {
            let key = registry.classes_root().create_subkey(".custom")?;
            assert_eq!(
                key.real_name()?,
                r"HKEY_CURRENT_USER\Software\Custom\Capture\HKEY_CLASSES_ROOT\.custom"
            );
            Ok::<(), Error>(())
        },
        &destination(&dir),
        &options,
    )?;

    assert!(!api.key_exists(PredefinedKey::CurrentUser, r"Software\Custom\Capture"));
    Ok(())
}

#[test]
fn regedit_tags() -> Result<()> {
    let (registry, _) = memory_registry();
    let dir = tempfile::tempdir()?;
    let path = destination(&dir);
    let options = CaptureOptions::default()
        .with_script(ScriptOptions::default().with_tag_style(ValueTagStyle::Regedit));

    capture_and_emit(
        &registry,
        |registry: &Registry| {
            let key = registry.local_machine().create_subkey(r"SOFTWARE\Tags")?;
            key.set_binary("Blob", &[0xCA, 0xFE])?;
            key.set_multi_string("List", &["x"])
        },
        &path,
        &options,
    )?;

    assert_eq!(
        std::fs::read_to_string(&path)?,
        "REGEDIT4\r\n\r\n[HKEY_LOCAL_MACHINE\\SOFTWARE\\Tags]\r\n\
         \"Blob\"=hex:ca,fe\r\n\"List\"=hex(7):78,00,00\r\n\r\n"
    );
    Ok(())
}
