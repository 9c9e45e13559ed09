//! Fixtures shared by the unit tests.

use crate::{
    registry::{MemoryApi, Registry},
    Result,
};

/// Shadow root used by tests that build a shadow tree by hand.
pub const SHADOW: &str = r"Software\Tests\Shadow";

/// CLSID written by [`register_sample_component`].
pub const SAMPLE_CLSID: &str = "{6C3F7D1A-95C2-4E5B-8A0D-3B7E1F2A4C90}";

/// A registry over a fresh in-memory backend, plus a handle to inspect the backend.
pub fn memory_registry() -> (Registry, MemoryApi) {
    let api = MemoryApi::new();
    (Registry::new(api.clone()), api)
}

/// Writes what a typical in-process COM server writes from `DllRegisterServer`.
pub fn register_sample_component(registry: &Registry) -> Result<()> {
    let classes = registry.classes_root();

    let clsid = classes.create_subkey(&format!(r"CLSID\{SAMPLE_CLSID}"))?;
    clsid.set_string("", "Sample Component")?;
    clsid.create_subkey("ProgID")?.set_string("", "Sample.Component.1")?;

    let server = clsid.create_subkey("InprocServer32")?;
    server.set_string("", r"C:\Program Files\Sample\sample.dll")?;
    server.set_string("ThreadingModel", "Apartment")?;

    let progid = classes.create_subkey("Sample.Component.1")?;
    progid.set_string("", "Sample Component")?;
    progid.create_subkey("CLSID")?.set_string("", SAMPLE_CLSID)?;

    registry
        .local_machine()
        .create_subkey(r"SOFTWARE\Sample")?
        .set_dword("Installed", 1)?;

    Ok(())
}
