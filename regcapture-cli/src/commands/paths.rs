use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

/// Script name used when several libraries are registered at once.
pub const COMBINED_SCRIPT_NAME: &str = "com2reg.reg";

/// Resolve an input library to an absolute path.
///
/// A path that exists as given is made absolute; anything else is looked up on the DLL
/// search path.
pub fn resolve_input(input: &Path) -> anyhow::Result<PathBuf> {
    let absolute = std::path::absolute(input)
        .with_context(|| format!("invalid input path: {}", input.display()))?;
    if absolute.is_file() {
        return Ok(absolute);
    }

    match search_path(input) {
        Some(found) => Ok(found),
        None => bail!(
            "Unable to locate input library '{}' or one of its dependencies.",
            input.display()
        ),
    }
}

/// Where the script goes when `--regfile` is not given.
pub fn default_script_path(inputs: &[PathBuf], cwd: &Path) -> PathBuf {
    match inputs {
        [single] => single.with_extension("reg"),
        _ => cwd.join(COMBINED_SCRIPT_NAME),
    }
}

/// Fail if writing `script` would replace one of the inputs.
pub fn check_not_input(script: &Path, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let script_name = script.to_string_lossy();
    if let Some(input) = inputs
        .iter()
        .find(|input| input.to_string_lossy().eq_ignore_ascii_case(&script_name))
    {
        bail!(
            "Registry file would overwrite the input file: {}",
            input.display()
        );
    }
    Ok(())
}

#[cfg(windows)]
fn search_path(input: &Path) -> Option<PathBuf> {
    use std::os::windows::ffi::OsStringExt;

    use widestring::U16CString;
    use windows_sys::Win32::Storage::FileSystem::SearchPathW;

    let name = U16CString::from_os_str(input.as_os_str()).ok()?;
    let mut buffer = vec![0u16; 261];
    loop {
        // SAFETY: `name` is NUL-terminated and `buffer` holds `buffer.len()` elements.
        let length = unsafe {
            SearchPathW(
                std::ptr::null(),
                name.as_ptr(),
                std::ptr::null(),
                u32::try_from(buffer.len()).ok()?,
                buffer.as_mut_ptr(),
                std::ptr::null_mut(),
            )
        } as usize;

        match length {
            0 => return None,
            n if n < buffer.len() => {
                buffer.truncate(n);
                return Some(PathBuf::from(std::ffi::OsString::from_wide(&buffer)));
            }
            // Too small; `n` includes the terminator.
            n => buffer.resize(n, 0),
        }
    }
}

#[cfg(not(windows))]
fn search_path(_input: &Path) -> Option<PathBuf> {
    None
}
