use std::path::PathBuf;

use anyhow::Context;
use regcapture::{
    capture_and_emit, CaptureOptions, CaptureOutcome, Registry, ScriptOptions, ValueTagStyle,
};

use crate::app::Cli;
use crate::commands::paths::{check_not_input, default_script_path, resolve_input};
use crate::output;
use crate::register;

/// Register the libraries named on the command line and write the captured script.
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let libraries = cli
        .libraries
        .iter()
        .map(|input| resolve_input(input))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let script = script_path(cli, &libraries)?;
    check_not_input(&script, &libraries)?;

    if let Some(parent) = script.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let loaded = register::load_all(&libraries)?;
    let registry = register::registry()?;
    crate::cancel::check()?;

    let outcome = capture_and_emit(
        &registry,
        |_: &Registry| register::register_all(&loaded),
        &script,
        &capture_options(cli),
    )
    // The library's messages already carry their cause.
    .map_err(|e| anyhow::Error::msg(e.to_string()))?;

    if let CaptureOutcome::Written { path, .. } = outcome {
        output::info(
            cli.silent,
            &format!("Registry script '{}' generated successfully", path.display()),
        );
    }
    Ok(())
}

fn script_path(cli: &Cli, libraries: &[PathBuf]) -> anyhow::Result<PathBuf> {
    match &cli.regfile {
        Some(regfile) => std::path::absolute(regfile)
            .with_context(|| format!("invalid registry file path: {}", regfile.display())),
        None => {
            let cwd = std::env::current_dir().context("failed to read the working directory")?;
            Ok(default_script_path(libraries, &cwd))
        }
    }
}

fn capture_options(cli: &Cli) -> CaptureOptions {
    let tag_style = if cli.regedit_tags {
        ValueTagStyle::Regedit
    } else {
        ValueTagStyle::Compatible
    };
    CaptureOptions::default()
        .with_volatile(cli.volatile_shadow)
        .with_script(ScriptOptions::default().with_tag_style(tag_style))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsStr;

    #[test]
    fn options_follow_flags() {
        let cli =
            Cli::try_parse_from(["regcapture", "a.dll", "--regedit-tags", "--volatile-shadow"])
                .unwrap();
        let options = capture_options(&cli);

        assert!(options.volatile);
        assert_eq!(options.script.tag_style, ValueTagStyle::Regedit);
        assert_eq!(options.shadow_path, regcapture::capture::DEFAULT_SHADOW_PATH);
    }

    #[test]
    fn explicit_regfile_is_made_absolute() {
        let cli = Cli::try_parse_from(["regcapture", "a.dll", "--regfile", "out/x.reg"]).unwrap();
        let script = script_path(&cli, &[PathBuf::from("/libs/a.dll")]).unwrap();

        assert!(script.is_absolute());
        assert!(script.ends_with("out/x.reg"));
    }

    #[test]
    fn missing_library_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let regfile = dir.path().join("out.reg");
        let cli = Cli::try_parse_from([
            OsStr::new("regcapture"),
            dir.path().join("missing-component.dll").as_os_str(),
            OsStr::new("--regfile"),
            regfile.as_os_str(),
        ])
        .unwrap();

        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("missing-component.dll"));
        assert!(!regfile.exists());
    }
}
