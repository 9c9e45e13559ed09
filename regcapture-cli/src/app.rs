use std::path::PathBuf;

use clap::Parser;

/// regcapture - generates a registry script from one or more native COM libraries
///
/// Every library is registered with its registry writes redirected into a private shadow
/// key; the captured keys are written as a REGEDIT4 script and the real registry is left
/// untouched.
#[derive(Debug, Parser)]
#[command(name = "regcapture", version, about, long_about = None)]
pub struct Cli {
    /// COM libraries to register. Names that are not found as given are looked up on the
    /// DLL search path.
    #[arg(value_name = "LIBRARY", required = true)]
    pub libraries: Vec<PathBuf>,

    /// Write the script to this file. Defaults to the input with a .reg extension, or
    /// com2reg.reg in the working directory for several inputs.
    #[arg(long, value_name = "FILE")]
    pub regfile: Option<PathBuf>,

    /// Prevent displaying of success messages.
    #[arg(short, long)]
    pub silent: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, conflicts_with = "silent")]
    pub verbose: bool,

    /// Tag binary and multi-string values with hex: and hex(7): as regedit expects.
    #[arg(long)]
    pub regedit_tags: bool,

    /// Create the shadow key as volatile. Registration routines that create stable keys
    /// fail with this set.
    #[arg(long)]
    pub volatile_shadow: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "regcapture",
            "a.dll",
            "b.dll",
            "--regfile",
            "out.reg",
            "--silent",
            "--regedit-tags",
        ])
        .unwrap();

        assert_eq!(cli.libraries, vec![PathBuf::from("a.dll"), PathBuf::from("b.dll")]);
        assert_eq!(cli.regfile, Some(PathBuf::from("out.reg")));
        assert!(cli.silent);
        assert!(cli.regedit_tags);
        assert!(!cli.volatile_shadow);
    }

    #[test]
    fn requires_a_library() {
        assert!(Cli::try_parse_from(["regcapture"]).is_err());
    }

    #[test]
    fn silent_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["regcapture", "a.dll", "-s", "-v"]).is_err());
    }
}
