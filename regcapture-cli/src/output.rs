//! Console messages in the `tool : kind CODE : message` shape build tools parse.

const TOOL: &str = "regcapture";

/// Prints a success message unless `silent`.
pub fn info(silent: bool, message: &str) {
    if !silent {
        println!("{message}");
    }
}

/// Formats an error with its chain of causes.
pub fn format_error(error: &anyhow::Error) -> String {
    format!("{TOOL} : error RC0000 : {error:#}")
}

/// Prints an error with its chain of causes to stderr.
pub fn error(error: &anyhow::Error) {
    eprintln!("{}", format_error(error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn error_chain_is_flattened() {
        let error = Err::<(), _>(anyhow::anyhow!("DllRegisterServer failed"))
            .context("An error occurred during registration of COM library: a.dll")
            .unwrap_err();

        assert_eq!(
            format_error(&error),
            "regcapture : error RC0000 : An error occurred during registration of COM library: \
             a.dll: DllRegisterServer failed"
        );
    }
}
