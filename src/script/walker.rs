//! Depth-first walk over the shadow tree.

use super::{value::format_line, ScriptOptions, LINE_END};
use crate::{registry::RegistryKey, Result};

/// Script text produced for a subtree, and how many sections it holds.
#[derive(Debug, Default)]
pub(super) struct Fragment {
    pub text: String,
    pub sections: usize,
}

impl Fragment {
    fn append(&mut self, other: Fragment) {
        self.text.push_str(&other.text);
        self.sections += other.sections;
    }
}

/// The section path of `key`: its logical name relative to `root_name`.
///
/// `None` for the root itself.
fn relative_name<'k>(key: &'k RegistryKey<'_>, root_name: &str) -> Option<&'k str> {
    let name = key.name();
    if name.eq_ignore_ascii_case(root_name) {
        return None;
    }

    Some(
        name.get(..root_name.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(root_name))
            .and_then(|_| name[root_name.len()..].strip_prefix('\\'))
            .unwrap_or(name),
    )
}

/// Emits `key` if it is real, then every subkey in sorted order.
pub(super) fn walk(
    key: &RegistryKey<'_>,
    root_name: &str,
    options: &ScriptOptions,
) -> Result<Fragment> {
    let mut fragment = Fragment::default();

    if let Some(path) = relative_name(key, root_name) {
        let info = key.info()?;
        let placeholder = !path.contains('\\');

        if info.values != 0 || (info.sub_keys == 0 && !placeholder) {
            fragment = section(key, path, options)?;
        }
    }

    for name in key.subkey_names()? {
        let child = key.open_subkey(&name)?;
        fragment.append(walk(&child, root_name, options)?);
    }

    Ok(fragment)
}

fn section(key: &RegistryKey<'_>, path: &str, options: &ScriptOptions) -> Result<Fragment> {
    let mut text = format!("[{path}]{LINE_END}");
    for name in key.value_names()? {
        let value = key.value(&name)?;
        text.push_str(&format_line(path, &value, options.tag_style)?);
        text.push_str(LINE_END);
    }
    text.push_str(LINE_END);

    Ok(Fragment { text, sections: 1 })
}
