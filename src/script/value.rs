//! Value lines.

use std::fmt::Write;

use super::ValueTagStyle;
use crate::{
    registry::{RegistryValue, ValueKind},
    Error, Result,
};

/// Escapes a string for use between double quotes: `\` becomes `\\` and `"` becomes `\"`.
///
/// ```rust
/// use regcapture::script::escape;
///
/// assert_eq!(escape(r#"C:\Program Files\"x""#), r#"C:\\Program Files\\\"x\""#);
/// ```
#[must_use]
pub fn escape(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', "\\\"")
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", escape(s))
}

fn hex_list(bytes: &[u8], uppercase: bool) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        // Writing into a String cannot fail.
        let _ = if uppercase {
            write!(out, "{byte:02X}")
        } else {
            write!(out, "{byte:02x}")
        };
    }
    out
}

/// Formats one value as `name=data`, without the line terminator.
///
/// `key` is the section path, used in error messages.
pub(super) fn format_line(
    key: &str,
    value: &RegistryValue,
    style: ValueTagStyle,
) -> Result<String> {
    let name = if value.name.is_empty() {
        "@".to_string()
    } else {
        quoted(&value.name)
    };

    let data = match value.kind() {
        Some(ValueKind::String) => quoted(&value.as_string()),
        Some(ValueKind::DWord) => {
            let dword = value.as_dword().ok_or_else(|| Error::MalformedValue {
                key: key.to_string(),
                value: value.name.clone(),
                message: format!("DWORD value holds {} bytes", value.data.len()),
            })?;
            format!("dword:{dword:08X}")
        }
        Some(ValueKind::MultiString) => match style {
            ValueTagStyle::Compatible => {
                let items: Vec<String> =
                    multi_string_items(value).iter().map(|s| quoted(s)).collect();
                format!("multiStringData:{}", items.join(","))
            }
            ValueTagStyle::Regedit => {
                let mut bytes = Vec::new();
                for item in multi_string_items(value) {
                    bytes.extend_from_slice(item.as_bytes());
                    bytes.push(0);
                }
                bytes.push(0);
                format!("hex(7):{}", hex_list(&bytes, false))
            }
        },
        Some(ValueKind::Binary) => match style {
            ValueTagStyle::Compatible => format!("multiStringData:{}", hex_list(&value.data, true)),
            ValueTagStyle::Regedit => format!("hex:{}", hex_list(&value.data, false)),
        },
        _ => {
            return Err(Error::UnsupportedValueKind {
                key: key.to_string(),
                value: value.name.clone(),
                kind: ValueKind::describe(value.kind),
            })
        }
    };

    Ok(format!("{name}={data}"))
}

/// Multi-string elements; data holding only terminators is the empty list.
fn multi_string_items(value: &RegistryValue) -> Vec<String> {
    let items = value.as_multi_string();
    if items.len() == 1 && items[0].is_empty() {
        Vec::new()
    } else {
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = r"HKEY_CLASSES_ROOT\Sample";

    fn line(value: &RegistryValue) -> String {
        format_line(KEY, value, ValueTagStyle::Compatible).unwrap()
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(
            line(&RegistryValue::string("Path", r"Hello\World")),
            r#""Path"="Hello\\World""#
        );
        assert_eq!(
            line(&RegistryValue::string(r#"Say "hi""#, r#"a"b"#)),
            r#""Say \"hi\""="a\"b""#
        );
    }

    #[test]
    fn default_value_marker() {
        assert_eq!(line(&RegistryValue::string("", "x")), r#"@="x""#);
        assert_eq!(line(&RegistryValue::dword("", 1)), "@=dword:00000001");
    }

    #[test]
    fn dwords() {
        assert_eq!(line(&RegistryValue::dword("N", 255)), r#""N"=dword:000000FF"#);
        assert_eq!(
            line(&RegistryValue::dword("N", 0xDEAD_BEEF)),
            r#""N"=dword:DEADBEEF"#
        );
    }

    #[test]
    fn short_dword_is_malformed() {
        let value = RegistryValue::new("Short", ValueKind::DWord as u32, vec![1, 2]);
        let error = format_line(KEY, &value, ValueTagStyle::Compatible).unwrap_err();
        assert!(matches!(error, Error::MalformedValue { .. }));
    }

    #[test]
    fn multi_strings() {
        let value = RegistryValue::multi_string("List", &["a", r"b\c"]);
        assert_eq!(line(&value), r#""List"=multiStringData:"a","b\\c""#);
        assert_eq!(
            format_line(KEY, &value, ValueTagStyle::Regedit).unwrap(),
            r#""List"=hex(7):61,00,62,5c,63,00,00"#
        );

        let empty = RegistryValue::multi_string::<&str>("Empty", &[]);
        assert_eq!(line(&empty), r#""Empty"=multiStringData:"#);
        assert_eq!(
            format_line(KEY, &empty, ValueTagStyle::Regedit).unwrap(),
            r#""Empty"=hex(7):00"#
        );
    }

    #[test]
    fn binary() {
        let value = RegistryValue::binary("Blob", &[0x00, 0xAB, 0x7F]);
        assert_eq!(line(&value), r#""Blob"=multiStringData:00,AB,7F"#);
        assert_eq!(
            format_line(KEY, &value, ValueTagStyle::Regedit).unwrap(),
            r#""Blob"=hex:00,ab,7f"#
        );
        assert_eq!(line(&RegistryValue::binary("Nil", &[])), r#""Nil"=multiStringData:"#);
    }

    #[test]
    fn unsupported_kinds() {
        for kind in [ValueKind::ExpandString, ValueKind::QWord, ValueKind::None] {
            let value = RegistryValue::new("Odd", kind as u32, vec![0; 8]);
            let error = format_line(KEY, &value, ValueTagStyle::Compatible).unwrap_err();
            assert_eq!(
                error.to_string(),
                format!(
                    "Registry value kind is not supported! Key: '{KEY}', Value: 'Odd', Kind: {kind}"
                )
            );
        }

        let unknown = RegistryValue::new("Odd", 0x99, vec![]);
        let error = format_line(KEY, &unknown, ValueTagStyle::Compatible).unwrap_err();
        assert!(error.to_string().ends_with("Kind: 0x00000099"));
    }
}
