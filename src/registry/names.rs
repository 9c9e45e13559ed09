//! Translation of native key paths into hive notation.
//!
//! The kernel names keys by their position in the `\REGISTRY` namespace, where the
//! predefined roots are aliases: `HKEY_CURRENT_USER` is `\REGISTRY\USER\<sid>`,
//! `HKEY_CLASSES_ROOT` is backed by `\REGISTRY\USER\<sid>_Classes` and
//! `\REGISTRY\MACHINE\SOFTWARE\Classes`, and so on. [`from_native_path`] maps such paths back
//! to the names a person expects to read in a script.

use super::PredefinedKey;

/// One segment of a native path pattern.
#[derive(Debug, Clone, Copy)]
enum Segment {
    Literal(&'static str),
    /// The current user's SID
    UserSid,
    /// The current user's classes hive, `<sid>_Classes`
    UserClasses,
}

impl Segment {
    fn matches(self, part: &str, user_sid: &str) -> bool {
        match self {
            Segment::Literal(literal) => part.eq_ignore_ascii_case(literal),
            Segment::UserSid => part.eq_ignore_ascii_case(user_sid),
            Segment::UserClasses => part
                .get(..user_sid.len())
                .zip(part.get(user_sid.len()..))
                .is_some_and(|(sid, suffix)| {
                    sid.eq_ignore_ascii_case(user_sid) && suffix.eq_ignore_ascii_case("_Classes")
                }),
        }
    }
}

/// A native path prefix and the hive it is an alias of.
struct AliasRule {
    prefix: &'static [Segment],
    hive: PredefinedKey,
}

/// Evaluated in order; the first matching prefix wins.
const ALIAS_RULES: &[AliasRule] = &[
    AliasRule {
        prefix: &[
            Segment::Literal("REGISTRY"),
            Segment::Literal("USER"),
            Segment::UserClasses,
        ],
        hive: PredefinedKey::ClassesRoot,
    },
    AliasRule {
        prefix: &[
            Segment::Literal("REGISTRY"),
            Segment::Literal("USER"),
            Segment::UserSid,
        ],
        hive: PredefinedKey::CurrentUser,
    },
    AliasRule {
        prefix: &[Segment::Literal("REGISTRY"), Segment::Literal("USER")],
        hive: PredefinedKey::Users,
    },
    AliasRule {
        prefix: &[
            Segment::Literal("REGISTRY"),
            Segment::Literal("MACHINE"),
            Segment::Literal("SOFTWARE"),
            Segment::Literal("Classes"),
        ],
        hive: PredefinedKey::ClassesRoot,
    },
    AliasRule {
        prefix: &[Segment::Literal("REGISTRY"), Segment::Literal("MACHINE")],
        hive: PredefinedKey::LocalMachine,
    },
];

/// Rewrites a native key path into hive notation.
///
/// | Native prefix                          | Result                |
/// |----------------------------------------|-----------------------|
/// | `\REGISTRY\USER\<sid>_Classes`         | `HKEY_CLASSES_ROOT`   |
/// | `\REGISTRY\USER\<sid>`                 | `HKEY_CURRENT_USER`   |
/// | `\REGISTRY\USER`                       | `HKEY_USERS`          |
/// | `\REGISTRY\MACHINE\SOFTWARE\Classes`   | `HKEY_CLASSES_ROOT`   |
/// | `\REGISTRY\MACHINE`                    | `HKEY_LOCAL_MACHINE`  |
///
/// Segments are compared case-insensitively. Paths matching none of the prefixes are
/// returned unchanged.
///
/// # Examples
///
/// ```rust
/// use regcapture::registry::names::from_native_path;
///
/// let sid = "S-1-5-21-1-2-3-1001";
/// assert_eq!(
///     from_native_path(r"\REGISTRY\USER\S-1-5-21-1-2-3-1001\Software", sid),
///     r"HKEY_CURRENT_USER\Software"
/// );
/// assert_eq!(
///     from_native_path(r"\REGISTRY\MACHINE\SOFTWARE\Classes\CLSID", sid),
///     r"HKEY_CLASSES_ROOT\CLSID"
/// );
/// ```
#[must_use]
pub fn from_native_path(path: &str, user_sid: &str) -> String {
    let parts: Vec<&str> = path.split('\\').filter(|part| !part.is_empty()).collect();

    ALIAS_RULES
        .iter()
        .find(|rule| {
            parts.len() >= rule.prefix.len()
                && rule
                    .prefix
                    .iter()
                    .zip(&parts)
                    .all(|(segment, part)| segment.matches(part, user_sid))
        })
        .map_or_else(
            || path.to_string(),
            |rule| {
                std::iter::once(rule.hive.name())
                    .chain(parts[rule.prefix.len()..].iter().copied())
                    .collect::<Vec<_>>()
                    .join("\\")
            },
        )
}
