//! Linux distribution detection from os-release metadata
//!
//! Variant rules are checked before family rules: a CachyOS host also reports
//! `ID_LIKE=arch`, so matching the family first would misclassify it.

use crate::platform::DistroFamily;
use std::collections::HashMap;

/// Parsed `os-release` key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    /// Parse os-release content.
    ///
    /// Returns `None` when no `KEY=VALUE` line could be read, which callers
    /// treat as malformed metadata.
    pub fn parse(content: &str) -> Option<Self> {
        let mut fields = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                continue;
            }
            fields.insert(key.to_string(), unquote(value.trim()));
        }

        if fields.is_empty() {
            None
        } else {
            Some(Self { fields })
        }
    }

    /// Lowercased `ID`
    pub fn id(&self) -> Option<String> {
        self.fields.get("ID").map(|s| s.to_ascii_lowercase())
    }

    /// Lowercased, whitespace-separated `ID_LIKE` entries
    pub fn id_like(&self) -> Vec<String> {
        self.fields
            .get("ID_LIKE")
            .map(|s| {
                s.split_whitespace()
                    .map(|t| t.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

fn unquote(value: &str) -> String {
    let trimmed = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    trimmed.replace("\\\"", "\"")
}

/// A named distribution built on top of a generic family
struct VariantRule {
    id: &'static str,
    family: DistroFamily,
}

/// Specific variants, checked in order before any family rule.
/// If two variants ever share an `ID`, the first entry wins.
const VARIANT_RULES: &[VariantRule] = &[
    VariantRule { id: "cachyos", family: DistroFamily::Arch },
    VariantRule { id: "manjaro", family: DistroFamily::Arch },
    VariantRule { id: "endeavouros", family: DistroFamily::Arch },
    VariantRule { id: "ubuntu", family: DistroFamily::Debian },
    VariantRule { id: "pop", family: DistroFamily::Debian },
    VariantRule { id: "linuxmint", family: DistroFamily::Debian },
    VariantRule { id: "nobara", family: DistroFamily::Fedora },
];

/// Generic family markers, matched against `ID` then `ID_LIKE`
const FAMILY_RULES: &[(&str, DistroFamily)] = &[
    ("arch", DistroFamily::Arch),
    ("debian", DistroFamily::Debian),
    ("fedora", DistroFamily::Fedora),
    ("rhel", DistroFamily::Fedora),
    ("centos", DistroFamily::Fedora),
    ("suse", DistroFamily::Suse),
    ("opensuse", DistroFamily::Suse),
];

/// Outcome of classifying an os-release file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroMatch {
    pub distro: Option<String>,
    pub family: DistroFamily,
}

/// Classify an os-release record into a distro name and family
pub fn classify(release: &OsRelease) -> DistroMatch {
    let id = release.id();
    let id_like = release.id_like();

    if let Some(ref id) = id {
        if let Some(rule) = VARIANT_RULES.iter().find(|r| r.id == id) {
            return DistroMatch {
                distro: Some(rule.id.to_string()),
                family: rule.family,
            };
        }
    }

    let family = id
        .iter()
        .chain(id_like.iter())
        .find_map(|marker| family_for(marker))
        .unwrap_or(DistroFamily::Other);

    DistroMatch {
        distro: id,
        family,
    }
}

fn family_for(marker: &str) -> Option<DistroFamily> {
    FAMILY_RULES
        .iter()
        .find(|(name, _)| *name == marker || marker.starts_with(&format!("{}-", name)))
        .map(|(_, family)| *family)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quoted_values() {
        let release = OsRelease::parse(
            "NAME=\"CachyOS Linux\"\nID=cachyos\nID_LIKE=arch\n# comment\nBUILD_ID='rolling'\n",
        )
        .unwrap();
        assert_eq!(release.get("NAME"), Some("CachyOS Linux"));
        assert_eq!(release.id().as_deref(), Some("cachyos"));
        assert_eq!(release.id_like(), vec!["arch"]);
        assert_eq!(release.get("BUILD_ID"), Some("rolling"));
    }

    #[test]
    fn parse_garbage_is_none() {
        assert!(OsRelease::parse("not an os release\n\n").is_none());
        assert!(OsRelease::parse("").is_none());
    }

    #[test]
    fn variant_wins_over_generic_family() {
        let release = OsRelease::parse("ID=cachyos\nID_LIKE=arch\n").unwrap();
        let matched = classify(&release);
        assert_eq!(matched.distro.as_deref(), Some("cachyos"));
        assert_eq!(matched.family, DistroFamily::Arch);
    }

    #[test]
    fn generic_family_from_id_like() {
        let release = OsRelease::parse("ID=rocky\nID_LIKE=\"rhel centos fedora\"\n").unwrap();
        let matched = classify(&release);
        assert_eq!(matched.distro.as_deref(), Some("rocky"));
        assert_eq!(matched.family, DistroFamily::Fedora);
    }

    #[test]
    fn opensuse_hyphenated_id() {
        let release = OsRelease::parse("ID=opensuse-tumbleweed\nID_LIKE=\"opensuse suse\"\n").unwrap();
        assert_eq!(classify(&release).family, DistroFamily::Suse);
    }

    #[test]
    fn unknown_distro_is_other() {
        let release = OsRelease::parse("ID=gentoo\n").unwrap();
        let matched = classify(&release);
        assert_eq!(matched.distro.as_deref(), Some("gentoo"));
        assert_eq!(matched.family, DistroFamily::Other);
    }
}
