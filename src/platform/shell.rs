//! Reproducible-shell detection

use crate::platform::HostEnv;

/// Variables set by pinned development shells (nix-shell/nix develop,
/// devbox, guix shell, devenv)
const SHELL_MARKERS: &[&str] = &[
    "IN_NIX_SHELL",
    "DEVBOX_SHELL_ENABLED",
    "GUIX_ENVIRONMENT",
    "DEVENV_ROOT",
];

/// Whether the environment indicates a reproducible shell.
///
/// Empty values do not count; `DEVBOX_SHELL_ENABLED=0` does not count either.
pub fn in_reproducible_shell(env: &HostEnv) -> bool {
    SHELL_MARKERS.iter().any(|name| match env.get(name) {
        Some(value) => !value.is_empty() && value != "0",
        None => false,
    })
}

/// Name of the first marker found, for diagnostics
pub fn detected_marker(env: &HostEnv) -> Option<&'static str> {
    SHELL_MARKERS
        .iter()
        .copied()
        .find(|name| env.get(name).is_some_and(|v| !v.is_empty() && v != "0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nix_shell_detected() {
        let env = HostEnv::from_pairs([("IN_NIX_SHELL", "impure")]);
        assert!(in_reproducible_shell(&env));
        assert_eq!(detected_marker(&env), Some("IN_NIX_SHELL"));
    }

    #[test]
    fn empty_or_disabled_markers_ignored() {
        let env = HostEnv::from_pairs([("IN_NIX_SHELL", ""), ("DEVBOX_SHELL_ENABLED", "0")]);
        assert!(!in_reproducible_shell(&env));
    }

    #[test]
    fn plain_environment() {
        let env = HostEnv::from_pairs([("PATH", "/usr/bin")]);
        assert!(!in_reproducible_shell(&env));
        assert_eq!(detected_marker(&env), None);
    }
}
