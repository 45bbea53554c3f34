//! Compiler flag layers

use crate::context::Profile;
use crate::platform::OsFamily;
use crate::toolchain::{CompilerFamily, FlagSyntax};

/// Base flags for a build profile
pub fn profile_layer(profile: Profile, syntax: FlagSyntax) -> Vec<String> {
    let flags: &[&str] = match (syntax, profile) {
        (FlagSyntax::Gnu, Profile::Debug) => &["-O0", "-g"],
        (FlagSyntax::Gnu, Profile::Release) => &["-O2", "-DNDEBUG"],
        (FlagSyntax::Gnu, Profile::RelWithDebInfo) => &["-O2", "-g", "-DNDEBUG"],
        (FlagSyntax::Gnu, Profile::MinSizeRel) => &["-Os", "-DNDEBUG"],
        (FlagSyntax::Msvc, Profile::Debug) => &["/Od", "/Zi"],
        (FlagSyntax::Msvc, Profile::Release) => &["/O2", "/DNDEBUG"],
        (FlagSyntax::Msvc, Profile::RelWithDebInfo) => &["/O2", "/Zi", "/DNDEBUG"],
        (FlagSyntax::Msvc, Profile::MinSizeRel) => &["/O1", "/DNDEBUG"],
    };
    to_owned(flags)
}

/// Flags every build on `os` needs
pub fn platform_layer(os: OsFamily, syntax: FlagSyntax) -> Vec<String> {
    let flags: &[&str] = match (os, syntax) {
        (OsFamily::Windows, FlagSyntax::Msvc) => &["/EHsc", "/DWIN32", "/D_WINDOWS"],
        (OsFamily::Windows, FlagSyntax::Gnu) => &["-DWIN32", "-D_WINDOWS"],
        (OsFamily::Linux, _) => &["-fPIC", "-pthread"],
        (OsFamily::Macos, _) => &["-fPIC"],
        (OsFamily::Wasm, _) => &["-sWASM=1"],
    };
    to_owned(flags)
}

/// Language standard and warnings in the compiler's own syntax
pub fn toolchain_layer(family: CompilerFamily, cxx_standard: &str) -> Vec<String> {
    match family.flag_syntax() {
        FlagSyntax::Msvc => vec![
            format!("/std:{}", cxx_standard),
            "/W4".to_string(),
            "/permissive-".to_string(),
        ],
        FlagSyntax::Gnu => {
            let mut flags = vec![
                format!("-std={}", cxx_standard),
                "-Wall".to_string(),
                "-Wextra".to_string(),
            ];
            if family == CompilerFamily::Clang {
                flags.push("-fcolor-diagnostics".to_string());
            }
            flags
        }
    }
}

/// Flags that replace an earlier flag with the same key instead of adding to it
fn flag_key(flag: &str) -> Option<String> {
    if flag.starts_with("-std=") {
        return Some("-std=".to_string());
    }
    if flag.starts_with("/std:") {
        return Some("/std:".to_string());
    }
    if flag.len() > 2 && (flag.starts_with("-O") || flag.starts_with("/O")) {
        return Some(flag[..2].to_string());
    }
    for prefix in ["-D", "/D"] {
        if let Some(define) = flag.strip_prefix(prefix) {
            let name = define.split('=').next().unwrap_or(define);
            if !name.is_empty() {
                return Some(format!("{}{}", prefix, name));
            }
        }
    }
    None
}

/// Append `layer` onto `flags`; keyed flags overwrite in place
pub fn merge(flags: &mut Vec<String>, layer: &[String]) {
    for flag in layer {
        let existing = flag_key(flag)
            .and_then(|key| flags.iter().position(|f| flag_key(f).as_deref() == Some(key.as_str())));
        match existing {
            Some(pos) => flags[pos] = flag.clone(),
            None => flags.push(flag.clone()),
        }
    }
}

fn to_owned(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|f| f.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(flags: &[&str]) -> Vec<String> {
        to_owned(flags)
    }

    #[test]
    fn keyed_flags_replace_in_place() {
        let mut flags = strings(&["-O2", "-g", "-DNDEBUG", "-std=c++20"]);
        merge(&mut flags, &strings(&["-O3", "-std=c++23", "-DNDEBUG=0", "-march=native"]));
        assert_eq!(flags, strings(&["-O3", "-g", "-DNDEBUG=0", "-std=c++23", "-march=native"]));
    }

    #[test]
    fn msvc_keys() {
        let mut flags = strings(&["/O2", "/std:c++20", "/DWIN32"]);
        merge(&mut flags, &strings(&["/Od", "/std:c++latest", "/DWIN32=1"]));
        assert_eq!(flags, strings(&["/Od", "/std:c++latest", "/DWIN32=1"]));
    }

    #[test]
    fn unkeyed_flags_append() {
        let mut flags = strings(&["-Wall"]);
        merge(&mut flags, &strings(&["-Wall", "-O"]));
        assert_eq!(flags, strings(&["-Wall", "-Wall", "-O"]));
    }

    #[test]
    fn every_layer_is_non_empty() {
        for profile in Profile::all() {
            for syntax in [FlagSyntax::Gnu, FlagSyntax::Msvc] {
                assert!(!profile_layer(*profile, syntax).is_empty());
            }
        }
        for os in [OsFamily::Linux, OsFamily::Macos, OsFamily::Windows, OsFamily::Wasm] {
            assert!(!platform_layer(os, FlagSyntax::Gnu).is_empty());
        }
        assert_eq!(toolchain_layer(CompilerFamily::Msvc, "c++20")[0], "/std:c++20");
    }
}
