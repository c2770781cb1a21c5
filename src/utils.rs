use std::fmt::Display;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Style for the spinner attached to each running task span.
pub(crate) fn get_style_task() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")?
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "))
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Path leading from the directory `from` to `to`, both normalized first.
///
/// `maps/widget.js.map` seen from `.tmp` is `../maps/widget.js.map`.
pub(crate) fn relative_path(from: &Utf8Path, to: &Utf8Path) -> Utf8PathBuf {
    let from = normalize_path(from);
    let to = normalize_path(to);

    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut ret = Utf8PathBuf::new();
    for _ in common..from.len() {
        ret.push("..");
    }
    for component in &to[common..] {
        ret.push(component.as_str());
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Utf8Path::new("/a/./b/../c.css")),
            Utf8PathBuf::from("/a/c.css")
        );
        assert_eq!(
            normalize_path(Utf8Path::new("../x/y")),
            Utf8PathBuf::from("../x/y")
        );
    }

    #[test]
    fn test_relative_path_sibling_directory() {
        let rel = relative_path(
            Utf8Path::new("/project/.tmp"),
            Utf8Path::new("/project/maps/widget.js.map"),
        );
        assert_eq!(rel, Utf8PathBuf::from("../maps/widget.js.map"));
    }

    #[test]
    fn test_relative_path_same_directory() {
        let rel = relative_path(
            Utf8Path::new("/project/dist"),
            Utf8Path::new("/project/dist/widget.min.js.map"),
        );
        assert_eq!(rel, Utf8PathBuf::from("widget.min.js.map"));
    }
}
