//! Logical working directory for a session.
//!
//! Every command runs in a fresh child process, so a `cd` executed there has
//! no effect on anything that follows. The tracker recognises a pure `cd`,
//! applies it to its own state, and hands every other command the directory
//! it should be started in.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::bash_parser::BashParser;
use crate::error::DirectoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A pure `cd`; the new directory has already been applied.
    ChangeDirectory { from: PathBuf, to: PathBuf },
    /// Anything else; run it as a child process rooted here.
    Run { working_directory: PathBuf },
}

pub struct DirectoryTracker {
    current: PathBuf,
    previous: Option<PathBuf>,
    home: Option<PathBuf>,
    parser: Option<BashParser>,
}

impl DirectoryTracker {
    /// Starts tracking from `start`, which must be an existing directory.
    /// A relative `start` is taken relative to the process directory.
    pub fn new(start: &Path) -> Result<Self, DirectoryError> {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let current = absolute_dir(start, &base)?;
        let parser = match BashParser::new() {
            Ok(parser) => Some(parser),
            Err(err) => {
                warn!(error = %err, "bash grammar unavailable, cd detection falls back to word splitting");
                None
            }
        };
        Ok(Self {
            current,
            previous: None,
            home: dirs::home_dir(),
            parser,
        })
    }

    #[cfg(test)]
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn current(&self) -> &Path {
        &self.current
    }

    pub fn resolve(&mut self, command: &str) -> Result<Resolution, DirectoryError> {
        let Some(target) = self.cd_target(command) else {
            return Ok(Resolution::Run {
                working_directory: self.current.clone(),
            });
        };

        let destination = match target {
            CdTarget::Home => self
                .home
                .clone()
                .ok_or_else(|| DirectoryError::DirectoryNotFound(PathBuf::from("~")))?,
            CdTarget::Previous => self
                .previous
                .clone()
                .ok_or_else(|| DirectoryError::DirectoryNotFound(PathBuf::from("-")))?,
            CdTarget::Path(path) => self.expand_home(&path),
            CdTarget::Quoted(path) => PathBuf::from(path),
        };

        let resolved = absolute_dir(&destination, &self.current)?;
        let from = std::mem::replace(&mut self.current, resolved.clone());
        info!(from = %from.display(), to = %resolved.display(), "changed directory");
        self.previous = Some(from.clone());
        Ok(Resolution::ChangeDirectory { from, to: resolved })
    }

    fn cd_target(&mut self, command: &str) -> Option<CdTarget> {
        let command = command.trim();
        let (name, args) = match self.parser.as_mut() {
            Some(parser) => {
                let parsed = parser.single_command(command)?;
                (parsed.name, parsed.args)
            }
            None => {
                let mut words = command.split_whitespace().map(str::to_string);
                (words.next()?, words.collect())
            }
        };
        if name != "cd" {
            return None;
        }

        match args.as_slice() {
            [] => Some(CdTarget::Home),
            [arg] => {
                let target = literal_argument(arg);
                if target.is_none() {
                    warn!(command, "cd argument is not a literal path, running it as-is");
                }
                target
            }
            _ => None,
        }
    }

    fn expand_home(&self, path: &str) -> PathBuf {
        match (path.strip_prefix('~'), &self.home) {
            (Some(""), Some(home)) => home.clone(),
            (Some(rest), Some(home)) if rest.starts_with('/') => {
                home.join(rest.trim_start_matches('/'))
            }
            _ => PathBuf::from(path),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CdTarget {
    Home,
    Previous,
    /// Unquoted word; a leading `~` still refers to home.
    Path(String),
    Quoted(String),
}

/// Decodes a single shell word into a literal path, or `None` if it depends on
/// expansions the tracker cannot evaluate.
fn literal_argument(arg: &str) -> Option<CdTarget> {
    let target = if let Some(inner) = arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')) {
        CdTarget::Quoted(inner.to_string())
    } else if let Some(inner) = arg.strip_prefix('"').and_then(|a| a.strip_suffix('"')) {
        if inner.contains(['$', '`']) {
            return None;
        }
        CdTarget::Quoted(unescape(inner))
    } else {
        if arg.contains(['$', '`', '*', '?', '[', '\'', '"']) {
            return None;
        }
        // `~user` needs the account database; leave it to the shell.
        if arg.starts_with('~') && arg != "~" && !arg.starts_with("~/") {
            return None;
        }
        let unquoted = unescape(arg);
        match unquoted.as_str() {
            "~" => CdTarget::Home,
            "-" => CdTarget::Previous,
            _ => CdTarget::Path(unquoted),
        }
    };

    let empty = matches!(&target, CdTarget::Path(p) | CdTarget::Quoted(p) if p.is_empty());
    (!empty).then_some(target)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Joins `path` onto `base`, folds `.` and `..` lexically and checks the
/// result is an existing directory.
fn absolute_dir(path: &Path, base: &Path) -> Result<PathBuf, DirectoryError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let normalized = normalize(&joined);
    debug!(path = %normalized.display(), "resolving directory");
    if normalized.is_dir() {
        Ok(normalized)
    } else {
        Err(DirectoryError::DirectoryNotFound(normalized))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping at the root leaves the root in place.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical tempdir");
        fs::create_dir_all(root.join("home/u/project")).expect("create tree");
        (dir, root)
    }

    fn tracker_at(path: &Path) -> DirectoryTracker {
        DirectoryTracker::new(path).expect("tracker")
    }

    #[test]
    fn cd_dot_leaves_directory_unchanged() {
        let (_guard, root) = fixture();
        let start = root.join("home/u");
        let mut tracker = tracker_at(&start);
        let resolution = tracker.resolve("cd .").unwrap();
        assert_eq!(
            resolution,
            Resolution::ChangeDirectory {
                from: start.clone(),
                to: start.clone()
            }
        );
        assert_eq!(tracker.current(), start.as_path());
    }

    #[test]
    fn cd_dotdot_twice_matches_grandparent() {
        let (_guard, root) = fixture();
        let start = root.join("home/u/project");
        let mut tracker = tracker_at(&start);
        tracker.resolve("cd ..").unwrap();
        tracker.resolve("cd ..").unwrap();
        let expected = start.parent().and_then(Path::parent).unwrap();
        assert_eq!(tracker.current(), expected);
    }

    #[test]
    fn parent_folder_scenario() {
        let (_guard, root) = fixture();
        let mut tracker = tracker_at(&root.join("home/u/project"));
        let resolution = tracker.resolve("cd ..").unwrap();
        assert!(matches!(resolution, Resolution::ChangeDirectory { .. }));
        assert_eq!(tracker.current(), root.join("home/u").as_path());
    }

    #[test]
    fn cd_dotdot_at_root_stays_at_root() {
        let mut tracker = tracker_at(Path::new("/"));
        tracker.resolve("cd ..").unwrap();
        assert_eq!(tracker.current(), Path::new("/"));
    }

    #[test]
    fn absolute_and_quoted_paths() {
        let (_guard, root) = fixture();
        fs::create_dir_all(root.join("with space")).unwrap();
        let mut tracker = tracker_at(&root);

        tracker
            .resolve(&format!("cd {}", root.join("home/u").display()))
            .unwrap();
        assert_eq!(tracker.current(), root.join("home/u").as_path());

        tracker
            .resolve(&format!("cd '{}'", root.join("with space").display()))
            .unwrap();
        assert_eq!(tracker.current(), root.join("with space").as_path());

        tracker.resolve("cd ../home/u/project").unwrap();
        assert_eq!(tracker.current(), root.join("home/u/project").as_path());
    }

    #[test]
    fn missing_directory_does_not_mutate_state() {
        let (_guard, root) = fixture();
        let start = root.join("home/u");
        let mut tracker = tracker_at(&start);
        let err = tracker.resolve("cd nowhere").unwrap_err();
        assert_eq!(err, DirectoryError::DirectoryNotFound(start.join("nowhere")));
        assert_eq!(tracker.current(), start.as_path());

        fs::write(start.join("file.txt"), "x").unwrap();
        assert!(tracker.resolve("cd file.txt").is_err());
        assert_eq!(tracker.current(), start.as_path());
    }

    #[test]
    fn home_and_previous_directory() {
        let (_guard, root) = fixture();
        let home = root.join("home/u");
        let mut tracker = tracker_at(&root).with_home(Some(home.clone()));

        tracker.resolve("cd").unwrap();
        assert_eq!(tracker.current(), home.as_path());

        tracker.resolve("cd ~/project").unwrap();
        assert_eq!(tracker.current(), home.join("project").as_path());

        tracker.resolve("cd -").unwrap();
        assert_eq!(tracker.current(), home.as_path());

        tracker.resolve("cd /").unwrap();
        tracker.resolve("cd ~").unwrap();
        assert_eq!(tracker.current(), home.as_path());
    }

    #[test]
    fn non_cd_commands_run_in_current_directory() {
        let (_guard, root) = fixture();
        let mut tracker = tracker_at(&root);
        for command in ["ls -la", "cd /tmp && ls", "cd $HOME", "cd a b", "cd ~root", "cd ~u/project"] {
            assert_eq!(
                tracker.resolve(command).unwrap(),
                Resolution::Run {
                    working_directory: root.clone()
                },
                "{command}"
            );
        }
    }

    #[test]
    fn literal_argument_decoding() {
        assert_eq!(literal_argument("~"), Some(CdTarget::Home));
        assert_eq!(literal_argument("-"), Some(CdTarget::Previous));
        assert_eq!(
            literal_argument(r"my\ dir"),
            Some(CdTarget::Path("my dir".into()))
        );
        assert_eq!(
            literal_argument("\"a b\""),
            Some(CdTarget::Quoted("a b".into()))
        );
        assert_eq!(literal_argument("\"$HOME/x\""), None);
        assert_eq!(literal_argument("src*"), None);
        assert_eq!(literal_argument("~user"), None);
        assert_eq!(
            literal_argument("~/notes"),
            Some(CdTarget::Path("~/notes".into()))
        );
    }
}
