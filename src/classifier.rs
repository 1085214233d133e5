// File-name based input classification.
//
// Rules are tried in priority order against the lower-cased file name. A file
// matching several rules goes to the first one (and we say so in the log); two
// files landing on the same role is a hard conflict.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::KeywordRule;
use crate::error::{ReportError, Result};
use crate::util::file_label;

/// What to do with a file no rule recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedPolicy {
    Reject,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified<R: Ord> {
    files: BTreeMap<R, PathBuf>,
}

impl<R> Classified<R>
where
    R: Copy + Ord + Display,
{
    pub fn get(&self, role: R) -> Option<&Path> {
        self.files.get(&role).map(PathBuf::as_path)
    }

    /// Fails on the first role in `roles` that has no file.
    pub fn require(&self, roles: &[R]) -> Result<()> {
        for role in roles {
            if !self.files.contains_key(role) {
                return Err(ReportError::MissingInput {
                    role: role.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&R, &PathBuf)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

fn matched_roles<R: Copy>(name: &str, rules: &[KeywordRule<R>]) -> Vec<R> {
    let lower = name.to_lowercase();
    rules
        .iter()
        .filter(|rule| {
            rule.keywords
                .iter()
                .any(|kw| lower.contains(&kw.to_lowercase()))
        })
        .map(|rule| rule.role)
        .collect()
}

pub fn classify<R>(
    paths: &[PathBuf],
    rules: &[KeywordRule<R>],
    unmatched: UnmatchedPolicy,
) -> Result<Classified<R>>
where
    R: Copy + Ord + Display,
{
    let mut candidates: BTreeMap<R, Vec<PathBuf>> = BTreeMap::new();
    let mut rejected: Vec<String> = Vec::new();

    for path in paths {
        let name = file_label(path);
        let roles = matched_roles(&name, rules);
        let Some(first) = roles.first().copied() else {
            match unmatched {
                UnmatchedPolicy::Reject => rejected.push(name),
                UnmatchedPolicy::Ignore => debug!(file = %name, "no classification rule matched, ignoring"),
            }
            continue;
        };
        if roles.len() > 1 {
            let all: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
            warn!(
                file = %name,
                matched = %all.join(","),
                chosen = %first,
                "file name matches several roles, using highest priority"
            );
        }
        debug!(file = %name, role = %first, "classified");
        candidates.entry(first).or_default().push(path.clone());
    }

    if !rejected.is_empty() {
        return Err(ReportError::AmbiguousInput {
            reason: "file name matches no known role".to_string(),
            files: rejected,
        });
    }

    let mut files = BTreeMap::new();
    for (role, paths) in candidates {
        if paths.len() > 1 {
            return Err(ReportError::AmbiguousInput {
                reason: format!("several files for role `{}`", role),
                files: paths.iter().map(|p| file_label(p)).collect(),
            });
        }
        if let Some(path) = paths.into_iter().next() {
            files.insert(role, path);
        }
    }
    Ok(Classified { files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportConfig;
    use crate::types::Role;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/in").join(n)).collect()
    }

    #[test]
    fn four_files_map_one_to_one() {
        let config = ReportConfig::default();
        let files = paths(&[
            "Weekly_LOGIN_users.csv",
            "purchase_weekly.csv",
            "ブランド別集計.csv",
            "client_summary.csv",
        ]);
        let c = classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap();
        c.require(&Role::ALL).unwrap();
        assert_eq!(c.len(), 4);
        assert_eq!(c.get(Role::Login), Some(files[0].as_path()));
        assert_eq!(c.get(Role::Purchase), Some(files[1].as_path()));
        assert_eq!(c.get(Role::Brand), Some(files[2].as_path()));
        assert_eq!(c.get(Role::Summary), Some(files[3].as_path()));
    }

    #[test]
    fn duplicate_role_is_ambiguous() {
        let config = ReportConfig::default();
        let files = paths(&["login_a.csv", "ログイン_b.csv", "summary.csv"]);
        let err = classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap_err();
        match err {
            ReportError::AmbiguousInput { files, reason } => {
                assert!(reason.contains("login"));
                assert_eq!(files, vec!["login_a.csv", "ログイン_b.csv"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_file_is_rejected() {
        let config = ReportConfig::default();
        let files = paths(&["login.csv", "notes.csv"]);
        let err = classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap_err();
        assert!(matches!(err, ReportError::AmbiguousInput { ref files, .. } if files == &vec!["notes.csv".to_string()]));
    }

    #[test]
    fn unknown_file_can_be_ignored() {
        let config = ReportConfig::default();
        let files = paths(&["login.csv", "notes.csv"]);
        let c = classify(&files, &config.classification, UnmatchedPolicy::Ignore).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn missing_role_is_named() {
        let config = ReportConfig::default();
        let files = paths(&["login.csv", "purchase.csv", "summary.csv"]);
        let c = classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap();
        let err = c.require(&Role::ALL).unwrap_err();
        assert!(matches!(err, ReportError::MissingInput { ref role } if role == "brand"));
    }

    #[test]
    fn overlapping_keywords_follow_priority() {
        let config = ReportConfig::default();
        // "購入" (purchase) outranks "ブランド" (brand).
        let files = paths(&["ブランド別購入.csv"]);
        let c = classify(&files, &config.classification, UnmatchedPolicy::Reject).unwrap();
        assert!(c.get(Role::Purchase).is_some());
        assert!(c.get(Role::Brand).is_none());
    }
}
