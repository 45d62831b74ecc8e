// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Extract `{owner, repo}` from a repository URL.
///
/// Accepts the forms clients actually send:
/// - `https://github.com/owner/repo` (optionally `.git`, trailing slash,
///   extra path segments)
/// - `git@github.com:owner/repo.git`
/// - bare `owner/repo`
///
/// Returns `None` for anything that does not contain both parts.
pub fn extract_owner_and_repo(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    // scp-like syntax: git@host:owner/repo.git
    let path = if let Some((_, rest)) = url.split_once(':') {
        if url.contains("://") {
            // scheme URL: strip scheme and host
            let after_scheme = url.split_once("://").map(|(_, r)| r)?;
            after_scheme.split_once('/').map(|(_, p)| p)?
        } else {
            rest
        }
    } else {
        url
    };

    let mut parts = path.split('/').filter(|s| !s.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url() {
        assert_eq!(
            extract_owner_and_repo("https://github.com/acme/widgets"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn https_url_with_git_suffix_and_slash() {
        assert_eq!(
            extract_owner_and_repo("https://github.com/acme/widgets.git/"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn ssh_scp_syntax() {
        assert_eq!(
            extract_owner_and_repo("git@github.com:acme/widgets.git"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn bare_owner_repo() {
        assert_eq!(
            extract_owner_and_repo("acme/widgets"),
            Some(("acme".into(), "widgets".into()))
        );
    }

    #[test]
    fn rejects_incomplete_paths() {
        assert_eq!(extract_owner_and_repo("https://github.com/acme"), None);
        assert_eq!(extract_owner_and_repo(""), None);
        assert_eq!(extract_owner_and_repo("just-a-name"), None);
    }
}
