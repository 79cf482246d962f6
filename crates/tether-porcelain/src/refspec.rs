//! Refspecs: `[+]<src>[:<dst>]`, with at most one `*` on each side.

use crate::{PorcelainError, Result};
use std::fmt;
use std::str::FromStr;

/// A parsed refspec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    /// Leading `+`: allow non-fast-forward updates.
    pub force: bool,
    /// Source side. Empty for a push that deletes `dst`.
    pub src: String,
    /// Destination side, if given.
    pub dst: Option<String>,
}

impl Refspec {
    /// Parses a refspec string.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: &str| PorcelainError::InvalidRefspec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (force, body) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = match body.split_once(':') {
            Some((src, dst)) => (src, Some(dst)),
            None => (body, None),
        };
        if src.is_empty() && dst.map_or(true, str::is_empty) {
            return Err(invalid("empty refspec"));
        }
        if dst.is_some_and(str::is_empty) {
            return Err(invalid("empty destination"));
        }
        if src.is_empty() && force {
            return Err(invalid("a delete cannot be forced"));
        }

        let src_stars = src.matches('*').count();
        let dst_stars = dst.map_or(0, |d| d.matches('*').count());
        if src_stars > 1 || dst_stars > 1 {
            return Err(invalid("more than one '*'"));
        }
        if dst.is_some() && src_stars != dst_stars {
            return Err(invalid("'*' must appear on both sides or neither"));
        }

        Ok(Self {
            force,
            src: src.to_string(),
            dst: dst.map(str::to_string),
        })
    }

    /// True when the source contains `*`.
    pub fn is_pattern(&self) -> bool {
        self.src.contains('*')
    }

    /// True for `:<dst>`, which deletes `dst` on push.
    pub fn is_delete(&self) -> bool {
        self.src.is_empty()
    }

    /// True when `name` matches the source side.
    pub fn matches_src(&self, name: &str) -> bool {
        match_pattern(&self.src, name).is_some()
    }

    /// Maps a source ref to its destination, if the spec applies to it.
    pub fn map_src(&self, name: &str) -> Option<String> {
        let dst = self.dst.as_deref()?;
        let middle = match_pattern(&self.src, name)?;
        Some(dst.replacen('*', middle, 1))
    }

    /// Maps a destination ref back to its source.
    pub fn map_dst(&self, name: &str) -> Option<String> {
        let dst = self.dst.as_deref()?;
        let middle = match_pattern(dst, name)?;
        Some(self.src.replacen('*', middle, 1))
    }

    /// The part of the destination before `*`, for pattern specs.
    pub fn dst_prefix(&self) -> Option<&str> {
        let dst = self.dst.as_deref()?;
        dst.split_once('*').map(|(prefix, _)| prefix)
    }
}

impl FromStr for Refspec {
    type Err = PorcelainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            f.write_str("+")?;
        }
        f.write_str(&self.src)?;
        if let Some(dst) = &self.dst {
            write!(f, ":{dst}")?;
        }
        Ok(())
    }
}

/// Matches `name` against `pattern`, returning the text `*` stood for (or
/// an empty string for an exact match).
fn match_pattern<'n>(pattern: &str, name: &'n str) -> Option<&'n str> {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            let rest = name.strip_prefix(prefix)?;
            let middle = rest.strip_suffix(suffix)?;
            (!middle.is_empty()).then_some(middle)
        }
        None => (pattern == name).then_some(""),
    }
}

/// True when the short name `short` refers to the full ref `full`, using
/// the lookup order of `refs/`, `refs/heads/` and `refs/tags/`.
pub fn short_name_matches(full: &str, short: &str) -> bool {
    full == short
        || ["refs/", "refs/heads/", "refs/tags/"]
            .iter()
            .any(|prefix| full.strip_prefix(prefix) == Some(short))
}

/// Remote-tracking ref for `remote_ref` under the given fetch refspecs.
pub fn tracking_ref(fetch_specs: &[Refspec], remote_ref: &str) -> Option<String> {
    fetch_specs.iter().find_map(|spec| spec.map_src(remote_ref))
}

/// Parses a list of refspec strings.
pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Refspec>> {
    specs.iter().map(|s| Refspec::parse(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_fetch_spec() {
        let spec = Refspec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.force);
        assert!(spec.is_pattern());
        assert_eq!(
            spec.map_src("refs/heads/feature/x").as_deref(),
            Some("refs/remotes/origin/feature/x")
        );
        assert_eq!(spec.map_src("refs/tags/v1"), None);
        assert_eq!(
            spec.map_dst("refs/remotes/origin/main").as_deref(),
            Some("refs/heads/main")
        );
        assert_eq!(spec.dst_prefix(), Some("refs/remotes/origin/"));
        assert_eq!(spec.to_string(), "+refs/heads/*:refs/remotes/origin/*");
    }

    #[test]
    fn test_parse_exact_and_delete() {
        let spec: Refspec = "main:refs/heads/release".parse().unwrap();
        assert!(!spec.force);
        assert_eq!(spec.map_src("main").as_deref(), Some("refs/heads/release"));

        let delete = Refspec::parse(":refs/heads/old").unwrap();
        assert!(delete.is_delete());
        assert_eq!(delete.dst.as_deref(), Some("refs/heads/old"));

        let bare = Refspec::parse("main").unwrap();
        assert_eq!(bare.dst, None);
        assert_eq!(bare.map_src("main"), None);
        assert!(bare.matches_src("main"));
    }

    #[test]
    fn test_invalid_refspecs() {
        for spec in ["", ":", "a:", "refs/*:refs/x", "refs/*/*:refs/*", "+:refs/heads/x"] {
            assert!(
                matches!(Refspec::parse(spec), Err(PorcelainError::InvalidRefspec { .. })),
                "{spec} should be rejected"
            );
        }
    }

    #[test]
    fn test_short_names() {
        assert!(short_name_matches("refs/heads/main", "main"));
        assert!(short_name_matches("refs/tags/v1.0", "v1.0"));
        assert!(short_name_matches("refs/heads/main", "heads/main"));
        assert!(short_name_matches("refs/heads/main", "refs/heads/main"));
        assert!(!short_name_matches("refs/heads/mainline", "main"));
    }

    #[test]
    fn test_tracking_ref() {
        let specs = parse_all(&["+refs/heads/*:refs/remotes/upstream/*"]).unwrap();
        assert_eq!(
            tracking_ref(&specs, "refs/heads/main").as_deref(),
            Some("refs/remotes/upstream/main")
        );
        assert_eq!(tracking_ref(&specs, "refs/tags/v1"), None);
    }
}
