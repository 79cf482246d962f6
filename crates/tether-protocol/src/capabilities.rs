//! Server capability parsing and client capability selection.

use std::collections::{BTreeMap, BTreeSet};
use tether_storage::ObjectFormat;

/// Capabilities a server advertised on its first ref line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    flags: BTreeSet<String>,
    values: BTreeMap<String, String>,
    multi: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    /// Parses a space-separated capability string.
    ///
    /// Bare tokens are flags. `key=value` tokens split on the first `=`;
    /// repeated keys such as `symref` keep every value in order, and the
    /// single-value lookup returns the last one.
    pub fn parse(caps: &str) -> Self {
        let mut parsed = Self::default();
        for token in caps.split(' ').filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    parsed.values.insert(key.to_string(), value.to_string());
                    parsed
                        .multi
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
                None => {
                    parsed.flags.insert(token.to_string());
                }
            }
        }
        parsed
    }

    /// True when `name` was advertised, as a flag or with a value.
    pub fn has(&self, name: &str) -> bool {
        self.flags.contains(name) || self.values.contains_key(name)
    }

    /// Value of a `key=value` capability, last one wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Every value advertised for `name`, in order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.multi.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// `symref=<from>:<to>` mappings, e.g. `HEAD -> refs/heads/main`.
    pub fn symrefs(&self) -> BTreeMap<String, String> {
        self.get_all("symref")
            .iter()
            .filter_map(|value| value.split_once(':'))
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect()
    }

    /// Server agent string.
    pub fn agent(&self) -> Option<&str> {
        self.get("agent")
    }

    /// Hash format the server declares, SHA-1 when absent.
    pub fn object_format(&self) -> Option<ObjectFormat> {
        match self.get("object-format") {
            None | Some("sha1") => Some(ObjectFormat::Sha1),
            Some("sha256") => Some(ObjectFormat::Sha256),
            Some(_) => None,
        }
    }

    /// True when nothing was advertised.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }
}

/// The agent string this client sends.
pub fn client_agent() -> String {
    format!("tether/{}", env!("CARGO_PKG_VERSION"))
}

/// Client-side knobs that change which fetch capabilities are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCapabilityOptions {
    /// Suppress the progress channel.
    pub quiet: bool,
    /// A history depth was requested.
    pub shallow: bool,
    /// Accept deltas against objects the client already has.
    pub thin_pack: bool,
}

/// Capabilities to request from upload-pack: the subset of what the server
/// offers that this client implements.
pub fn select_fetch_capabilities(
    server: &Capabilities,
    options: FetchCapabilityOptions,
) -> Vec<String> {
    let mut selected = Vec::new();
    let mut pick = |name: &str| {
        if server.has(name) {
            selected.push(name.to_string());
            true
        } else {
            false
        }
    };

    if !pick("multi_ack_detailed") {
        pick("multi_ack");
    }
    if !pick("side-band-64k") {
        pick("side-band");
    }
    pick("ofs-delta");
    if options.thin_pack {
        pick("thin-pack");
    }
    if options.quiet {
        pick("no-progress");
    }
    pick("include-tag");
    if options.shallow {
        pick("shallow");
    }
    if server.get("object-format") == Some("sha256") {
        selected.push("object-format=sha256".to_string());
    }
    selected.push(format!("agent={}", client_agent()));
    selected
}

/// Capabilities to request from receive-pack.
pub fn select_push_capabilities(server: &Capabilities, quiet: bool) -> Vec<String> {
    let mut selected: Vec<String> = ["report-status", "delete-refs", "side-band-64k", "ofs-delta"]
        .into_iter()
        .filter(|name| server.has(name))
        .map(str::to_string)
        .collect();
    if quiet && server.has("quiet") {
        selected.push("quiet".to_string());
    }
    if server.get("object-format") == Some("sha256") {
        selected.push("object-format=sha256".to_string());
    }
    selected.push(format!("agent={}", client_agent()));
    selected
}

/// True when the selection asked for side-band multiplexing.
pub fn uses_sideband(selected: &[String]) -> bool {
    selected
        .iter()
        .any(|cap| cap == "side-band" || cap == "side-band-64k")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GITHUB_CAPS: &str = "multi_ack thin-pack side-band side-band-64k ofs-delta shallow \
        deepen-since deepen-not deepen-relative no-progress include-tag multi_ack_detailed \
        allow-tip-sha1-in-want allow-reachable-sha1-in-want no-done symref=HEAD:refs/heads/main \
        filter object-format=sha1 agent=git/github-8e2ff7c5586f";

    #[test]
    fn test_parse_flags_and_values() {
        let caps = Capabilities::parse(GITHUB_CAPS);
        assert!(caps.has("multi_ack_detailed"));
        assert!(caps.has("side-band-64k"));
        assert!(caps.has("agent"));
        assert!(!caps.has("report-status"));
        assert_eq!(caps.agent(), Some("git/github-8e2ff7c5586f"));
        assert_eq!(caps.get("missing"), None);
        assert_eq!(caps.object_format(), Some(ObjectFormat::Sha1));
    }

    #[test]
    fn test_repeated_symref() {
        let caps = Capabilities::parse("symref=HEAD:refs/heads/main symref=refs/x:refs/heads/y");
        assert_eq!(caps.get("symref"), Some("refs/x:refs/heads/y"));
        assert_eq!(caps.get_all("symref").len(), 2);
        let symrefs = caps.symrefs();
        assert_eq!(symrefs["HEAD"], "refs/heads/main");
        assert_eq!(symrefs["refs/x"], "refs/heads/y");
    }

    #[test]
    fn test_value_split_on_first_equals() {
        let caps = Capabilities::parse("agent=a=b");
        assert_eq!(caps.get("agent"), Some("a=b"));
    }

    #[test]
    fn test_empty_and_double_spaces() {
        assert!(Capabilities::parse("").is_empty());
        let caps = Capabilities::parse("ofs-delta  thin-pack ");
        assert!(caps.has("ofs-delta"));
        assert!(caps.has("thin-pack"));
        assert!(!caps.has(""));
    }

    #[test]
    fn test_select_fetch_prefers_detailed_and_64k() {
        let caps = Capabilities::parse(GITHUB_CAPS);
        let selected = select_fetch_capabilities(&caps, FetchCapabilityOptions::default());
        assert_eq!(selected[0], "multi_ack_detailed");
        assert_eq!(selected[1], "side-band-64k");
        assert!(selected.contains(&"ofs-delta".to_string()));
        assert!(!selected.contains(&"multi_ack".to_string()));
        assert!(!selected.contains(&"no-progress".to_string()));
        assert!(!selected.contains(&"shallow".to_string()));
        assert!(selected.last().unwrap().starts_with("agent=tether/"));
        assert!(uses_sideband(&selected));
    }

    #[test]
    fn test_select_fetch_falls_back() {
        let caps = Capabilities::parse("multi_ack side-band");
        let options = FetchCapabilityOptions {
            quiet: true,
            shallow: true,
            thin_pack: true,
        };
        let selected = select_fetch_capabilities(&caps, options);
        assert_eq!(selected[..2], ["multi_ack".to_string(), "side-band".to_string()]);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_select_push() {
        let caps = Capabilities::parse("report-status delete-refs side-band-64k quiet atomic");
        let selected = select_push_capabilities(&caps, false);
        assert_eq!(
            selected[..3],
            [
                "report-status".to_string(),
                "delete-refs".to_string(),
                "side-band-64k".to_string()
            ]
        );
        assert!(!selected.contains(&"quiet".to_string()));
    }

    #[test]
    fn test_unknown_object_format() {
        let caps = Capabilities::parse("object-format=md5");
        assert_eq!(caps.object_format(), None);
    }
}
