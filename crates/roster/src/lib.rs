//! The peer roster shared by every cache node and the monitor.
//!
//! A roster is a flat text file with one `host:port` entry per line, in
//! ordinal order. It is rebuilt from the node set whenever that set changes
//! and never patched in place.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt;

use pasture_cloud::NodeRecord;

/// Ordered `host:port` list of live cache nodes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Roster {
    entries: Vec<String>,
}

impl Roster {
    /// Builds the roster for `nodes`, every entry on `port`.
    ///
    /// Entries are ordered by ordinal index. Records that are not running
    /// are left out so every entry maps to a live node.
    #[must_use]
    pub fn build(nodes: &[NodeRecord], port: u16) -> Self {
        let mut live: Vec<&NodeRecord> = nodes.iter().filter(|n| n.running).collect();
        live.sort_by_key(|n| n.ordinal);

        Self {
            entries: live
                .into_iter()
                .map(|n| format!("{}:{}", n.public_address, port))
                .collect(),
        }
    }

    /// Reads a roster file. Blank lines and a trailing newline are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            entries: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// The file contents: entries joined by newlines.
    #[must_use]
    pub fn render(&self) -> String {
        self.entries.join("\n")
    }

    /// Entries in ordinal order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the roster has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `prefix`'s entries are the leading entries of this
    /// roster, as after a scale-out.
    #[must_use]
    pub fn extends(&self, prefix: &Self) -> bool {
        self.entries.starts_with(&prefix.entries)
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(count: u32) -> Vec<NodeRecord> {
        (0..count)
            .map(|i| NodeRecord::running(format!("i-{i}"), format!("h{i}"), i))
            .collect()
    }

    #[test]
    fn test_build_orders_by_ordinal() {
        let mut records = nodes(3);
        records.reverse();

        let roster = Roster::build(&records, 7070);

        assert_eq!(roster.entries(), ["h0:7070", "h1:7070", "h2:7070"]);
        assert_eq!(roster.render(), "h0:7070\nh1:7070\nh2:7070");
    }

    #[test]
    fn test_build_is_deterministic() {
        let records = nodes(5);

        let first = Roster::build(&records, 7070).render();
        let second = Roster::build(&records, 7070).render();

        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_build_skips_nodes_that_are_not_running() {
        let mut records = nodes(3);
        records[1].running = false;

        let roster = Roster::build(&records, 9000);

        assert_eq!(roster.entries(), ["h0:9000", "h2:9000"]);
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let roster = Roster::parse("h0:7070\nh1:7070\n\n");

        assert_eq!(roster.len(), 2);
        assert_eq!(roster, Roster::build(&nodes(2), 7070));
    }

    #[test]
    fn test_scaled_roster_extends_previous() {
        let before = Roster::build(&nodes(3), 7070);
        let after = Roster::build(&nodes(5), 7070);

        assert!(after.extends(&before));
        assert!(!before.extends(&after));
        assert_eq!(after.len(), 5);
    }

    #[test]
    fn test_empty_roster_renders_empty() {
        let roster = Roster::build(&[], 7070);

        assert!(roster.is_empty());
        assert_eq!(roster.to_string(), "");
    }
}
