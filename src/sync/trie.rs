//! In-memory routing table (the sync client's private view of the world).
//!
//! No direct teacher precedent — built from spec.md §4.7's stated algorithm
//! and tested against spec.md §8's trie properties (longest-prefix, wildcard
//! precedence, case-insensitivity, query stripping, pruning).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// A backend target: one `(ip, port)` pair behind a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

/// The set of live endpoints behind one trie node.
pub type Pool = HashSet<Endpoint>;

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    pool: Pool,
}

impl TrieNode {
    fn is_dead(&self) -> bool {
        self.pool.is_empty() && self.children.is_empty()
    }
}

/// The sync client's routing table: longest-prefix lookup over slash-delimited
/// URI segments (host first, then path segments), guarded by a single
/// reader/writer lock per spec.md §5 ("Lookup must not be starved").
#[derive(Default)]
pub struct Registry {
    root: RwLock<TrieNode>,
}

fn segments(uri: &str) -> Vec<String> {
    let without_query = uri.split('?').next().unwrap_or(uri);
    without_query
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `endpoint` into the pool at the trie node for `uri`.
    pub fn register(&self, uri: &str, endpoint: Endpoint) {
        let segs = segments(uri);
        let mut root = self.root.write().unwrap();
        let mut node = &mut *root;
        for seg in &segs {
            node = node.children.entry(seg.clone()).or_default();
        }
        node.pool.insert(endpoint);
    }

    /// Removes `endpoint` from the pool at the trie node for `uri`, pruning
    /// any node left with neither a pool entry nor children, cascading
    /// upward until a live ancestor is reached.
    pub fn unregister(&self, uri: &str, endpoint: &Endpoint) {
        let segs = segments(uri);
        let mut root = self.root.write().unwrap();
        Self::remove(&mut root, &segs, endpoint);
    }

    fn remove(node: &mut TrieNode, segs: &[String], endpoint: &Endpoint) -> bool {
        if segs.is_empty() {
            node.pool.remove(endpoint);
            return node.is_dead();
        }
        let (head, rest) = (&segs[0], &segs[1..]);
        let child_dead = match node.children.get_mut(head) {
            Some(child) => Self::remove(child, rest, endpoint),
            None => return node.is_dead(),
        };
        if child_dead {
            node.children.remove(head);
        }
        node.is_dead()
    }

    /// Returns the longest-prefix non-empty pool matching `uri`, honoring
    /// wildcard-hostname (`*.suffix`) registrations. Strips any query string
    /// and lower-cases segments before matching.
    pub fn lookup(&self, uri: &str) -> Option<Pool> {
        let segs = segments(uri);
        let (host, rest) = segs.split_first()?;
        let root = self.root.read().unwrap();

        let exact = root
            .children
            .get(host)
            .and_then(|node| Self::longest_live(node, rest));

        let wildcard = root
            .children
            .iter()
            .filter_map(|(key, node)| {
                let suffix = key.strip_prefix("*.")?;
                let matches = host == suffix || host.ends_with(&format!(".{suffix}"));
                matches.then(|| Self::longest_live(node, rest)).flatten()
            })
            .max_by_key(|(depth, _)| *depth);

        match (exact, wildcard) {
            (Some((exact_depth, exact_pool)), Some((wild_depth, wild_pool))) => {
                if wild_depth > exact_depth {
                    Some(wild_pool)
                } else {
                    Some(exact_pool)
                }
            }
            (Some((_, pool)), None) | (None, Some((_, pool))) => Some(pool),
            (None, None) => None,
        }
    }

    /// Walks `segs` under `node`, returning the deepest `(depth, pool)` for a
    /// node with a non-empty pool, skipping empty pools along the way.
    fn longest_live(node: &TrieNode, segs: &[String]) -> Option<(usize, Pool)> {
        let mut best = (!node.pool.is_empty()).then(|| (0usize, node.pool.clone()));
        let mut current = node;
        for (depth, seg) in segs.iter().enumerate() {
            match current.children.get(seg) {
                Some(child) => {
                    current = child;
                    if !child.pool.is_empty() {
                        best = Some((depth + 1, child.pool.clone()));
                    }
                }
                None => break,
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(ip: &str, port: u16) -> Endpoint {
        Endpoint::new(ip, port)
    }

    #[test]
    fn longest_prefix_wins_over_a_shorter_registration() {
        let registry = Registry::new();
        registry.register("host", ep("1.1.1.1", 80));
        registry.register("host/a/b/c", ep("2.2.2.2", 81));

        let deep = registry.lookup("host/a/b/c").unwrap();
        assert!(deep.contains(&ep("2.2.2.2", 81)));

        let shallow = registry.lookup("host/a/x").unwrap();
        assert!(shallow.contains(&ep("1.1.1.1", 80)));
    }

    #[test]
    fn exact_host_beats_wildcard_at_equal_depth() {
        let registry = Registry::new();
        registry.register("a.b.c", ep("1.1.1.1", 80));
        registry.register("*.b.c", ep("9.9.9.9", 80));

        let pool = registry.lookup("a.b.c").unwrap();
        assert!(pool.contains(&ep("1.1.1.1", 80)));
        assert!(!pool.contains(&ep("9.9.9.9", 80)));
    }

    #[test]
    fn wildcard_matches_unregistered_hosts() {
        let registry = Registry::new();
        registry.register("*.b.c", ep("9.9.9.9", 80));
        let pool = registry.lookup("sub.b.c").unwrap();
        assert!(pool.contains(&ep("9.9.9.9", 80)));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = Registry::new();
        registry.register("FOO", ep("1.1.1.1", 80));
        let pool = registry.lookup("foo").unwrap();
        assert!(pool.contains(&ep("1.1.1.1", 80)));
    }

    #[test]
    fn lookup_strips_query_strings() {
        let registry = Registry::new();
        registry.register("host/p", ep("1.1.1.1", 80));
        assert_eq!(registry.lookup("host/p?x=1"), registry.lookup("host/p"));
    }

    #[test]
    fn unregistering_the_last_endpoint_prunes_the_subtree() {
        let registry = Registry::new();
        let e1 = ep("1.1.1.1", 80);
        let e2 = ep("2.2.2.2", 80);
        registry.register("host", e1.clone());
        registry.register("host/a/b", e2.clone());

        registry.unregister("host/a/b", &e2);
        // The pruned subtree leaves no pool at that depth; lookup falls back
        // to the shorter-prefix "host" pool.
        let pool = registry.lookup("host/a/b").unwrap();
        assert!(pool.contains(&e1));

        registry.unregister("host", &e1);
        assert!(registry.lookup("host").is_none());
        assert!(registry.lookup("host/a/b").is_none());
    }

    #[test]
    fn a_node_with_children_survives_its_own_pool_emptying() {
        let registry = Registry::new();
        let e1 = ep("1.1.1.1", 80);
        let e2 = ep("2.2.2.2", 80);
        registry.register("host", e1.clone());
        registry.register("host/a", e2.clone());

        registry.unregister("host", &e1);
        // "host" itself now has an empty pool but survives because of its
        // child; lookup of the bare host finds nothing shorter to fall back
        // to, so it reports no pool, while the deeper registration still
        // resolves correctly.
        assert!(registry.lookup("host").is_none());
        let pool = registry.lookup("host/a").unwrap();
        assert!(pool.contains(&e2));
    }
}
