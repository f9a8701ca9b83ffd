//! Foreign-key dependency ordering of tables.
//!
//! An edge `A -> B` exists when a foreign key on `A` references `B`, both are in
//! the table set and `A != B`. The sort is a depth-first post-order walk in input
//! order. An edge leading back onto the active path is dropped silently, so a
//! cyclic graph still yields a total order; [`DependencyResolver::detect_circular_dependencies`]
//! reports the cycles that were broken.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::{ForeignKeySnapshot, SchemaSnapshot};

/// Orders tables by foreign-key dependency.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    tables: Vec<String>,
    edges: BTreeMap<String, Vec<String>>,
    foreign_keys: BTreeMap<String, Vec<ForeignKeySnapshot>>,
}

impl DependencyResolver {
    /// Create a resolver from a table list and the foreign keys of each table.
    pub fn new<I, S>(tables: I, foreign_keys: &BTreeMap<String, Vec<ForeignKeySnapshot>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let tables: Vec<String> = tables
            .into_iter()
            .map(Into::into)
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let mut edges = BTreeMap::new();
        let mut keys = BTreeMap::new();
        for table in &tables {
            let fks = foreign_keys.get(table).cloned().unwrap_or_default();
            let mut targets: Vec<String> = Vec::new();
            for fk in &fks {
                let target = &fk.foreign_table;
                if target != table && seen.contains(target) && !targets.contains(target) {
                    targets.push(target.clone());
                }
            }
            edges.insert(table.clone(), targets);
            keys.insert(table.clone(), fks);
        }

        Self {
            tables,
            edges,
            foreign_keys: keys,
        }
    }

    /// Create a resolver over every table of a snapshot.
    pub fn from_snapshot(snapshot: &SchemaSnapshot) -> Self {
        Self::new(snapshot.tables.iter().cloned(), &snapshot.foreign_keys)
    }

    /// Tables this table depends on.
    pub fn dependencies_of(&self, table: &str) -> &[String] {
        self.edges.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sort tables so referenced tables come before the tables referencing them.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut order = Vec::with_capacity(self.tables.len());

        for table in &self.tables {
            self.visit(table, &mut visited, &mut on_path, &mut order);
        }

        order
    }

    fn visit<'a>(
        &'a self,
        table: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(table) {
            return;
        }

        on_path.insert(table);
        for dep in self.dependencies_of(table) {
            // back edge: cycle broken here
            if on_path.contains(dep.as_str()) {
                continue;
            }
            self.visit(dep, visited, on_path, order);
        }
        on_path.remove(table);

        visited.insert(table);
        order.push(table.to_string());
    }

    /// Order in which tables can be created.
    pub fn creation_order(&self) -> Vec<String> {
        self.topological_sort()
    }

    /// Order in which tables can be dropped; the exact reverse of creation order.
    pub fn drop_order(&self) -> Vec<String> {
        let mut order = self.topological_sort();
        order.reverse();
        order
    }

    /// Find foreign-key cycles.
    ///
    /// Each cycle is rotated to start at its lexicographically smallest member
    /// and reported once.
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for start in &self.tables {
            let mut path = Vec::new();
            let mut visited = HashSet::new();
            self.collect_cycles(start, &mut path, &mut visited, &mut cycles);
        }

        cycles
    }

    fn collect_cycles<'a>(
        &'a self,
        table: &'a str,
        path: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if let Some(pos) = path.iter().position(|t| *t == table) {
            let cycle = rotate_to_smallest(&path[pos..]);
            if !cycles.contains(&cycle) {
                cycles.push(cycle);
            }
            return;
        }
        if !visited.insert(table) {
            return;
        }

        path.push(table);
        for dep in self.dependencies_of(table) {
            self.collect_cycles(dep, path, visited, cycles);
        }
        path.pop();
    }

    /// Flag tables that look like join tables.
    ///
    /// A pivot has exactly two foreign keys and its name contains both
    /// referenced table names, plural or singular.
    pub fn detect_pivot_tables(&self) -> Vec<PivotCandidate> {
        self.tables
            .iter()
            .filter_map(|table| {
                let fks = self.foreign_keys.get(table)?;
                if fks.len() != 2 {
                    return None;
                }
                let contains = |referenced: &str| {
                    table.contains(referenced) || table.contains(&singularize(referenced))
                };
                if fks.iter().all(|fk| contains(&fk.foreign_table)) {
                    Some(PivotCandidate {
                        table: table.clone(),
                        references: fks.iter().map(|fk| fk.foreign_table.clone()).collect(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

fn rotate_to_smallest(cycle: &[&str]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map(|(i, _)| i)
        .unwrap_or(0);

    cycle[start..]
        .iter()
        .chain(&cycle[..start])
        .map(|s| s.to_string())
        .collect()
}

/// Naive English singular form of a table name.
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

/// A table that looks like a many-to-many join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotCandidate {
    /// Pivot table name.
    pub table: String,
    /// The two referenced tables.
    pub references: Vec<String>,
}

impl PivotCandidate {
    /// Referenced tables as a set.
    pub fn referenced_set(&self) -> BTreeSet<&str> {
        self.references.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fks(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<ForeignKeySnapshot>> {
        entries
            .iter()
            .map(|(table, targets)| {
                (
                    table.to_string(),
                    targets
                        .iter()
                        .map(|t| {
                            ForeignKeySnapshot::new(format!("{}_id", singularize(t)), *t, "id")
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_referenced_table_sorts_first() {
        let resolver = DependencyResolver::new(["posts", "users"], &fks(&[("posts", &["users"])]));

        assert_eq!(resolver.creation_order(), vec!["users", "posts"]);
        assert_eq!(resolver.drop_order(), vec!["posts", "users"]);
    }

    #[test]
    fn test_chain_and_self_reference() {
        let resolver = DependencyResolver::new(
            ["comments", "posts", "users"],
            &fks(&[
                ("comments", &["posts", "comments"]),
                ("posts", &["users"]),
            ]),
        );

        assert_eq!(resolver.creation_order(), vec!["users", "posts", "comments"]);
        assert!(resolver.detect_circular_dependencies().is_empty());
    }

    #[test]
    fn test_references_outside_set_ignored() {
        let resolver = DependencyResolver::new(["posts"], &fks(&[("posts", &["users"])]));
        assert!(resolver.dependencies_of("posts").is_empty());
        assert_eq!(resolver.topological_sort(), vec!["posts"]);
    }

    #[test]
    fn test_cycle_still_totally_ordered() {
        let resolver = DependencyResolver::new(
            ["a", "b", "c"],
            &fks(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]),
        );

        let order = resolver.topological_sort();
        assert_eq!(order.len(), 3);
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_cycles_rotated_and_deduplicated() {
        let resolver = DependencyResolver::new(
            ["orders", "invoices", "users"],
            &fks(&[("orders", &["invoices"]), ("invoices", &["orders"])]),
        );

        assert_eq!(
            resolver.detect_circular_dependencies(),
            vec![vec!["invoices".to_string(), "orders".to_string()]]
        );
    }

    #[test]
    fn test_detect_pivot_tables() {
        let resolver = DependencyResolver::new(
            ["roles", "users", "role_user", "posts"],
            &fks(&[
                ("role_user", &["roles", "users"]),
                ("posts", &["users", "roles"]),
            ]),
        );

        let pivots = resolver.detect_pivot_tables();
        assert_eq!(pivots.len(), 1);
        assert_eq!(pivots[0].table, "role_user");
        assert_eq!(pivots[0].referenced_set(), BTreeSet::from(["roles", "users"]));
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("staff"), "staff");
    }
}
