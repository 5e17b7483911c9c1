use std::collections::{HashMap, HashSet, VecDeque};

/// A table scheduled for removal together with the tables it references.
#[derive(Debug, Clone)]
pub struct DropNode {
    pub name: String,
    pub references: Vec<String>,
}

/// Order tables for dropping so that a referencing table always goes before
/// the table it references (Kahn's algorithm over the reversed FK graph).
///
/// Each inner vector is one `DROP TABLE` statement. Acyclic tables come out
/// one per group, in input order where the graph allows. Tables caught in (or
/// held back by) a foreign-key cycle are returned together as a final group so
/// they can be dropped in a single statement.
pub fn drop_groups(nodes: &[DropNode]) -> Vec<Vec<String>> {
    let in_set: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();

    // Number of other tables in the set still referencing each table
    let mut referenced_by: HashMap<&str, usize> =
        nodes.iter().map(|n| (n.name.as_str(), 0usize)).collect();

    for node in nodes {
        for dep in distinct_deps(node, &in_set) {
            if let Some(count) = referenced_by.get_mut(dep) {
                *count += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.name.as_str())
        .filter(|name| referenced_by.get(name).copied() == Some(0))
        .collect();

    let by_name: HashMap<&str, &DropNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut groups: Vec<Vec<String>> = Vec::with_capacity(nodes.len());

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        groups.push(vec![current.to_string()]);

        let Some(&node) = by_name.get(current) else {
            continue;
        };
        for dep in distinct_deps(node, &in_set) {
            if let Some(count) = referenced_by.get_mut(dep) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }

    let remaining: Vec<String> = nodes
        .iter()
        .filter(|n| !visited.contains(n.name.as_str()))
        .map(|n| n.name.clone())
        .collect();

    if !remaining.is_empty() {
        log::warn!(
            "Tables {:?} have circular FK dependencies; dropping them in one statement",
            remaining
        );
        groups.push(remaining);
    }

    groups
}

/// Referenced tables of `node` that are also being dropped, excluding
/// self-references, each listed once.
fn distinct_deps<'a>(node: &'a DropNode, in_set: &HashSet<&str>) -> Vec<&'a str> {
    let mut seen: Vec<&str> = Vec::new();
    for dep in &node.references {
        let dep = dep.as_str();
        if dep != node.name && in_set.contains(dep) && !seen.contains(&dep) {
            seen.push(dep);
        }
    }
    seen
}
