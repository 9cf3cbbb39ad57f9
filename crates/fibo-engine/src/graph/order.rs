use std::collections::{HashMap, VecDeque};

/// Kahn's algorithm over node ids.
///
/// The ready queue is FIFO and seeded in `ids` order, so independent nodes
/// keep their declaration order. Edges naming unknown ids are ignored.
/// Returns the order plus, for cyclic input, the nodes that never became
/// ready (in `ids` order).
pub fn topological_sort<'a>(
    ids: &[&'a str],
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> (Vec<String>, Vec<String>) {
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (source, target) in edges {
        if !in_degree.contains_key(source) || !in_degree.contains_key(target) {
            continue;
        }
        adjacency.entry(source).or_default().push(target);
        if let Some(d) = in_degree.get_mut(target) {
            *d += 1;
        }
    }

    let mut queue: VecDeque<&str> = ids
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for &next in adjacency.get(&id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    let stuck = ids
        .iter()
        .filter(|id| in_degree.get(*id).is_some_and(|d| *d > 0))
        .map(|id| id.to_string())
        .collect();
    (order, stuck)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sort<'a>(ids: &[&'a str], edges: &[(&'a str, &'a str)]) -> (Vec<String>, Vec<String>) {
        topological_sort(ids, edges.iter().copied())
    }

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let (order, stuck) = sort(&["c", "a", "b"], &[]);
        assert_eq!(order, vec!["c", "a", "b"]);
        assert!(stuck.is_empty());
    }

    #[test]
    fn diamond() {
        let (order, _) = sort(
            &["d", "b", "c", "a"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn ties_follow_fifo() {
        // b and c become ready together when a finishes; x was ready first.
        let (order, _) = sort(&["a", "x", "c", "b"], &[("a", "c"), ("a", "b")]);
        assert_eq!(order, vec!["a", "x", "c", "b"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (order, stuck) = sort(&["a", "b"], &[("a", "a")]);
        assert_eq!(order, vec!["b"]);
        assert_eq!(stuck, vec!["a"]);
    }

    #[test]
    fn unknown_endpoints_are_ignored() {
        let (order, stuck) = sort(&["a", "b"], &[("a", "zzz"), ("a", "b")]);
        assert_eq!(order, vec!["a", "b"]);
        assert!(stuck.is_empty());
    }

    /// Node count, a random rank per node, and candidate edges. Only edges
    /// from lower to higher rank are kept, so the graph is acyclic.
    fn ranked_dag() -> impl Strategy<Value = (usize, Vec<usize>, Vec<(usize, usize)>)> {
        (1usize..12).prop_flat_map(|n| {
            (
                Just(n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                prop::collection::vec((0..n, 0..n), 0..=2 * n),
            )
        })
    }

    /// A chain of `n` nodes plus one back edge `from -> to` with `to < from`.
    fn chain_with_back_edge() -> impl Strategy<Value = (usize, usize, usize)> {
        (2usize..10)
            .prop_flat_map(|n| (Just(n), 1..n))
            .prop_flat_map(|(n, from)| (Just(n), Just(from), 0..from))
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("n{i}")).collect()
    }

    proptest! {
        #[test]
        fn dags_respect_every_edge((n, rank, pairs) in ranked_dag()) {
            let names = names(n);
            let edges: Vec<(&str, &str)> = pairs
                .iter()
                .filter(|(a, b)| rank[*a] < rank[*b])
                .map(|(a, b)| (names[*a].as_str(), names[*b].as_str()))
                .collect();
            let ids: Vec<&str> = names.iter().map(String::as_str).collect();

            let (order, stuck) = topological_sort(&ids, edges.iter().copied());

            prop_assert!(stuck.is_empty());
            prop_assert_eq!(order.len(), n);
            let pos: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            for (u, v) in &edges {
                prop_assert!(pos[u] < pos[v], "{} must precede {}", u, v);
            }
        }

        #[test]
        fn back_edges_are_detected((n, from, to) in chain_with_back_edge()) {
            let names = names(n);
            let mut edges: Vec<(&str, &str)> = (0..n - 1)
                .map(|i| (names[i].as_str(), names[i + 1].as_str()))
                .collect();
            edges.push((names[from].as_str(), names[to].as_str()));
            let ids: Vec<&str> = names.iter().map(String::as_str).collect();

            let (order, stuck) = topological_sort(&ids, edges.iter().copied());

            prop_assert!(!stuck.is_empty());
            prop_assert!(stuck.contains(&names[from]));
            prop_assert!(order.len() < n);
        }
    }
}
