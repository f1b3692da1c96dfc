use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Orders keys so that every key comes after all of its dependencies.
/// Returns None when the graph has a cycle. Keys whose dependencies are not
/// in the input are treated as external and skipped.
pub fn toposort<Key: Eq + std::hash::Hash>(
    dependencies: &[(Key, Vec<Key>)],
) -> Option<Vec<&Key>> {
    let positions: HashMap<&Key, usize> = dependencies
        .iter()
        .enumerate()
        .map(|(position, (key, _))| (key, position))
        .collect();

    let edges: Vec<Vec<usize>> = dependencies
        .iter()
        .map(|(_, deps)| {
            deps.iter()
                .filter_map(|dep| positions.get(dep).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    let mut order = Vec::with_capacity(dependencies.len());
    for start in 0..dependencies.len() {
        visit(&edges, start, &mut marks, &mut order)?;
    }

    Some(order.into_iter().map(|i| &dependencies[i].0).collect())
}

fn visit(
    edges: &[Vec<usize>],
    node: usize,
    marks: &mut [Mark],
    order: &mut Vec<usize>,
) -> Option<()> {
    match marks[node] {
        Mark::Done => return Some(()),
        Mark::Visiting => return None,
        Mark::Unvisited => {}
    }
    marks[node] = Mark::Visiting;
    for &dep in &edges[node] {
        visit(edges, dep, marks, order)?;
    }
    marks[node] = Mark::Done;
    order.push(node);
    Some(())
}
