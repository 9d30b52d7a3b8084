//! Layer dependency resolution.
//!
//! Produces a total order in which every layer comes after all of its
//! dependencies. Among layers that are ready at the same time the one
//! installed first wins, so the order is stable and deterministic.

use super::Layer;
use crate::error::{EmuError, Result};
use std::collections::HashMap;
use std::rc::Rc;

/// Resolve the render order of installed layers, as indices into `layers`.
///
/// # Errors
/// * `DuplicateEntity` when two layers share a name
/// * `UnknownDependency` when a layer names a layer that is not installed
/// * `CyclicDependency` naming the layers on a cycle
pub fn resolve_order(layers: &[Rc<dyn Layer>]) -> Result<Vec<usize>> {
    let entries: Vec<(String, Vec<String>)> = layers
        .iter()
        .map(|layer| (layer.name().to_string(), layer.dependencies()))
        .collect();
    order_entries(&entries)
}

/// Kahn's algorithm over `(name, dependencies)` pairs, breaking ties by
/// insertion order.
pub(crate) fn order_entries(entries: &[(String, Vec<String>)]) -> Result<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, (name, _)) in entries.iter().enumerate() {
        if index.insert(name.as_str(), i).is_some() {
            return Err(EmuError::duplicate("layer", name));
        }
    }

    let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(entries.len());
    for (name, deps) in entries {
        let mut resolved = Vec::with_capacity(deps.len());
        for dep in deps {
            let dep_index = index.get(dep.as_str()).ok_or_else(|| EmuError::UnknownDependency {
                layer: name.clone(),
                dependency: dep.clone(),
            })?;
            if !resolved.contains(dep_index) {
                resolved.push(*dep_index);
            }
        }
        dependencies.push(resolved);
    }

    let mut placed = vec![false; entries.len()];
    let mut order = Vec::with_capacity(entries.len());
    while order.len() < entries.len() {
        let ready = (0..entries.len())
            .find(|&i| !placed[i] && dependencies[i].iter().all(|&d| placed[d]));
        match ready {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let cycle = find_cycle(&dependencies, &placed)
                    .into_iter()
                    .map(|i| entries[i].0.clone())
                    .collect();
                return Err(EmuError::CyclicDependency { cycle });
            }
        }
    }

    log::debug!(
        "Resolved layer order: {}",
        order
            .iter()
            .map(|&i| entries[i].0.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(order)
}

/// Walk unplaced dependencies until a layer repeats. Every unplaced layer
/// has at least one unplaced dependency once Kahn stalls, so the walk
/// always closes a loop. The returned path starts and ends with the same
/// layer.
fn find_cycle(dependencies: &[Vec<usize>], placed: &[bool]) -> Vec<usize> {
    let Some(start) = (0..placed.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;
    loop {
        if let Some(&pos) = position.get(&current) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(current);
            return cycle;
        }
        position.insert(current, path.len());
        path.push(current);
        match dependencies[current].iter().find(|&&d| !placed[d]) {
            Some(&next) => current = next,
            None => return path,
        }
    }
}
