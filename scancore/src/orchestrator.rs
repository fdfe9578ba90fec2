// SPDX-License-Identifier: Apache-2.0

//! Dependency resolution and wave dispatch.
//!
//! Enabled plugins form a dependency graph via `depends_on`; this module
//! topologically sorts that graph with Kahn's algorithm into waves —
//! plugins with no unresolved dependency left in the same wave — and the
//! caller runs each wave's plugins concurrently before moving to the next.

use std::collections::{HashMap, HashSet};

use scan_common::{config::PluginConfig, error::Error, error::Result};

/// Group enabled plugins into dependency waves using Kahn's algorithm.
/// Each returned `Vec<String>` is a wave: plugins with no dependency left
/// unresolved by a previous wave. Plugins within a wave carry no ordering
/// constraint between each other.
pub fn topological_waves(plugins: &[PluginConfig]) -> Result<Vec<Vec<String>>> {
    let names: HashSet<&str> = plugins.iter().map(|p| p.name.as_str()).collect();

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for plugin in plugins {
        indegree.entry(plugin.name.as_str()).or_insert(0);
        // Without strict_dependencies, depends_on is an install-order hint
        // consulted at scan time (e.g. nikto reading nmap's discovered
        // ports from the registry), not a wave-ordering constraint.
        if !plugin.strict_dependencies {
            continue;
        }
        for dep in &plugin.depends_on {
            // A dependency on a plugin that isn't enabled is not a graph
            // edge — nothing to wait for.
            if !names.contains(dep.as_str()) {
                continue;
            }
            *indegree.entry(plugin.name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(plugin.name.as_str());
        }
    }

    // Deterministic ordering within a wave makes output and logs reproducible.
    let mut frontier: Vec<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    frontier.sort_unstable();

    let mut waves = Vec::new();
    let mut visited = 0usize;

    let mut current = frontier;
    while !current.is_empty() {
        visited += current.len();
        waves.push(current.iter().map(|s| s.to_string()).collect());

        let mut next = Vec::new();
        for &name in &current {
            if let Some(deps) = dependents.get(name) {
                for &dependent in deps {
                    let deg = indegree.get_mut(dependent).expect("edge target tracked");
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        next.sort_unstable();
        current = next;
    }

    if visited != indegree.len() {
        return Err(Error::CyclicDependency);
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str, depends_on: &[&str]) -> PluginConfig {
        strict_plugin(name, depends_on, false)
    }

    fn strict_plugin(name: &str, depends_on: &[&str], strict_dependencies: bool) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            enabled: true,
            category: "General Info".to_string(),
            version: None,
            install: Vec::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            strict_dependencies,
            level: "easy".to_string(),
            levels: Default::default(),
        }
    }

    #[test]
    fn independent_plugins_share_one_wave() {
        let plugins = vec![plugin("nmap", &[]), plugin("dig", &[])];
        let waves = topological_waves(&plugins).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 2);
    }

    #[test]
    fn strict_dependency_runs_in_a_later_wave() {
        let plugins = vec![plugin("nmap", &[]), strict_plugin("nikto", &["nmap"], true)];
        let waves = topological_waves(&plugins).unwrap();
        assert_eq!(waves, vec![vec!["nmap".to_string()], vec!["nikto".to_string()]]);
    }

    #[test]
    fn non_strict_dependency_imposes_no_wave_ordering() {
        let plugins = vec![plugin("nmap", &[]), plugin("nikto", &["nmap"])];
        let waves = topological_waves(&plugins).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 2);
    }

    #[test]
    fn each_wave_is_maximal() {
        let plugins = vec![
            strict_plugin("a", &[], true),
            strict_plugin("b", &[], true),
            strict_plugin("c", &["a"], true),
            strict_plugin("d", &["b"], true),
        ];
        let waves = topological_waves(&plugins).unwrap();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(waves[1], vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let plugins = vec![strict_plugin("a", &["b"], true), strict_plugin("b", &["a"], true)];
        assert!(matches!(topological_waves(&plugins), Err(Error::CyclicDependency)));
    }

    #[test]
    fn dependency_on_a_disabled_plugin_is_not_an_edge() {
        let plugins = vec![strict_plugin("nikto", &["nmap"], true)];
        let waves = topological_waves(&plugins).unwrap();
        assert_eq!(waves, vec![vec!["nikto".to_string()]]);
    }
}
