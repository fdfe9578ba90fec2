// SPDX-License-Identifier: Apache-2.0

//! The plugin registration table: every bundled plugin, wired in by name,
//! built once in each binary's `main`.

use scan_common::plugin::PluginTable;

pub fn build_plugin_table() -> PluginTable {
    let mut table: PluginTable = PluginTable::new();
    table.insert("nmap", Box::new(plugin_nmap::NmapPlugin));
    table.insert("nikto", Box::new(plugin_nikto::NiktoPlugin));
    table.insert("nuclei", Box::new(plugin_nuclei::NucleiPlugin));
    table.insert("dig", Box::new(plugin_dig::DigPlugin));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_bundled_plugin_is_registered() {
        let table = build_plugin_table();
        for name in ["nmap", "nikto", "nuclei", "dig"] {
            assert!(table.contains_key(name), "missing registration for {name}");
        }
    }
}
