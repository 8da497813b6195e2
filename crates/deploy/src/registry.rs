//! The registry of deployed contracts and its outputs.

use std::{collections::HashMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::Context;
use comfy_table::{Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::{error::DeployError, instantiator::ContractHandle};

/// Default file name of the markdown address table.
pub const ADDRESSES_FILENAME: &str = "deployedAddresses.md";

const MARKDOWN_HEADER: &str = "| Contract | Address |\n|----------|---------|\n";

/// Deployed contracts by logical name, in deployment order.
///
/// Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ContractHandle>", into = "Vec<ContractHandle>")]
pub struct ContractRegistry {
    handles: Vec<ContractHandle>,
    index: HashMap<String, usize>,
}

impl From<Vec<ContractHandle>> for ContractRegistry {
    fn from(handles: Vec<ContractHandle>) -> Self {
        let mut registry = Self::default();
        for handle in handles {
            // Later duplicates lose, like a first-wins map.
            let _ = registry.insert(handle);
        }
        registry
    }
}

impl From<ContractRegistry> for Vec<ContractHandle> {
    fn from(registry: ContractRegistry) -> Self {
        registry.handles
    }
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle. Names are unique.
    pub fn insert(&mut self, handle: ContractHandle) -> Result<(), DeployError> {
        if self.index.contains_key(&handle.name) {
            return Err(DeployError::Plan(format!(
                "contract `{}` is registered twice",
                handle.name
            )));
        }
        self.index.insert(handle.name.clone(), self.handles.len());
        self.handles.push(handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ContractHandle> {
        self.index.get(name).map(|&i| &self.handles[i])
    }

    /// Address of `name`, or a plan error if it is not registered.
    pub fn address(&self, name: &str) -> Result<Address, DeployError> {
        self.get(name)
            .map(|handle| handle.address)
            .ok_or_else(|| DeployError::Plan(format!("contract `{name}` is not deployed")))
    }

    /// Name of the entry deployed at `address`, if any.
    pub fn name_of(&self, address: Address) -> Option<&str> {
        self.handles
            .iter()
            .find(|handle| handle.address == address)
            .map(|handle| handle.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContractHandle> {
        self.handles.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|handle| handle.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Merged view: `self` followed by the entries of `other` whose names are not taken.
    pub fn merged(&self, other: &ContractRegistry) -> ContractRegistry {
        let mut merged = self.clone();
        for handle in other.iter() {
            if !merged.contains(&handle.name) {
                let _ = merged.insert(handle.clone());
            }
        }
        merged
    }

    /// The two-column markdown table written after a deployment.
    pub fn to_markdown(&self) -> String {
        let mut markdown = MARKDOWN_HEADER.to_string();
        for handle in &self.handles {
            markdown.push_str(&format!("| {} | {} |\n", handle.name, handle.address));
        }
        markdown
    }

    pub fn write_markdown(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, self.to_markdown())
            .with_context(|| format!("Failed to write address table to {}", path.display()))?;
        tracing::info!(path = %path.display(), contracts = self.len(), "Address table written");
        Ok(())
    }

    /// Console rendering.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Contract", "Address"]);
        for handle in &self.handles {
            table.add_row(vec![handle.name.clone(), handle.address.to_string()]);
        }
        table
    }
}

/// Parse a markdown address table back into `(name, address)` rows.
pub fn parse_markdown(markdown: &str) -> anyhow::Result<Vec<(String, Address)>> {
    let mut rows = Vec::new();
    for (line_no, line) in markdown.lines().enumerate().skip(2) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cells: Vec<&str> = line
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        let [name, address] = cells.as_slice() else {
            anyhow::bail!("line {}: expected two columns, got {}", line_no + 1, cells.len());
        };
        let address: Address = address
            .parse()
            .with_context(|| format!("line {}: invalid address `{address}`", line_no + 1))?;
        rows.push((name.to_string(), address));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instantiator::DeploymentKind;
    use alloy_core::primitives::{Bytes, address};

    fn handle(name: &str, address: Address) -> ContractHandle {
        ContractHandle {
            name: name.to_string(),
            address,
            artifact: "Token".to_string(),
            kind: DeploymentKind::Create { nonce: 0 },
            constructor_args: Bytes::new(),
            tx_hash: None,
        }
    }

    #[test]
    fn test_registry_keeps_insertion_order() {
        let mut registry = ContractRegistry::new();
        registry
            .insert(handle("voter", address!("00000000000000000000000000000000000000c2")))
            .unwrap();
        registry
            .insert(handle("accessHub", address!("00000000000000000000000000000000000000c1")))
            .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["voter", "accessHub"]);
        assert!(registry.insert(handle("voter", Address::ZERO)).is_err());
        assert!(registry.address("minter").is_err());
    }

    #[test]
    fn test_markdown_table() {
        let a = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
        let b = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
        let registry = ContractRegistry::from(vec![handle("contractDeployer", a), handle("shadow", b)]);

        let markdown = registry.to_markdown();
        assert!(markdown.starts_with("| Contract | Address |\n|----------|---------|\n"));
        assert!(markdown.contains(&format!("| shadow | {b} |\n")));

        let rows = parse_markdown(&markdown).unwrap();
        assert_eq!(rows, vec![("contractDeployer".to_string(), a), ("shadow".to_string(), b)]);
    }

    #[test]
    fn test_parse_markdown_rejects_bad_rows() {
        let markdown = "| Contract | Address |\n|----------|---------|\n| voter | nope |\n";
        assert!(parse_markdown(markdown).is_err());
    }

    #[test]
    fn test_merged_view_prefers_left() {
        let left = ContractRegistry::from(vec![handle("weth", Address::with_last_byte(1))]);
        let right = ContractRegistry::from(vec![
            handle("weth", Address::with_last_byte(2)),
            handle("voter", Address::with_last_byte(3)),
        ]);
        let merged = left.merged(&right);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.address("weth").unwrap(), Address::with_last_byte(1));
    }

    #[test]
    fn test_registry_json_round_trip() {
        let registry = ContractRegistry::from(vec![handle("voter", Address::with_last_byte(9))]);
        let json = serde_json::to_string(&registry).unwrap();
        assert_eq!(serde_json::from_str::<ContractRegistry>(&json).unwrap(), registry);
    }
}
