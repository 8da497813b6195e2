//! Compiled contract artifacts.
//!
//! Both hardhat (`artifacts/contracts/Foo.sol/Foo.json`, with `bytecode` as a hex string)
//! and foundry (`out/Foo.sol/Foo.json`, with `bytecode.object`) layouts are understood.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::{Bytes, keccak256, B256};
use serde_json::Value;

use crate::error::DeployError;

/// Placeholder left in bytecode whose libraries were not linked.
const LINK_PLACEHOLDER: &str = "__$";

/// A compiled contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Contract name, as used to look the artifact up.
    pub name: String,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    /// Fully-qualified source path (e.g. `contracts/Voter.sol`), if the artifact records it.
    pub source_name: Option<String>,
    /// Hardhat build-info file the artifact was compiled in, if known.
    pub build_info: Option<PathBuf>,
}

impl Artifact {
    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn init_code(&self, encoded_args: &[u8]) -> Vec<u8> {
        let mut code = Vec::with_capacity(self.bytecode.len() + encoded_args.len());
        code.extend_from_slice(&self.bytecode);
        code.extend_from_slice(encoded_args);
        code
    }

    /// Hash of the creation bytecode alone (pair init-code hashes use this).
    pub fn bytecode_hash(&self) -> B256 {
        keccak256(&self.bytecode)
    }
}

/// A set of artifacts keyed by contract name.
///
/// Artifacts whose bytecode still needs library linking are remembered by name, so that
/// looking one up reports why it cannot be deployed.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    by_name: HashMap<String, Arc<Artifact>>,
    /// Unlinked contract name to the file it was read from.
    unlinked: HashMap<String, PathBuf>,
}

impl Artifacts {
    /// Build an artifact set from in-memory bytecode.
    pub fn from_bytecodes<I, N>(bytecodes: I) -> Self
    where
        I: IntoIterator<Item = (N, Bytes)>,
        N: Into<String>,
    {
        let by_name = bytecodes
            .into_iter()
            .map(|(name, bytecode)| {
                let name = name.into();
                let artifact = Artifact {
                    name: name.clone(),
                    bytecode,
                    source_name: None,
                    build_info: None,
                };
                (name, Arc::new(artifact))
            })
            .collect();
        Self {
            by_name,
            unlinked: HashMap::new(),
        }
    }

    /// Load every artifact found below `dir`.
    ///
    /// Debug files (`*.dbg.json`) and the `build-info` directory are skipped. If two
    /// artifacts share a contract name, the first one found wins and a warning is logged.
    /// Unlinked bytecode does not fail the load; [`Artifacts::get`] reports it.
    pub fn load_dir(dir: &Path) -> Result<Self, DeployError> {
        let mut files = Vec::new();
        collect_json_files(dir, &mut files).map_err(|e| DeployError::Artifact {
            name: dir.display().to_string(),
            reason: format!("failed to read artifact directory: {e}"),
        })?;
        files.sort();

        let mut artifacts = Self::default();
        for path in files {
            let Some(parsed) = parse_artifact_file(&path)? else {
                continue;
            };
            let name = match &parsed {
                Parsed::Linked(artifact) => &artifact.name,
                Parsed::Unlinked(name) => name,
            };
            if artifacts.by_name.contains_key(name) || artifacts.unlinked.contains_key(name) {
                tracing::warn!(
                    name = %name,
                    path = %path.display(),
                    "Duplicate artifact name, keeping the first one"
                );
                continue;
            }
            match parsed {
                Parsed::Linked(artifact) => {
                    artifacts
                        .by_name
                        .insert(artifact.name.clone(), Arc::new(artifact));
                }
                Parsed::Unlinked(name) => {
                    tracing::debug!(name = %name, path = %path.display(), "Unlinked artifact");
                    artifacts.unlinked.insert(name, path);
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            count = artifacts.by_name.len(),
            unlinked = artifacts.unlinked.len(),
            "Artifacts loaded"
        );
        Ok(artifacts)
    }

    /// Look up an artifact by contract name.
    ///
    /// Fails if there is no such artifact or if its bytecode still has unlinked libraries.
    pub fn get(&self, name: &str) -> Result<Arc<Artifact>, DeployError> {
        if let Some(artifact) = self.by_name.get(name) {
            return Ok(artifact.clone());
        }
        let reason = match self.unlinked.get(name) {
            Some(path) => format!(
                "bytecode in {} contains unlinked library placeholders",
                path.display()
            ),
            None => "no artifact with this name".to_string(),
        };
        Err(DeployError::Artifact {
            name: name.to_string(),
            reason,
        })
    }

    /// Add or replace an artifact.
    pub fn insert(&mut self, artifact: Artifact) {
        self.unlinked.remove(&artifact.name);
        self.by_name.insert(artifact.name.clone(), Arc::new(artifact));
    }

    /// Whether a deployable artifact named `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "build-info") {
                continue;
            }
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json")
            && !path.to_string_lossy().ends_with(".dbg.json")
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Outcome of reading one artifact file.
enum Parsed {
    Linked(Artifact),
    /// The bytecode has library placeholders and cannot be deployed as is.
    Unlinked(String),
}

/// Parse one artifact file. Files that are JSON but not contract artifacts yield `None`.
fn parse_artifact_file(path: &Path) -> Result<Option<Parsed>, DeployError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let artifact_err = |reason: String| DeployError::Artifact {
        name: name.clone(),
        reason,
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| artifact_err(format!("failed to read {}: {e}", path.display())))?;
    let json: Value = match serde_json::from_str(&content) {
        Ok(json) => json,
        Err(_) => return Ok(None),
    };

    // hardhat: "bytecode": "0x..."; foundry: "bytecode": { "object": "0x..." }
    let bytecode_hex = match json.get("bytecode") {
        Some(Value::String(hex)) => hex.as_str(),
        Some(Value::Object(obj)) => match obj.get("object").and_then(Value::as_str) {
            Some(hex) => hex,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    let contract_name = json
        .get("contractName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| name.clone());

    if bytecode_hex.contains(LINK_PLACEHOLDER) {
        return Ok(Some(Parsed::Unlinked(contract_name)));
    }

    let bytecode: Bytes = hex::decode(bytecode_hex.trim_start_matches("0x"))
        .map_err(|e| artifact_err(format!("invalid bytecode hex: {e}")))?
        .into();

    let source_name = json
        .get("sourceName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            json.pointer("/ast/absolutePath")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    Ok(Some(Parsed::Linked(Artifact {
        name: contract_name,
        bytecode,
        source_name,
        build_info: build_info_path(path),
    })))
}

/// Resolve the build-info file referenced by the hardhat debug file next to `path`.
fn build_info_path(path: &Path) -> Option<PathBuf> {
    let dbg_path = path.with_extension("dbg.json");
    let content = std::fs::read_to_string(&dbg_path).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    let relative = json.get("buildInfo")?.as_str()?;
    Some(dbg_path.parent()?.join(relative))
}
