//! Post-deployment validation of a registry against the live chain.

use std::{collections::HashMap, fmt};

use alloy_core::primitives::{Address, Bytes, keccak256};
use comfy_table::{Table, presets::UTF8_FULL};
use futures::future::join_all;

use crate::{error::LedgerError, ledger::Ledger, registry::ContractRegistry};

/// Getters to check per source contract, as `(getter, expected entry)`.
///
/// `multisig` is not a registry entry; it is supplied by the caller.
const CROSS_CHECKS: &[(&str, &[(&str, &str)])] = &[
    (
        "clGaugeFactory",
        &[
            ("nfpManager", "nfpManager"),
            ("voter", "voter"),
            ("feeCollector", "feeCollector"),
        ],
    ),
    (
        "voter",
        &[
            ("legacyFactory", "pairFactory"),
            ("xShadow", "xShadow"),
            ("minter", "minter"),
            ("accessHub", "accessHub"),
            ("voteModule", "voteModule"),
            ("launcherPlugin", "launcherPlugin"),
            ("clFactory", "clFactory"),
            ("clGaugeFactory", "clGaugeFactory"),
            ("gaugeFactory", "gaugeFactory"),
            ("feeDistributorFactory", "feeDistributorFactory"),
            ("feeRecipientFactory", "feeRecipientFactory"),
            ("nfpManager", "nfpManager"),
            ("governor", "multisig"),
        ],
    ),
    (
        "accessHub",
        &[
            ("timelock", "multisig"),
            ("treasury", "multisig"),
            ("clGaugeFactory", "clGaugeFactory"),
            ("gaugeFactory", "gaugeFactory"),
            ("feeDistributorFactory", "feeDistributorFactory"),
            ("voter", "voter"),
            ("minter", "minter"),
            ("launcherPlugin", "launcherPlugin"),
            ("xShadow", "xShadow"),
            ("shadowV3PoolFactory", "clFactory"),
            ("poolFactory", "pairFactory"),
            ("feeRecipientFactory", "feeRecipientFactory"),
            ("feeCollector", "feeCollector"),
            ("voteModule", "voteModule"),
        ],
    ),
    (
        "clFactory",
        &[
            ("accessHub", "accessHub"),
            ("feeCollector", "feeCollector"),
            ("shadowV3PoolDeployer", "clPoolDeployer"),
            ("voter", "voter"),
        ],
    ),
];

/// Whether a registry address holds code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCheck {
    pub name: String,
    pub address: Address,
    pub has_code: bool,
}

/// One cross-reference check: `source.getter()` must return `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRow {
    pub source: String,
    pub getter: String,
    /// Name of the entry the getter should point at.
    pub contract: String,
    /// `None` if the getter could not be read.
    pub actual: Option<Address>,
    pub expected: Address,
}

impl ValidationRow {
    pub fn passed(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

/// Result of [`validate_deployment`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub code: Vec<CodeCheck>,
    pub rows: Vec<ValidationRow>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.code.iter().all(|check| check.has_code) && self.rows.iter().all(ValidationRow::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationRow> {
        self.rows.iter().filter(|row| !row.passed())
    }

    /// Console rendering of the cross-reference checks.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Status", "Source", "Contract", "Actual Address", "Expected Address"]);
        for row in &self.rows {
            table.add_row(vec![
                status_icon(row.passed()).to_string(),
                format!("{}.{}()", row.source, row.getter),
                row.contract.clone(),
                row.actual.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
                row.expected.to_string(),
            ]);
        }
        table
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        writeln!(f, "Deployment Validation: {}", status)?;
        writeln!(f)?;

        writeln!(f, "=== Contract code ===")?;
        for check in &self.code {
            let note = if check.has_code { "" } else { " (no code)" };
            writeln!(f, "  {} {} {}{}", status_icon(check.has_code), check.name, check.address, note)?;
        }

        writeln!(f, "=== Cross references ===")?;
        for row in &self.rows {
            write!(f, "  {} {}.{}() -> {}", status_icon(row.passed()), row.source, row.getter, row.contract)?;
            match row.actual {
                Some(actual) if row.passed() => writeln!(f, " {}", actual)?,
                Some(actual) => writeln!(f, " got {}, expected {}", actual, row.expected)?,
                None => writeln!(f, " unreadable, expected {}", row.expected)?,
            }
        }

        let failed = self.rows.iter().filter(|row| !row.passed()).count();
        writeln!(
            f,
            "Total: {}, Passed: {}, Failed: {}",
            self.rows.len(),
            self.rows.len() - failed,
            failed
        )
    }
}

fn status_icon(ok: bool) -> &'static str {
    if ok { "[ok]" } else { "[FAIL]" }
}

/// Check that every registry entry has code and that the wiring getters of the core
/// contracts point where the registry says they should.
///
/// All reads are issued concurrently. Checks whose source or expected entry is not in
/// the registry are left out.
pub async fn validate_deployment<L: Ledger>(
    ledger: &L,
    registry: &ContractRegistry,
    multisig: Address,
) -> Result<ValidationReport, LedgerError> {
    let code = join_all(registry.iter().map(|handle| async move {
        ledger.code_at(handle.address).await.map(|code| CodeCheck {
            name: handle.name.clone(),
            address: handle.address,
            has_code: !code.is_empty(),
        })
    }))
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    let mut directory: HashMap<&str, Address> = registry
        .iter()
        .map(|handle| (handle.name.as_str(), handle.address))
        .collect();
    directory.entry("multisig").or_insert(multisig);

    let directory = &directory;
    let checks: Vec<(&str, Address, &str, &str, Address)> = CROSS_CHECKS
        .iter()
        .filter_map(|(source, getters)| Some((*source, directory.get(source).copied()?, *getters)))
        .flat_map(move |(source, source_address, getters)| {
            getters.iter().filter_map(move |(getter, expected)| {
                let expected_address = directory.get(expected).copied()?;
                Some((source, source_address, *getter, *expected, expected_address))
            })
        })
        .collect();

    let rows = join_all(checks.into_iter().map(
        |(source, source_address, getter, contract, expected)| async move {
            let actual = match read_address_getter(ledger, source_address, getter).await {
                Ok(actual) => Some(actual),
                Err(e) => {
                    tracing::warn!(source = %source, getter = %getter, error = %e, "Getter read failed");
                    None
                }
            };
            ValidationRow {
                source: source.to_string(),
                getter: getter.to_string(),
                contract: contract.to_string(),
                actual,
                expected,
            }
        },
    ))
    .await;

    let report = ValidationReport { code, rows };
    tracing::info!(
        passed = report.passed(),
        checks = report.rows.len(),
        "Deployment validated"
    );
    Ok(report)
}

/// Call a no-argument getter returning an address.
async fn read_address_getter<L: Ledger>(
    ledger: &L,
    contract: Address,
    getter: &str,
) -> Result<Address, LedgerError> {
    let selector = &keccak256(format!("{getter}()").as_bytes())[..4];
    let output = ledger
        .call(contract, Bytes::copy_from_slice(selector))
        .await?;
    if output.len() < 32 {
        return Err(LedgerError::Decode(format!(
            "{getter}() returned {} bytes",
            output.len()
        )));
    }
    Ok(Address::from_slice(&output[12..32]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_checks_reference_known_entries() {
        let plan = crate::plan::DeploymentPlan::protocol();
        let names: Vec<&str> = plan.names().collect();
        for (source, getters) in CROSS_CHECKS {
            assert!(names.contains(source), "unknown source {source}");
            for (_, expected) in *getters {
                assert!(
                    *expected == "multisig" || names.contains(expected),
                    "unknown expected entry {expected}"
                );
            }
        }
    }

    #[test]
    fn test_report_display() {
        let report = ValidationReport {
            code: vec![CodeCheck {
                name: "voter".to_string(),
                address: Address::with_last_byte(1),
                has_code: true,
            }],
            rows: vec![
                ValidationRow {
                    source: "voter".to_string(),
                    getter: "minter".to_string(),
                    contract: "minter".to_string(),
                    actual: Some(Address::with_last_byte(2)),
                    expected: Address::with_last_byte(2),
                },
                ValidationRow {
                    source: "voter".to_string(),
                    getter: "governor".to_string(),
                    contract: "multisig".to_string(),
                    actual: None,
                    expected: Address::with_last_byte(3),
                },
            ],
        };

        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        let text = report.to_string();
        assert!(text.starts_with("Deployment Validation: FAILED"));
        assert!(text.contains("[ok] voter.minter() -> minter"));
        assert!(text.contains("Total: 2, Passed: 1, Failed: 1"));
    }
}
