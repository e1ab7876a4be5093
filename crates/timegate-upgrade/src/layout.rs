use timegate_core::error::TimegateError;
use timegate_core::unit::{StorageLayout, StorageSlot};

/// Outcome of a storage-layout comparison.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutReport {
    /// One line per incompatibility; empty means compatible.
    pub diagnostics: Vec<String>,
}

impl LayoutReport {
    pub fn is_compatible(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_result(self) -> Result<(), TimegateError> {
        if self.is_compatible() {
            Ok(())
        } else {
            Err(TimegateError::StorageLayoutIncompatible { diagnostics: self.diagnostics })
        }
    }
}

/// Static check that a candidate implementation may take over the storage
/// of the current one.
pub trait LayoutValidator: Send + Sync {
    fn validate(&self, current: &StorageLayout, candidate: &StorageLayout) -> LayoutReport;
}

/// Accepts a candidate iff it keeps every current variable at the same slot,
/// offset, name and type, in the same order, and only appends after the last
/// occupied position.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOnlyValidator;

fn position(s: &StorageSlot) -> (u64, u8) {
    (s.slot, s.offset)
}

impl LayoutValidator for AppendOnlyValidator {
    fn validate(&self, current: &StorageLayout, candidate: &StorageLayout) -> LayoutReport {
        let mut diagnostics = Vec::new();
        let cur = current.slots();
        let cand = candidate.slots();

        for (i, old) in cur.iter().enumerate() {
            let Some(new) = cand.get(i) else {
                diagnostics.push(format!(
                    "variable `{}` (slot {}) was removed",
                    old.label, old.slot
                ));
                continue;
            };
            if new.label != old.label {
                diagnostics.push(format!(
                    "slot {} offset {}: `{}` replaced by `{}`",
                    old.slot, old.offset, old.label, new.label
                ));
            }
            if position(new) != position(old) {
                diagnostics.push(format!(
                    "variable `{}` moved from slot {}:{} to {}:{}",
                    old.label, old.slot, old.offset, new.slot, new.offset
                ));
            }
            if new.type_label != old.type_label {
                diagnostics.push(format!(
                    "variable `{}` changed type from {} to {}",
                    old.label, old.type_label, new.type_label
                ));
            }
        }

        if let Some(last) = cur.last().map(position) {
            for new in cand.iter().skip(cur.len()) {
                if position(new) <= last {
                    diagnostics.push(format!(
                        "appended variable `{}` at slot {}:{} overlaps existing storage",
                        new.label, new.slot, new.offset
                    ));
                }
            }
        }

        LayoutReport { diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(label: &str, slot: u64, ty: &str) -> StorageSlot {
        StorageSlot { label: label.into(), slot, offset: 0, type_label: ty.into() }
    }

    fn layout(slots: &[StorageSlot]) -> StorageLayout {
        StorageLayout(slots.to_vec())
    }

    fn base() -> StorageLayout {
        layout(&[slot("owner", 0, "address"), slot("balances", 1, "mapping(address => uint256)")])
    }

    #[test]
    fn appending_is_compatible() {
        let mut next = base();
        next.0.push(slot("paused", 2, "bool"));
        let report = AppendOnlyValidator.validate(&base(), &next);
        assert!(report.is_compatible(), "{:?}", report.diagnostics);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn reordering_is_rejected() {
        let swapped = layout(&[
            slot("balances", 0, "mapping(address => uint256)"),
            slot("owner", 1, "address"),
        ]);
        let report = AppendOnlyValidator.validate(&base(), &swapped);
        assert!(!report.is_compatible());
        assert!(matches!(
            report.into_result(),
            Err(TimegateError::StorageLayoutIncompatible { .. })
        ));
    }

    #[test]
    fn removal_and_type_change_are_reported() {
        let shrunk = layout(&[slot("owner", 0, "uint160")]);
        let report = AppendOnlyValidator.validate(&base(), &shrunk);
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.diagnostics.iter().any(|d| d.contains("removed")));
        assert!(report.diagnostics.iter().any(|d| d.contains("changed type")));
    }

    #[test]
    fn appended_overlap_is_rejected() {
        let mut next = base();
        next.0.push(slot("shadow", 1, "uint256"));
        let report = AppendOnlyValidator.validate(&base(), &next);
        assert!(report.diagnostics[0].contains("overlaps"));
    }

    #[test]
    fn empty_current_layout_accepts_anything() {
        assert!(AppendOnlyValidator.validate(&StorageLayout::default(), &base()).is_compatible());
    }
}
