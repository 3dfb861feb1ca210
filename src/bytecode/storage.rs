// Storage Slot Resolver
//
// Binds tracked variable names to storage slots and recognises, inside a
// block's instruction window, whether an SLOAD/SSTORE addresses one of them
// either by a constant slot or through a keccak-derived mapping/array address.

use std::collections::HashSet;

use ethers::types::U256;
use ethers::utils::keccak256;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::disassembler::{stack_origin, Instruction, StackOrigin};
use super::opcodes;
use crate::layout::{Encoding, StorageLayout};

/// How a variable's storage location is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingMode {
    /// Fixed slot used as is
    Direct,
    /// `keccak(key . slot)` for mapping elements
    HashedMapping,
    /// `keccak(slot) + index` for dynamic array elements
    HashedDynamicArray,
    /// No layout information, slot assigned by position
    Unknown,
}

/// A tracked variable and where it lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    pub name: String,
    /// Base slot, `None` when the layout does not know the variable
    pub slot: Option<U256>,
    /// Byte offset inside the slot for packed variables
    pub offset: u8,
    pub type_label: Option<String>,
    pub mode: AddressingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StorageBinding {
    pub fn is_found(&self) -> bool {
        self.slot.is_some()
    }

    fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: None,
            offset: 0,
            type_label: None,
            mode: AddressingMode::Unknown,
            note: Some("variable not present in storage layout".to_string()),
        }
    }
}

/// Bind every distinct name to a slot.
///
/// Without a layout, slots are assigned by position among the distinct names
/// and marked `Unknown`. With one, names it does not list get `slot: None`.
pub fn resolve_bindings(names: &[String], layout: Option<&StorageLayout>) -> Vec<StorageBinding> {
    let mut seen = HashSet::new();
    let distinct: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect();

    let Some(layout) = layout else {
        debug!("no storage layout, assigning {} positional slots", distinct.len());
        return distinct
            .iter()
            .enumerate()
            .map(|(position, name)| StorageBinding {
                name: name.to_string(),
                slot: Some(U256::from(position)),
                offset: 0,
                type_label: None,
                mode: AddressingMode::Unknown,
                note: Some("slot assigned by position".to_string()),
            })
            .collect();
    };

    distinct
        .iter()
        .map(|name| {
            let Some(entry) = layout.entry(name) else {
                warn!("variable {} not found in storage layout", name);
                return StorageBinding::not_found(name);
            };

            let (mode, note) = match layout.encoding(entry) {
                Encoding::Mapping => (
                    AddressingMode::HashedMapping,
                    Some(format!("elements at keccak256(key . {})", entry.slot)),
                ),
                Encoding::DynamicArray => (
                    AddressingMode::HashedDynamicArray,
                    Some(format!(
                        "elements at keccak256({}) + index = {:#x} + index",
                        entry.slot,
                        array_data_slot(entry.slot)
                    )),
                ),
                Encoding::Inplace | Encoding::Bytes => (AddressingMode::Direct, None),
            };

            StorageBinding {
                name: name.to_string(),
                slot: Some(entry.slot),
                offset: entry.offset,
                type_label: Some(layout.type_label(entry)),
                mode,
                note,
            }
        })
        .collect()
}

/// First data slot of a dynamic array declared at `base`
pub fn array_data_slot(base: U256) -> U256 {
    let mut preimage = [0u8; 32];
    base.to_big_endian(&mut preimage);
    U256::from_big_endian(&keccak256(preimage))
}

/// Which rule recognised a slot access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotMatch {
    Direct,
    Hashed,
}

/// Backward scan bounds for slot detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindows {
    /// Instructions inspected for a constant slot
    pub direct: usize,
    /// Instructions inspected for a SHA3
    pub hash: usize,
    /// Instructions inspected before the SHA3 for the base slot
    pub base_slot: usize,
}

impl Default for SlotWindows {
    fn default() -> Self {
        Self {
            direct: 5,
            hash: 20,
            base_slot: 15,
        }
    }
}

/// Recognises accesses to one binding's slot
#[derive(Debug, Clone, Copy)]
pub struct SlotDetector<'a> {
    binding: &'a StorageBinding,
    windows: SlotWindows,
}

impl<'a> SlotDetector<'a> {
    pub fn new(binding: &'a StorageBinding, windows: SlotWindows) -> Self {
        Self { binding, windows }
    }

    /// Decide whether the SLOAD/SSTORE at `index` of `window` addresses the binding.
    ///
    /// The direct rule runs first. The hashed rule only applies to bindings that
    /// are not known to be plain values.
    pub fn detect(&self, window: &[Instruction], index: usize) -> Option<SlotMatch> {
        let slot = self.binding.slot?;

        if self.direct_match(window, index, slot) {
            return Some(SlotMatch::Direct);
        }
        if self.binding.mode != AddressingMode::Direct && self.hashed_match(window, index, slot) {
            return Some(SlotMatch::Hashed);
        }
        None
    }

    /// Whether `window` stores to the binding
    pub fn is_store(&self, window: &[Instruction], index: usize) -> bool {
        window[index].is(opcodes::SSTORE) && self.detect(window, index).is_some()
    }

    /// Whether `window` loads the binding
    pub fn is_load(&self, window: &[Instruction], index: usize) -> bool {
        window[index].is(opcodes::SLOAD) && self.detect(window, index).is_some()
    }

    fn direct_match(&self, window: &[Instruction], index: usize, slot: U256) -> bool {
        stack_origin(window, index, 0, self.windows.direct) == StackOrigin::Constant(slot)
    }

    fn hashed_match(&self, window: &[Instruction], index: usize, slot: U256) -> bool {
        let recent = || (1..=self.windows.hash).filter_map(move |back| index.checked_sub(back));

        // keccak256(slot) folded into a constant by the optimizer
        if self.binding.mode == AddressingMode::HashedDynamicArray {
            let data = array_data_slot(slot);
            if recent().any(|i| window[i].push_value() == Some(data)) {
                return true;
            }
        }

        let Some(hash) = recent().find(|&i| window[i].is(opcodes::SHA3)) else {
            return false;
        };

        (1..=self.windows.base_slot)
            .filter_map(|back| hash.checked_sub(back))
            .any(|i| window[i].push_value() == Some(slot))
    }
}
