//! Control masks
//!
//! A [`ControlMask`] is a conjunction of per-qubit equality constraints:
//! a basis index passes when every included qubit has its desired value.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ControlMask {
    inclusion: usize,
    desired: usize,
}

impl ControlMask {
    /// Unconstrained mask; every index passes
    pub const NONE: ControlMask = ControlMask {
        inclusion: 0,
        desired: 0,
    };

    /// Build a mask; desired bits outside `inclusion` are dropped
    pub fn new(inclusion: usize, desired: usize) -> Self {
        Self {
            inclusion,
            desired: desired & inclusion,
        }
    }

    /// Constrain a single qubit to `value`
    pub fn for_qubit(qubit: u32, value: bool) -> Result<Self> {
        let bit = 1usize.checked_shl(qubit).ok_or(CoreError::QubitNotAddressable {
            qubit,
            max: usize::BITS,
        })?;
        Ok(Self::new(bit, if value { bit } else { 0 }))
    }

    pub fn inclusion(&self) -> usize {
        self.inclusion
    }

    pub fn desired(&self) -> usize {
        self.desired
    }

    pub fn is_none(&self) -> bool {
        self.inclusion == 0
    }

    /// Number of constrained qubits
    pub fn controlled_count(&self) -> u32 {
        self.inclusion.count_ones()
    }

    /// Whether basis index `index` satisfies every constraint
    #[inline]
    pub fn passes(&self, index: usize) -> bool {
        index & self.inclusion == self.desired
    }

    /// Conjunction of two independently sourced masks
    ///
    /// The inclusion sets must be disjoint.
    pub fn combine(self, other: ControlMask) -> Result<ControlMask> {
        let overlap = self.inclusion & other.inclusion;
        if overlap != 0 {
            return Err(CoreError::OverlappingControls {
                existing: self.inclusion,
                overlap,
            });
        }
        Ok(Self::new(
            self.inclusion | other.inclusion,
            self.desired | other.desired,
        ))
    }

    /// Unchecked bitwise merge; overlapping qubits keep either desired bit set
    pub fn and(self, other: ControlMask) -> ControlMask {
        Self::new(
            self.inclusion | other.inclusion,
            self.desired | other.desired,
        )
    }

    /// Check the mask only references qubits of a `qubits`-qubit register
    pub fn validate_for(&self, qubits: u32) -> Result<()> {
        let limit = if qubits as usize >= usize::BITS as usize {
            usize::MAX
        } else {
            (1usize << qubits) - 1
        };
        if self.inclusion & !limit != 0 {
            return Err(CoreError::ControlOutOfRange {
                inclusion: self.inclusion,
                qubits,
            });
        }
        Ok(())
    }

    /// Full index of the `compact`-th index passing the mask
    ///
    /// Free bits of `compact` are deposited, in order, into the qubits the
    /// mask does not constrain; constrained qubits take their desired value.
    pub fn expand_index(&self, compact: usize) -> usize {
        let mut result = self.desired;
        let mut remaining = compact;
        let mut bit = 0u32;
        while remaining != 0 {
            if self.inclusion & (1usize << bit) == 0 {
                result |= (remaining & 1) << bit;
                remaining >>= 1;
            }
            bit += 1;
        }
        result
    }

    /// Inverse of [`expand_index`](Self::expand_index): drop the constrained bits
    pub fn compact_index(&self, full: usize) -> usize {
        let mut rest = full & !self.inclusion;
        let mut result = 0usize;
        let mut out_bit = 0u32;
        let mut bit = 0u32;
        while rest != 0 {
            if self.inclusion & (1usize << bit) == 0 {
                result |= ((rest >> bit) & 1) << out_bit;
                rest &= !(1usize << bit);
                out_bit += 1;
            }
            bit += 1;
        }
        result
    }
}

impl fmt::Display for ControlMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        write!(f, "{:#b}={:#b}", self.inclusion, self.desired)
    }
}
