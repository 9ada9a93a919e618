//! Fault records delivered to user page-fault handlers

use crate::VirtAddr;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Bytes one fault record occupies on the exception stack
pub const UTRAPFRAME_SIZE: u32 = 52;

bitflags! {
    /// Page-fault error code bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FaultCause: u32 {
        /// The page was present; the fault is a protection violation
        const PROTECTION = 0x1;
        /// The access was a write
        const WRITE = 0x2;
        /// The access came from user mode
        const USER = 0x4;
    }
}

/// Fault record handed to a user page-fault handler
///
/// Populated by the kernel; read-only input to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTrapframe {
    /// Faulting virtual address (not rounded)
    pub fault_va: VirtAddr,
    pub err: FaultCause,
}

impl UTrapframe {
    pub fn new(fault_va: VirtAddr, err: FaultCause) -> Self {
        Self { fault_va, err }
    }

    pub fn is_write(&self) -> bool {
        self.err.contains(FaultCause::WRITE)
    }

    /// Bytes pushed at the base of the frame: fault address then cause, little-endian
    pub fn header_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.fault_va.as_u32().to_le_bytes());
        bytes[4..].copy_from_slice(&self.err.bits().to_le_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_write() {
        let utf = UTrapframe::new(VirtAddr::new(0x800123), FaultCause::WRITE | FaultCause::USER);
        assert!(utf.is_write());

        let utf = UTrapframe::new(VirtAddr::new(0x800123), FaultCause::USER);
        assert!(!utf.is_write());
    }

    #[test]
    fn test_header_bytes_layout() {
        let utf = UTrapframe::new(
            VirtAddr::new(0x0080_1004),
            FaultCause::PROTECTION | FaultCause::WRITE | FaultCause::USER,
        );
        let bytes = utf.header_bytes();
        assert_eq!(&bytes[..4], &0x0080_1004u32.to_le_bytes());
        assert_eq!(&bytes[4..], &7u32.to_le_bytes());
    }

    #[test]
    fn test_fault_record_serializes() {
        let utf = UTrapframe::new(VirtAddr::new(0x1000), FaultCause::WRITE);
        let json = serde_json::to_string(&utf).unwrap();
        let back: UTrapframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, utf);
    }
}
