//! RPC authorization: a single-principal gate. The only caller the admin
//! surface trusts is the farm owner's own twin id, established once at
//! startup from the chain identity/mnemonic.

use crate::error::{FarmerbotError, Result};

/// Checks an authenticated caller's twin id against the farm owner's.
#[derive(Debug, Clone, Copy)]
pub struct AuthGate {
    farmer_twin_id: u32,
}

impl AuthGate {
    pub fn new(farmer_twin_id: u32) -> Self {
        Self { farmer_twin_id }
    }

    pub fn authorize(&self, caller_twin_id: u32) -> Result<()> {
        if caller_twin_id != self.farmer_twin_id {
            return Err(FarmerbotError::Unauthorized {
                caller: caller_twin_id,
                expected: self.farmer_twin_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_twin_id_is_authorized() {
        let gate = AuthGate::new(42);
        assert!(gate.authorize(42).is_ok());
    }

    #[test]
    fn mismatched_twin_id_is_refused() {
        let gate = AuthGate::new(42);
        let err = gate.authorize(7).unwrap_err();
        assert!(matches!(err, FarmerbotError::Unauthorized { caller: 7, expected: 42 }));
    }
}
