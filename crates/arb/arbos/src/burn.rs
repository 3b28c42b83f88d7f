use crate::ArbosError;

/// Charges gas for ArbOS work done on behalf of a caller.
pub trait Burner {
    fn burn(&mut self, amount: u64) -> Result<(), ArbosError>;

    fn burned(&self) -> u64;
}

/// Burner for protocol-initiated work, which is never out of gas.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBurner {
    burned: u64,
}

impl Burner for SystemBurner {
    fn burn(&mut self, amount: u64) -> Result<(), ArbosError> {
        self.burned = self.burned.saturating_add(amount);
        Ok(())
    }

    fn burned(&self) -> u64 {
        self.burned
    }
}

/// Burner backed by a call's remaining gas.
#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    limit: u64,
    gas_left: u64,
}

impl GasMeter {
    pub const fn new(limit: u64) -> Self {
        Self { limit, gas_left: limit }
    }

    pub const fn gas_left(&self) -> u64 {
        self.gas_left
    }
}

impl Burner for GasMeter {
    fn burn(&mut self, amount: u64) -> Result<(), ArbosError> {
        if amount > self.gas_left {
            self.gas_left = 0;
            return Err(ArbosError::OutOfGas);
        }
        self.gas_left -= amount;
        Ok(())
    }

    fn burned(&self) -> u64 {
        self.limit - self.gas_left
    }
}
