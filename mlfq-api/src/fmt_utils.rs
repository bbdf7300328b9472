//! Formatting utilities for no-alloc environment

use core::fmt;

use crate::core::types::Tick;

/// Ticks per displayed second
pub const TICKS_PER_SECOND: Tick = 1000;

/// Displays a tick count as seconds with three decimals, e.g. `1.005`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSeconds(pub Tick);

impl fmt::Display for TickSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / TICKS_PER_SECOND, self.0 % TICKS_PER_SECOND)
    }
}

/// Writes `items` separated by `sep`
pub fn write_joined<I, T>(f: &mut fmt::Formatter<'_>, items: I, sep: &str) -> fmt::Result
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    let mut first = true;
    for item in items {
        if !first {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
        first = false;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_tick_seconds() {
        assert_eq!(TickSeconds(1005).to_string(), "1.005");
        assert_eq!(TickSeconds(0).to_string(), "0.000");
        assert_eq!(TickSeconds(12340).to_string(), "12.340");
    }
}
