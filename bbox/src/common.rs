pub use anyhow::{ensure, Result};
pub use num_traits::{Float, Num, NumCast, One, Zero};
pub use std::ops::Mul;
