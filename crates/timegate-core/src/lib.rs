pub mod abi;
pub mod authority;
pub mod call;
pub mod clock;
pub mod constants;
pub mod error;
pub mod operation;
pub mod types;
pub mod unit;

pub use authority::*;
pub use call::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use error::TimegateError;
pub use operation::*;
pub use types::*;
pub use unit::*;
