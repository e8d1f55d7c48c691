//! Error types of the crate, grouped by the subsystem that raises them.

mod layer;
pub use layer::*;

mod len_error;
pub use len_error::*;

mod packet_error;
pub use packet_error::*;

mod family_error;
pub use family_error::*;

mod config_error;
pub use config_error::*;

mod sys_error;
pub use sys_error::*;

mod startup_error;
pub use startup_error::*;
