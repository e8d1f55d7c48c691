mod addr_family;
pub use addr_family::*;

mod mc_addr;
pub use mc_addr::*;

mod group_mem_protocol;
pub use group_mem_protocol::*;
