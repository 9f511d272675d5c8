pub mod builders;
pub mod desk;

pub use builders::{PolicyDir, RoleBuilder};
pub use desk::Desk;
