//! Repository traits for metadata operations.

pub mod audit;
pub mod bootstrap;
pub mod files;
pub mod organizations;
pub mod shares;
pub mod tokens;
pub mod users;

pub use audit::AuditRepo;
pub use bootstrap::BootstrapRepo;
pub use files::FileRepo;
pub use organizations::OrganizationRepo;
pub use shares::ShareRepo;
pub use tokens::TokenRepo;
pub use users::UserRepo;
