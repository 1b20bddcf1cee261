//! Account and session management: the engine's own users, independent of
//! whatever database credentials a chat's connection carries.

pub mod jwt;
pub mod model;
pub mod password;

pub use jwt::{Claims, TokenKind, TokenService};
pub use model::User;
pub use password::{hash_password, verify_password};
