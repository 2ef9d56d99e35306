pub mod options;
pub mod types;
pub mod validator;

pub use options::*;
pub use types::*;
pub use validator::*;
