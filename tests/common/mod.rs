pub mod builders;
pub mod fake_remote;
pub mod strategies;

pub use builders::*;
pub use fake_remote::*;
pub use strategies::*;
