mod call;
mod phone;
mod summary;
mod transcript;

pub use call::*;
pub use phone::*;
pub use summary::*;
pub use transcript::*;
