mod call;

pub use call::CallRow;
