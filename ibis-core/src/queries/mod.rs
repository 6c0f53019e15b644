//! Query parsing, batching and the four query engines

pub mod batch;
pub mod q1;
pub mod q2;
pub mod q3;
pub mod q4;
pub mod runner;

pub use batch::{Query, QueryBatcher, QueryFileSource, QueryParamSource, QuerySource};
pub use q4::SearchStrategy;
