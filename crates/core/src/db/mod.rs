pub mod engine;
pub mod filter;
pub mod locks;
pub mod ops;
pub mod paths;
pub mod shadow;
pub mod table;
