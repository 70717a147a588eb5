pub mod health;
pub mod tree;
