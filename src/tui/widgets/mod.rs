pub mod mistakes;
pub mod practice;
