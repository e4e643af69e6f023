// Business domains
pub mod content;
