pub mod assess;
pub mod catalog;
pub mod reasoning;
pub mod rules;
