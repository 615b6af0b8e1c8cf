pub mod detect;
pub mod unwrap;
