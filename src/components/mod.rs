pub mod history;
pub mod path_overlay;
pub mod tools;
