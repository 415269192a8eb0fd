pub mod buttons;
pub mod text;
