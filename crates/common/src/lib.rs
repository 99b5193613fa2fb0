// huddle-common: shared types and wire protocol for the Huddle workspace

pub mod protocol;
pub mod types;
