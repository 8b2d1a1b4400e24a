pub mod command;
pub mod io;
pub mod macros;
pub mod objects;
