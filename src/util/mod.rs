pub mod buf;
pub mod id_generator;
