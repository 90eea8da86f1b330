pub mod buf;
pub mod endian;
pub mod mode;
pub mod record;
