pub mod fs;
pub mod ui;

pub use crate::fs::{read_json, write_csv};
pub use crate::ui::single_pb;
