pub mod json;
mod progress;
mod style;
mod summary;

pub use json::{print_json, write_json};
pub use progress::run_progress;
pub use style::{Colour, paint};
pub use summary::{print_check_results, print_summary};
