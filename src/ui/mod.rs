pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, source_tag, success, warn};
pub use table::TableBuilder;
pub use theme::{theme, Theme};
