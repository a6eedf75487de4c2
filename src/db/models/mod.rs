pub mod history;

pub use history::SessionHistory;
