pub mod ip;
pub mod query;

pub use query::{QueryParams, split_list};

/// 解析类布尔值（1/true/on/yes），其余为 false
pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}
