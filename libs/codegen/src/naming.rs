//! Name mangling shared by the mapper, synthesizer, and emitter
//!
//! Schema documents name things in whatever case their author liked
//! ("Link Flags", "service", "Operation-Result"); generated Rust needs
//! consistent `PascalCase` types and `snake_case` fields.

/// Split on anything that is not alphanumeric, title-case each piece, join.
fn words(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn to_pascal_case(input: &str) -> String {
    words(input)
        .into_iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

pub fn to_snake_case(input: &str) -> String {
    let parts = words(input);
    if parts.is_empty() {
        return "field".to_string();
    }
    let joined = parts.join("_").to_lowercase();
    // A leading digit is not a legal Rust identifier start.
    if joined.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        format!("f_{}", joined)
    } else {
        joined
    }
}
