//! Built-in style labels offered to callers.

/// Style suffixes known to give distinct results upstream.
pub const ALL_STYLES: [&str; 24] = [
    "watercolor",
    "oil painting",
    "cyberpunk",
    "steampunk",
    "cartoon",
    "anime",
    "photorealistic",
    "pixel art",
    "low poly",
    "noir",
    "futuristic",
    "retro",
    "fantasy",
    "impressionist",
    "Van Gogh",
    "Picasso",
    "minimalist",
    "surreal",
    "vaporwave",
    "gothic",
    "pop art",
    "comic book",
    "sketch",
    "chibi",
];

/// Whether `style` is one of [`ALL_STYLES`], ignoring case.
pub fn is_builtin(style: &str) -> bool {
    ALL_STYLES.iter().any(|s| s.eq_ignore_ascii_case(style.trim()))
}
