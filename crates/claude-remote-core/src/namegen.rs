//! Session id generation.
//!
//! Ids are a readable prefix plus a random hex suffix, e.g. `demo_3f9a1c2e`
//! or `misty-wolf_0b7d44a1` when no name was given.

use rand::RngExt;

/// Nature and weather themed adjectives.
const ADJECTIVES: &[&str] = &[
    "amber", "arctic", "autumn", "breezy", "calm", "coastal", "coral", "crimson", "crystal",
    "dawn", "desert", "dusty", "emerald", "foggy", "frozen", "gentle", "golden", "granite",
    "hazy", "icy", "jade", "juniper", "lunar", "maple", "meadow", "misty", "mossy", "noble",
    "ocean", "olive", "pine", "polar", "quiet", "rocky", "rustic", "sandy", "silver", "snowy",
    "solar", "stormy", "sunny", "swift", "tidal", "timber", "velvet", "wild", "willow", "winter",
];

/// Animal themed nouns.
const NOUNS: &[&str] = &[
    "badger", "bear", "bison", "crane", "crow", "deer", "dolphin", "eagle", "falcon", "finch",
    "fox", "gecko", "hawk", "heron", "ibis", "jaguar", "kestrel", "koala", "lark", "lemur",
    "lynx", "marten", "moose", "newt", "ocelot", "orca", "osprey", "otter", "owl", "panda",
    "puma", "quail", "raven", "robin", "seal", "sparrow", "stork", "swan", "tiger", "toucan",
    "turtle", "walrus", "whale", "wolf", "wren", "yak", "zebra",
];

/// Longest slug kept from a caller-supplied name
const MAX_SLUG_LEN: usize = 32;

/// Generates a random `adjective-noun` name.
pub fn generate_session_name() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{}-{}", adj, noun)
}

/// Reduce a caller-supplied name to characters safe in ids and tmux targets.
///
/// Keeps ASCII alphanumerics and `-`, maps everything else to `-`, collapses
/// repeats and trims to [`MAX_SLUG_LEN`]. Returns `None` when nothing usable
/// is left.
pub fn slugify(name: &str) -> Option<String> {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let c = if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            '-'
        };
        if c == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(c);
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Builds a candidate id from an optional caller-supplied name.
pub fn generate_id(name: Option<&str>) -> String {
    let prefix = name
        .and_then(slugify)
        .unwrap_or_else(generate_session_name);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..8])
}

/// Generates an id that is not contained in `taken`.
///
/// Attempts up to 10 random suffixes, then falls back to a full UUID suffix.
pub fn generate_unique_id<F>(name: Option<&str>, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    for _ in 0..10 {
        let id = generate_id(name);
        if !taken(&id) {
            return id;
        }
    }
    let prefix = name
        .and_then(slugify)
        .unwrap_or_else(generate_session_name);
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_session_name_uses_valid_words() {
        let name = generate_session_name();
        let (adj, noun) = name.split_once('-').expect("adjective-noun format");
        assert!(ADJECTIVES.contains(&adj));
        assert!(NOUNS.contains(&noun));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("demo"), Some("demo".to_string()));
        assert_eq!(slugify("My Project!"), Some("my-project".to_string()));
        assert_eq!(slugify("a..b::c"), Some("a-b-c".to_string()));
        assert_eq!(slugify("  "), None);
        assert_eq!(slugify("!!!"), None);
        assert_eq!(slugify(&"x".repeat(100)).map(|s| s.len()), Some(MAX_SLUG_LEN));
    }

    #[test]
    fn test_generate_id_with_name() {
        let id = generate_id(Some("test"));
        assert!(id.starts_with("test_"));
        assert_eq!(id.len(), "test_".len() + 8);
    }

    #[test]
    fn test_generate_id_without_name() {
        let id = generate_id(None);
        let (prefix, suffix) = id.rsplit_once('_').unwrap();
        assert!(prefix.contains('-'));
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_unique_id_avoids_taken() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = generate_unique_id(Some("demo"), |candidate| seen.contains(candidate));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_generate_unique_id_fallback() {
        let id = generate_unique_id(Some("demo"), |candidate| candidate.len() < 20);
        assert!(id.starts_with("demo_"));
        assert_eq!(id.len(), "demo_".len() + 32);
    }
}
