use rand::Rng;
use shared::MAX_NAME_LEN;

const ANIMALS: [&str; 26] = [
    "Aardvark", "Badger", "Cheetah", "Dolphin", "Eagle", "Fox", "Giraffe", "Hippo", "Iguana",
    "Jaguar", "Koala", "Lemur", "Meerkat", "Narwhal", "Otter", "Panda", "Quokka", "Raccoon",
    "Shark", "Tiger", "Urchin", "Vulture", "Walrus", "Xerus", "Yak", "Zebra",
];

// Generate a display name such as "Otter4821"
pub fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let animal = ANIMALS[rng.gen_range(0..ANIMALS.len())];
    format!("{}{}", animal, rng.gen_range(1000..10000))
}

// Generate a "#rrggbb" colour
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("#{:06x}", rng.gen_range(0..=0xFF_FFFFu32))
}

/// Cleans a client-supplied display name. Returns `None` when nothing usable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Extracts the `name` parameter from a request query string.
pub fn name_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "name")
        .and_then(|(_, value)| sanitize_name(&percent_decode(value)))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
